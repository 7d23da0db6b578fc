//! Shelf, bins and the products inside them.
//!
//! The shelf is owned by the orchestrator for the whole run. Anything that
//! only needs to look at it (dashboards, the CLI) gets a `ShelfSnapshot`.

mod contents;
mod layout;

pub use contents::{OrderFile, load_order_file, parse_order_file};
pub use layout::{BinLayout, ShelfLayout};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PickError, PickResult};
use crate::pose::{BinDimensions, Pose, PoseConfig};
use crate::types::{BinName, ProductName};

/// Triangle mesh reported by perception for a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.triangles.is_empty()
    }
}

/// A single product instance sitting in a bin.
#[derive(Debug, Clone)]
pub struct Product {
    id: u32,
    name: ProductName,
    mesh: Option<Mesh>,
    local_pose: Option<Pose>,
}

impl Product {
    fn new(id: u32, name: ProductName) -> Self {
        Self {
            id,
            name,
            mesh: None,
            local_pose: None,
        }
    }

    pub fn name(&self) -> &ProductName {
        &self.name
    }

    /// Unique name of this instance in the collision world.
    pub fn collision_name(&self) -> String {
        format!("{}_{}", self.name, self.id)
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    /// Pose relative to the containing bin, once perceived.
    pub fn local_pose(&self) -> Option<&Pose> {
        self.local_pose.as_ref()
    }

    pub fn set_local_pose(&mut self, pose: Pose) {
        self.local_pose = Some(pose);
    }

    pub fn set_mesh(&mut self, mesh: Mesh) {
        self.mesh = Some(mesh);
    }
}

/// One bin of the shelf.
#[derive(Debug, Clone)]
pub struct Bin {
    name: BinName,
    pose: Pose,
    dimensions: BinDimensions,
    products: Vec<Product>,
}

impl Bin {
    pub fn new(name: BinName, pose: Pose, dimensions: BinDimensions) -> Self {
        Self {
            name,
            pose,
            dimensions,
            products: Vec::new(),
        }
    }

    pub fn name(&self) -> &BinName {
        &self.name
    }

    /// Bin origin in the shelf frame.
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn dimensions(&self) -> &BinDimensions {
        &self.dimensions
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Names of every product instance currently in the bin, in insertion order.
    pub fn product_names(&self) -> Vec<ProductName> {
        self.products.iter().map(|p| p.name.clone()).collect()
    }

    pub fn contains(&self, product: &ProductName) -> bool {
        self.products.iter().any(|p| &p.name == product)
    }

    /// First instance of `product` in the bin.
    pub fn product(&self, product: &ProductName) -> Option<&Product> {
        self.products.iter().find(|p| &p.name == product)
    }

    pub fn product_mut(&mut self, product: &ProductName) -> Option<&mut Product> {
        self.products.iter_mut().find(|p| &p.name == product)
    }

    /// Remove the first instance of `product`.
    pub fn remove_product(&mut self, product: &ProductName) -> Option<Product> {
        let idx = self.products.iter().position(|p| &p.name == product)?;
        Some(self.products.remove(idx))
    }
}

/// The shelf: a world pose plus bins keyed by name.
#[derive(Debug, Clone)]
pub struct Shelf {
    pose: Pose,
    bins: BTreeMap<BinName, Bin>,
    next_product_id: u32,
}

impl Shelf {
    /// Build an empty shelf from its layout.
    pub fn from_layout(layout: &ShelfLayout) -> PickResult<Self> {
        let mut bins = BTreeMap::new();
        for bin in &layout.bins {
            let name = BinName::new(bin.name.clone());
            let dims = bin.dimensions();
            if dims.depth < 0.0 || dims.width < 0.0 || dims.height < 0.0 {
                return Err(PickError::Config(format!(
                    "Bin {} has negative dimensions",
                    name
                )));
            }
            let previous = bins.insert(
                name.clone(),
                Bin::new(name.clone(), bin.pose.to_isometry(), dims),
            );
            if previous.is_some() {
                return Err(PickError::Config(format!("Bin {} defined twice", name)));
            }
        }

        Ok(Self {
            pose: layout.pose.to_isometry(),
            bins,
            next_product_id: 0,
        })
    }

    /// Shelf pose in the world frame.
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn bin(&self, name: &BinName) -> Option<&Bin> {
        self.bins.get(name)
    }

    pub fn bin_mut(&mut self, name: &BinName) -> Option<&mut Bin> {
        self.bins.get_mut(name)
    }

    pub fn bins(&self) -> impl Iterator<Item = &Bin> {
        self.bins.values()
    }

    pub fn bin_names(&self) -> Vec<BinName> {
        self.bins.keys().cloned().collect()
    }

    /// Put a new product instance in a bin.
    pub fn add_product(&mut self, bin: &BinName, product: ProductName) -> PickResult<()> {
        let id = self.next_product_id;
        let target = self
            .bins
            .get_mut(bin)
            .ok_or_else(|| PickError::Input(format!("Unknown bin {}", bin)))?;
        target.products.push(Product::new(id, product));
        self.next_product_id += 1;
        Ok(())
    }

    /// Remove the first instance of `product` from `bin`.
    pub fn remove_product(&mut self, bin: &BinName, product: &ProductName) -> Option<Product> {
        self.bins.get_mut(bin)?.remove_product(product)
    }

    /// Empty every bin.
    pub fn clear_products(&mut self) {
        for bin in self.bins.values_mut() {
            bin.products.clear();
        }
    }

    /// Check that `product` currently sits in `bin`.
    pub fn resolve(&self, bin: &BinName, product: &ProductName) -> PickResult<&Product> {
        let found = self.bins.get(bin).ok_or_else(|| PickError::InvalidOrder {
            bin: bin.clone(),
            product: product.clone(),
            reason: "bin does not exist on the shelf".to_string(),
        })?;
        found.product(product).ok_or_else(|| PickError::InvalidOrder {
            bin: bin.clone(),
            product: product.clone(),
            reason: "product is not in the bin".to_string(),
        })
    }

    /// Immutable copy for dashboards and diagnostics.
    pub fn snapshot(&self) -> ShelfSnapshot {
        ShelfSnapshot {
            taken_at: Utc::now(),
            pose: PoseConfig::from_isometry(&self.pose),
            bins: self
                .bins
                .values()
                .map(|bin| BinSnapshot {
                    name: bin.name.clone(),
                    products: bin
                        .products
                        .iter()
                        .map(|p| ProductSnapshot {
                            name: p.name.clone(),
                            collision_name: p.collision_name(),
                            local_pose: p.local_pose.as_ref().map(PoseConfig::from_isometry),
                            has_mesh: p.mesh.is_some(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: ProductName,
    pub collision_name: String,
    pub local_pose: Option<PoseConfig>,
    pub has_mesh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinSnapshot {
    pub name: BinName,
    pub products: Vec<ProductSnapshot>,
}

/// Point-in-time copy of the shelf contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfSnapshot {
    pub taken_at: DateTime<Utc>,
    pub pose: PoseConfig,
    pub bins: Vec<BinSnapshot>,
}

impl ShelfSnapshot {
    pub fn bin(&self, name: &str) -> Option<&BinSnapshot> {
        self.bins.iter().find(|b| b.name.as_str() == name)
    }

    pub fn product_count(&self) -> usize {
        self.bins.iter().map(|b| b.products.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shelf() -> Shelf {
        Shelf::from_layout(&ShelfLayout::default()).unwrap()
    }

    #[test]
    fn test_add_and_remove_products() {
        let mut shelf = shelf();
        let bin = BinName::new("bin_A");
        shelf.add_product(&bin, "oreo_mega_stuf".into()).unwrap();
        shelf.add_product(&bin, "oreo_mega_stuf".into()).unwrap();
        shelf.add_product(&bin, "crayola_64_ct".into()).unwrap();

        let contents = shelf.bin(&bin).unwrap();
        assert_eq!(contents.products().len(), 3);
        let first_collision = contents.products()[0].collision_name();

        let removed = shelf
            .remove_product(&bin, &ProductName::new("oreo_mega_stuf"))
            .unwrap();
        assert_eq!(removed.collision_name(), first_collision);
        assert_eq!(shelf.bin(&bin).unwrap().products().len(), 2);
        assert!(shelf.bin(&bin).unwrap().contains(&"oreo_mega_stuf".into()));
    }

    #[test]
    fn test_collision_names_unique() {
        let mut shelf = shelf();
        shelf.add_product(&"bin_A".into(), "glue".into()).unwrap();
        shelf.add_product(&"bin_B".into(), "glue".into()).unwrap();
        let a = shelf.bin(&"bin_A".into()).unwrap().products()[0].collision_name();
        let b = shelf.bin(&"bin_B".into()).unwrap().products()[0].collision_name();
        assert_ne!(a, b);
    }

    #[test]
    fn test_add_to_unknown_bin_fails() {
        let mut shelf = shelf();
        let err = shelf.add_product(&"bin_Z".into(), "glue".into()).unwrap_err();
        assert!(matches!(err, PickError::Input(_)));
    }

    #[test]
    fn test_resolve_dangling_references() {
        let mut shelf = shelf();
        shelf.add_product(&"bin_A".into(), "glue".into()).unwrap();

        assert!(shelf.resolve(&"bin_A".into(), &"glue".into()).is_ok());
        assert!(matches!(
            shelf.resolve(&"bin_Z".into(), &"glue".into()),
            Err(PickError::InvalidOrder { .. })
        ));
        assert!(matches!(
            shelf.resolve(&"bin_A".into(), &"stapler".into()),
            Err(PickError::InvalidOrder { .. })
        ));
    }

    #[test]
    fn test_duplicate_bin_rejected() {
        let mut layout = ShelfLayout::default();
        let dup = layout.bins[0].clone();
        layout.bins.push(dup);
        assert!(matches!(Shelf::from_layout(&layout), Err(PickError::Config(_))));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut shelf = shelf();
        shelf.add_product(&"bin_C".into(), "glue".into()).unwrap();
        let snapshot = shelf.snapshot();
        shelf.clear_products();

        assert_eq!(snapshot.product_count(), 1);
        assert_eq!(snapshot.bin("bin_C").unwrap().products[0].name.as_str(), "glue");
        assert_eq!(shelf.snapshot().product_count(), 0);
    }
}
