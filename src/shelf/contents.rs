//! Order file loading.
//!
//! The order file lists the contents of every bin and the ordered picks:
//!
//! ```json
//! {
//!   "bin_contents": { "bin_A": ["oreo_mega_stuf", "crayola_64_ct"] },
//!   "work_order": [ { "bin": "bin_A", "item": "oreo_mega_stuf" } ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::{Shelf, ShelfLayout};
use crate::error::{PickError, PickResult};
use crate::queue::WorkOrder;
use crate::types::{BinName, ProductName};

#[derive(Debug, Clone, Deserialize)]
pub struct OrderFile {
    pub bin_contents: BTreeMap<BinName, Vec<ProductName>>,
    #[serde(default)]
    pub work_order: Vec<OrderEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderEntry {
    pub bin: BinName,
    pub item: ProductName,
}

/// Parse order-file JSON and populate a shelf built from `layout`.
pub fn parse_order_file(raw: &str, layout: &ShelfLayout) -> PickResult<(Shelf, Vec<WorkOrder>)> {
    let file: OrderFile = serde_json::from_str(raw)
        .map_err(|e| PickError::Input(format!("Malformed order file: {}", e)))?;

    let mut shelf = Shelf::from_layout(layout)?;

    for (bin, products) in &file.bin_contents {
        if shelf.bin(bin).is_none() {
            return Err(PickError::Input(format!(
                "bin_contents references unknown bin {}",
                bin
            )));
        }
        for product in products {
            shelf.add_product(bin, product.clone())?;
        }
        debug!(bin = %bin, count = products.len(), "Loaded bin contents");
    }

    let mut orders = Vec::with_capacity(file.work_order.len());
    for entry in file.work_order {
        // A dangling reference here is a fatal input error, not a skipped order.
        shelf.resolve(&entry.bin, &entry.item)?;
        orders.push(WorkOrder::new(entry.bin, entry.item));
    }

    // Every requested instance must exist: two picks of one product need two
    // instances in that bin.
    let mut demand: BTreeMap<(&BinName, &ProductName), usize> = BTreeMap::new();
    for order in &orders {
        *demand.entry((&order.bin, &order.product)).or_default() += 1;
    }
    for ((bin, product), wanted) in demand {
        let available = shelf
            .bin(bin)
            .map(|b| b.products().iter().filter(|p| p.name() == product).count())
            .unwrap_or(0);
        if wanted > available {
            return Err(PickError::InvalidOrder {
                bin: bin.clone(),
                product: product.clone(),
                reason: format!("{} picks requested but only {} in bin", wanted, available),
            });
        }
    }

    info!(
        bins = file.bin_contents.len(),
        orders = orders.len(),
        "Loaded shelf contents"
    );

    Ok((shelf, orders))
}

/// Read and parse an order file from disk.
pub fn load_order_file(
    path: impl AsRef<Path>,
    layout: &ShelfLayout,
) -> PickResult<(Shelf, Vec<WorkOrder>)> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PickError::Input(format!("Unable to read {}: {}", path.display(), e)))?;
    parse_order_file(&raw, layout)
}
