//! Shelf geometry as loaded from configuration.

use serde::{Deserialize, Serialize};

use crate::pose::{BinDimensions, PoseConfig};

/// Geometry of a single bin relative to the shelf frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinLayout {
    pub name: String,
    /// Bin origin (bottom front right corner) in the shelf frame
    pub pose: PoseConfig,
    pub depth: f64,
    pub width: f64,
    pub height: f64,
}

impl BinLayout {
    pub fn dimensions(&self) -> BinDimensions {
        BinDimensions::new(self.depth, self.width, self.height)
    }
}

/// Shelf pose in the world frame plus every bin on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfLayout {
    pub pose: PoseConfig,
    pub bins: Vec<BinLayout>,
}

// Kiva pod used for the picking challenge: 3 columns by 4 rows, bin_A top left.
const COLUMN_WIDTHS: [f64; 3] = [0.2525, 0.3025, 0.2525];
const ROW_HEIGHTS: [f64; 4] = [0.2667, 0.2286, 0.2286, 0.2667];
const BIN_DEPTH: f64 = 0.43;
const BOTTOM_ROW_Z: f64 = 0.82;

impl Default for ShelfLayout {
    fn default() -> Self {
        let mut bins = Vec::with_capacity(12);

        for (row, _) in ROW_HEIGHTS.iter().enumerate() {
            // Rows are counted from the top; z grows from the bottom row up.
            let z = BOTTOM_ROW_Z + ROW_HEIGHTS[row + 1..].iter().sum::<f64>();
            for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
                // Columns are counted from the left; y grows from the right edge.
                let y: f64 = COLUMN_WIDTHS[col + 1..].iter().sum();
                let letter = (b'A' + (row * 3 + col) as u8) as char;
                bins.push(BinLayout {
                    name: format!("bin_{}", letter),
                    pose: PoseConfig::from_translation(0.0, y, z),
                    depth: BIN_DEPTH,
                    width: *width,
                    height: ROW_HEIGHTS[row],
                });
            }
        }

        Self {
            pose: PoseConfig::from_translation(0.95, -0.4, 0.0),
            bins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_has_twelve_bins() {
        let layout = ShelfLayout::default();
        assert_eq!(layout.bins.len(), 12);
        assert_eq!(layout.bins[0].name, "bin_A");
        assert_eq!(layout.bins[11].name, "bin_L");
    }

    #[test]
    fn test_default_layout_geometry() {
        let layout = ShelfLayout::default();
        let a = &layout.bins[0];
        let c = &layout.bins[2];
        let j = &layout.bins[9];

        // bin_C is the top right bin: no y offset
        assert!(c.pose.xyz[1].abs() < 1e-12);
        // bin_A is left of bin_B and bin_C
        assert!((a.pose.xyz[1] - (0.3025 + 0.2525)).abs() < 1e-12);
        // bin_J sits on the bottom row
        assert!((j.pose.xyz[2] - BOTTOM_ROW_Z).abs() < 1e-12);
        assert!(a.pose.xyz[2] > j.pose.xyz[2]);
        assert_eq!(a.dimensions().depth, BIN_DEPTH);
    }
}
