//! Bounds check for perceived product poses.
//!
//! Perception reports a pose in the bin frame. A pose inside the bin box is
//! accepted silently, one within the tolerance band around the box is
//! accepted with a warning, and anything further out is rejected.

use std::fmt;

use nalgebra::Vector3;
use tracing::{error, warn};

use super::{BinDimensions, Pose, compose_global};
use crate::error::{PickError, PickResult};
use crate::shelf::Bin;
use crate::types::ProductName;

/// Bin-frame axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn component(self, v: &Vector3<f64>) -> f64 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
            Axis::Z => v.z,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x (depth)"),
            Axis::Y => write!(f, "y (width)"),
            Axis::Z => write!(f, "z (height)"),
        }
    }
}

/// Outcome of checking a local pose against bin dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundsCheck {
    /// Every coordinate lies in `[0, dimension]`.
    Within,
    /// Some coordinates are outside the box but inside the tolerance band.
    WithinTolerance { axes: Vec<Axis> },
    /// At least one coordinate is beyond the tolerance band.
    OutOfTolerance { axes: Vec<Axis> },
}

impl BoundsCheck {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, BoundsCheck::OutOfTolerance { .. })
    }
}

/// A perceived pose that passed the bounds check.
#[derive(Debug, Clone)]
pub struct ValidatedPose {
    /// Pose in the bin frame, as reported
    pub local: Pose,
    /// Pose in the world frame
    pub global: Pose,
    pub check: BoundsCheck,
}

/// Classifies perceived poses against bin geometry.
#[derive(Debug, Clone, Copy)]
pub struct PoseValidator {
    tolerance: f64,
}

impl PoseValidator {
    /// Create a validator with tolerance band `tolerance` (meters) on every axis.
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Classify the translation of `local` against `dims`.
    pub fn classify(&self, local: &Pose, dims: &BinDimensions) -> BoundsCheck {
        let t = &local.translation.vector;
        let mut outside = Vec::new();
        let mut rejected = Vec::new();

        for axis in Axis::ALL {
            let value = axis.component(t);
            let extent = dims.along(axis);
            if !value.is_finite() {
                outside.push(axis);
                rejected.push(axis);
            } else if !(0.0..=extent).contains(&value) {
                outside.push(axis);
                if value < -self.tolerance || value > extent + self.tolerance {
                    rejected.push(axis);
                }
            }
        }

        if !rejected.is_empty() {
            BoundsCheck::OutOfTolerance { axes: rejected }
        } else if !outside.is_empty() {
            BoundsCheck::WithinTolerance { axes: outside }
        } else {
            BoundsCheck::Within
        }
    }

    /// Check `local` against `bin` and compose it into the world frame.
    pub fn validate(
        &self,
        product: &ProductName,
        bin: &Bin,
        world_t_shelf: &Pose,
        local: &Pose,
    ) -> PickResult<ValidatedPose> {
        let check = self.classify(local, bin.dimensions());
        let t = local.translation.vector;

        match &check {
            BoundsCheck::Within => {}
            BoundsCheck::WithinTolerance { axes } => {
                warn!(
                    product = %product,
                    bin = %bin.name(),
                    ?axes,
                    "Reported pose ({:.3}, {:.3}, {:.3}) is outside the bin but within tolerance",
                    t.x, t.y, t.z
                );
            }
            BoundsCheck::OutOfTolerance { axes } => {
                error!(
                    product = %product,
                    bin = %bin.name(),
                    ?axes,
                    tolerance = self.tolerance,
                    "Reported pose ({:.3}, {:.3}, {:.3}) is outside the tolerance band",
                    t.x, t.y, t.z
                );
                return Err(PickError::PoseOutOfTolerance {
                    product: product.clone(),
                    bin: bin.name().clone(),
                    position: [t.x, t.y, t.z],
                    tolerance: self.tolerance,
                });
            }
        }

        let global = compose_global(world_t_shelf, bin.pose(), local);
        Ok(ValidatedPose {
            local: *local,
            global,
            check,
        })
    }
}
