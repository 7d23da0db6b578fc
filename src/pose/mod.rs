//! Rigid transforms for the shelf, bins and perceived products.
//!
//! Every pose is an `Isometry3<f64>` read as `parent_T_child`: it maps
//! coordinates expressed in the child frame into the parent frame. Chains are
//! built by right-multiplying children, so an object perceived in a bin ends
//! up in the world frame as `world_T_shelf * shelf_T_bin * bin_T_object`.
//! Bin frames sit at the bottom front right corner of the bin with x pointing
//! into the bin (depth), y across it (width) and z up (height). This is the
//! convention the motion service consumes.

mod validator;

pub use validator::{Axis, BoundsCheck, PoseValidator, ValidatedPose};

use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Rigid transform used throughout the crate.
pub type Pose = Isometry3<f64>;

/// Serializable pose: translation in meters, rotation as roll/pitch/yaw in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    pub xyz: [f64; 3],
    #[serde(default)]
    pub rpy: [f64; 3],
}

impl PoseConfig {
    /// Pose with translation only.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            xyz: [x, y, z],
            rpy: [0.0; 3],
        }
    }

    /// Convert to an isometry.
    pub fn to_isometry(&self) -> Pose {
        let rotation = UnitQuaternion::from_euler_angles(self.rpy[0], self.rpy[1], self.rpy[2]);
        Isometry3::from_parts(
            Translation3::new(self.xyz[0], self.xyz[1], self.xyz[2]),
            rotation,
        )
    }

    /// Build from an isometry.
    pub fn from_isometry(pose: &Pose) -> Self {
        let (roll, pitch, yaw) = pose.rotation.euler_angles();
        let t = &pose.translation;
        Self {
            xyz: [t.x, t.y, t.z],
            rpy: [roll, pitch, yaw],
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self::from_translation(0.0, 0.0, 0.0)
    }
}

/// Box dimensions of a bin in meters, measured from the bin origin corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinDimensions {
    pub depth: f64,
    pub width: f64,
    pub height: f64,
}

impl BinDimensions {
    pub fn new(depth: f64, width: f64, height: f64) -> Self {
        Self {
            depth,
            width,
            height,
        }
    }

    /// Extent along the given axis.
    pub fn along(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.depth,
            Axis::Y => self.width,
            Axis::Z => self.height,
        }
    }

    /// Center of the box in the bin frame.
    pub fn center(&self) -> Pose {
        Isometry3::translation(self.depth / 2.0, self.width / 2.0, self.height / 2.0)
    }
}

/// Transform from the bin frame into the world frame.
pub fn bin_to_world(world_t_shelf: &Pose, shelf_t_bin: &Pose) -> Pose {
    world_t_shelf * shelf_t_bin
}

/// Compose a bin-local object pose into the world frame.
pub fn compose_global(world_t_shelf: &Pose, shelf_t_bin: &Pose, bin_t_object: &Pose) -> Pose {
    bin_to_world(world_t_shelf, shelf_t_bin) * bin_t_object
}
