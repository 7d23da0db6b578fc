//! Collaborator services driven by the pick sequence.
//!
//! Motion planning, grasp generation, perception and the end effectors are
//! owned by other systems. The orchestrator only sees them through these
//! traits; `sim::SimulatedCell` implements all of them for tests and for
//! running the sequencer without hardware.

pub mod sim;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pose::Pose;
use crate::shelf::Mesh;
use crate::types::{BinName, NamedPose, ProductName};

/// One of the robot's arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmId {
    Left,
    Right,
}

impl ArmId {
    /// Planning group name of the arm.
    pub fn group(&self) -> &'static str {
        match self {
            ArmId::Left => "left_arm",
            ArmId::Right => "right_arm",
        }
    }

    /// Link an attached object is fixed to.
    pub fn end_effector_link(&self) -> &'static str {
        match self {
            ArmId::Left => "left_ee_link",
            ArmId::Right => "right_ee_link",
        }
    }
}

impl fmt::Display for ArmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.group())
    }
}

/// Joint-space snapshot of the robot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub positions: Vec<f64>,
}

impl RobotState {
    pub fn new(positions: Vec<f64>) -> Self {
        Self { positions }
    }
}

/// A time-ordered list of robot states for one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub arm: ArmId,
    pub waypoints: Vec<RobotState>,
}

impl Trajectory {
    /// Same path, traversed backwards.
    pub fn reversed(&self) -> Self {
        Self {
            arm: self.arm,
            waypoints: self.waypoints.iter().rev().cloned().collect(),
        }
    }

    pub fn first(&self) -> Option<&RobotState> {
        self.waypoints.first()
    }

    pub fn last(&self) -> Option<&RobotState> {
        self.waypoints.last()
    }
}

/// Straight-line approach into a grasp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachPlan {
    /// Cartesian path from the pre-grasp state to the grasp state
    pub trajectory: Trajectory,
    /// Where the arm must be before the approach starts
    pub pre_grasp_state: RobotState,
}

/// A grasp proposed by the grasp generator, with its IK solution.
#[derive(Debug, Clone, PartialEq)]
pub struct GraspCandidate {
    pub grasp_pose: Pose,
    pub ik_solution: RobotState,
    pub score: f64,
}

/// What perception reports for a product.
#[derive(Debug, Clone, PartialEq)]
pub struct PerceptionResult {
    /// Pose in the bin frame
    pub local_pose: Pose,
    pub mesh: Option<Mesh>,
}

/// Goal of a free-space motion.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveTarget {
    Named(NamedPose),
    State(RobotState),
}

impl fmt::Display for MoveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveTarget::Named(name) => write!(f, "{}", name),
            MoveTarget::State(_) => write!(f, "joint state"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftDirection {
    Up,
    Down,
}

/// Motion planning and execution.
#[async_trait]
pub trait MotionService: Send + Sync {
    /// Plan and execute a free-space motion. `arm = None` moves the whole robot.
    async fn move_to(
        &self,
        target: &MoveTarget,
        arm: Option<ArmId>,
        speed_scale: f64,
    ) -> Result<()>;

    /// Plan a straight-line approach ending at `to`, starting `distance` meters back.
    async fn plan_approach(
        &self,
        arm: ArmId,
        from: &RobotState,
        to: &RobotState,
        distance: f64,
    ) -> Result<ApproachPlan>;

    async fn execute_trajectory(&self, trajectory: &Trajectory) -> Result<()>;

    /// Cartesian vertical motion of the end effector.
    async fn lift_along(&self, arm: ArmId, distance: f64, direction: LiftDirection) -> Result<()>;

    async fn current_state(&self) -> Result<RobotState>;
}

/// Grasp candidate generation.
#[async_trait]
pub trait GraspService: Send + Sync {
    /// Ranked candidates, best first. Empty when nothing is reachable.
    async fn generate_grasps(&self, object_pose: &Pose, arm: ArmId) -> Result<Vec<GraspCandidate>>;
}

/// Object recognition.
#[async_trait]
pub trait PerceptionService: Send + Sync {
    async fn find_object(
        &self,
        product: &ProductName,
        expected: &[ProductName],
        bin: &BinName,
        timeout: Duration,
    ) -> Result<PerceptionResult>;
}

/// Gripper or suction control.
#[async_trait]
pub trait EndEffector: Send + Sync {
    async fn set_open(&self, open: bool, arm: ArmId) -> Result<()>;
}

/// Collision world and visualization. Calls are fire-and-forget.
pub trait SceneService: Send + Sync {
    /// Show only the collision geometry of `bin` and its products.
    fn focus_bin(&self, bin: &BinName);
    /// Replace the shelf model with a single wall in front of it.
    fn collision_wall(&self);
    fn clear_collision_objects(&self);
    fn add_object(&self, object: &str, pose: &Pose, mesh: Option<&Mesh>);
    fn allow_finger_contact(&self, object: &str, arm: ArmId);
    fn attach(&self, object: &str, arm: ArmId);
    fn detach(&self, object: &str, arm: ArmId);
    fn remove(&self, object: &str);
}

/// Handles to every collaborator a pick run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub motion: Arc<dyn MotionService>,
    pub grasps: Arc<dyn GraspService>,
    pub perception: Arc<dyn PerceptionService>,
    pub end_effector: Arc<dyn EndEffector>,
    pub scene: Arc<dyn SceneService>,
}

impl Collaborators {
    /// Use one object for every collaborator.
    pub fn from_cell<T>(cell: Arc<T>) -> Self
    where
        T: MotionService + GraspService + PerceptionService + EndEffector + SceneService + 'static,
    {
        Self {
            motion: cell.clone(),
            grasps: cell.clone(),
            perception: cell.clone(),
            end_effector: cell.clone(),
            scene: cell,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
