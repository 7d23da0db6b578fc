//! The pick sequence as data.

use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::pose::Pose;
use crate::services::{ApproachPlan, ArmId, GraspCandidate, RobotState};

/// The thirteen steps of one pick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PickStep {
    MoveHome,
    OpenEndEffectors,
    LocateObject,
    ChooseGrasp,
    PlanApproach,
    Reserved,
    MoveToPreGrasp,
    ApproachGrasp,
    CloseGripper,
    Lift,
    Retreat,
    PlaceInGoalBin,
    Release,
}

impl PickStep {
    pub const ALL: [PickStep; 13] = [
        PickStep::MoveHome,
        PickStep::OpenEndEffectors,
        PickStep::LocateObject,
        PickStep::ChooseGrasp,
        PickStep::PlanApproach,
        PickStep::Reserved,
        PickStep::MoveToPreGrasp,
        PickStep::ApproachGrasp,
        PickStep::CloseGripper,
        PickStep::Lift,
        PickStep::Retreat,
        PickStep::PlaceInGoalBin,
        PickStep::Release,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Step at `index`; `None` past the last step.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            PickStep::MoveHome => "move home",
            PickStep::OpenEndEffectors => "open end effectors",
            PickStep::LocateObject => "locate object",
            PickStep::ChooseGrasp => "choose grasp",
            PickStep::PlanApproach => "plan approach",
            PickStep::Reserved => "reserved",
            PickStep::MoveToPreGrasp => "move to pre-grasp",
            PickStep::ApproachGrasp => "approach grasp",
            PickStep::CloseGripper => "close end effector",
            PickStep::Lift => "lift",
            PickStep::Retreat => "retreat",
            PickStep::PlaceInGoalBin => "place in goal bin",
            PickStep::Release => "release",
        }
    }

    /// Scheduling properties of this step.
    pub fn spec(self) -> StepSpec {
        STEP_TABLE[self.index()]
    }

    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }
}

impl fmt::Display for PickStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.index(), self.name())
    }
}

/// How a step is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    pub step: PickStep,
    /// The gate is consulted before this step when it is reached by advancing.
    pub checkpointed: bool,
    /// The next step runs straight after this one, without a checkpoint.
    pub falls_through: bool,
}

const fn spec(step: PickStep, checkpointed: bool, falls_through: bool) -> StepSpec {
    StepSpec {
        step,
        checkpointed,
        falls_through,
    }
}

/// Steps 0 and 5 run together with their successors as one gated unit.
pub const STEP_TABLE: [StepSpec; 13] = [
    spec(PickStep::MoveHome, true, true),
    spec(PickStep::OpenEndEffectors, false, false),
    spec(PickStep::LocateObject, true, false),
    spec(PickStep::ChooseGrasp, true, false),
    spec(PickStep::PlanApproach, true, false),
    spec(PickStep::Reserved, true, true),
    spec(PickStep::MoveToPreGrasp, false, false),
    spec(PickStep::ApproachGrasp, true, false),
    spec(PickStep::CloseGripper, true, false),
    spec(PickStep::Lift, true, false),
    spec(PickStep::Retreat, true, false),
    spec(PickStep::PlaceInGoalBin, true, false),
    spec(PickStep::Release, true, false),
];

/// Where a resumed order starts.
///
/// Step 3 needs the global object pose that only step 2 produces, so a
/// request for it restarts the order from step 0. Indices past the last step
/// are returned unchanged and mean "nothing left to do".
pub fn resolve_jump(requested: usize) -> usize {
    if requested == PickStep::ChooseGrasp.index() {
        warn!(
            "Cannot jump to step {}: the object pose comes from step {}. Starting from step 0",
            PickStep::ChooseGrasp.index(),
            PickStep::LocateObject.index()
        );
        PickStep::MoveHome.index()
    } else {
        requested
    }
}

/// Arm for an object at `global` in the world frame.
pub fn choose_arm(dual_arm: bool, global: &Pose) -> ArmId {
    if dual_arm && global.translation.vector.y >= 0.0 {
        ArmId::Left
    } else {
        ArmId::Right
    }
}

/// Scratch state for one order. Dropped when the order ends.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub arm: Option<ArmId>,
    pub global_object_pose: Option<Pose>,
    pub grasp: Option<GraspCandidate>,
    pub approach: Option<ApproachPlan>,
    pub step: usize,
}

impl StepContext {
    pub fn starting_at(step: usize) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }

    /// The grasp's IK solution, the state the approach ends in.
    pub fn grasp_state(&self) -> Option<&RobotState> {
        self.grasp.as_ref().map(|g| &g.ik_solution)
    }

    pub fn pre_grasp_state(&self) -> Option<&RobotState> {
        self.approach.as_ref().map(|a| &a.pre_grasp_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Isometry3;

    #[test]
    fn test_indices_are_contiguous() {
        for (i, step) in PickStep::ALL.iter().enumerate() {
            assert_eq!(step.index(), i);
            assert_eq!(PickStep::from_index(i), Some(*step));
            assert_eq!(step.spec().step, *step);
        }
        assert_eq!(PickStep::from_index(13), None);
        assert_eq!(PickStep::Release.next(), None);
    }

    #[test]
    fn test_fallthrough_edges() {
        let fallthrough: Vec<usize> = STEP_TABLE
            .iter()
            .filter(|s| s.falls_through)
            .map(|s| s.step.index())
            .collect();
        assert_eq!(fallthrough, vec![0, 5]);

        let unchecked: Vec<usize> = STEP_TABLE
            .iter()
            .filter(|s| !s.checkpointed)
            .map(|s| s.step.index())
            .collect();
        assert_eq!(unchecked, vec![1, 6]);
    }

    #[test]
    fn test_every_fallthrough_target_is_unchecked() {
        for spec in STEP_TABLE.iter().filter(|s| s.falls_through) {
            let next = spec.step.next().unwrap();
            assert!(!next.spec().checkpointed);
        }
    }

    #[test]
    fn test_jump_to_grasp_is_downgraded() {
        assert_eq!(resolve_jump(3), 0);
        assert_eq!(resolve_jump(0), 0);
        assert_eq!(resolve_jump(4), 4);
        assert_eq!(resolve_jump(12), 12);
        assert_eq!(resolve_jump(99), 99);
    }

    #[test]
    fn test_choose_arm() {
        let left_side = Isometry3::translation(1.0, 0.2, 1.0);
        let right_side = Isometry3::translation(1.0, -0.2, 1.0);
        assert_eq!(choose_arm(true, &left_side), ArmId::Left);
        assert_eq!(choose_arm(true, &right_side), ArmId::Right);
        assert_eq!(choose_arm(false, &left_side), ArmId::Right);
    }

    #[test]
    fn test_display() {
        assert_eq!(PickStep::ChooseGrasp.to_string(), "3 (choose grasp)");
    }
}
