//! In-process stand-in for the robot cell.
//!
//! `SimulatedCell` answers every collaborator call immediately (or after a
//! configurable latency) with a scripted outcome and records what was asked
//! of it. Perception reports each product at a fixed pose inside its bin
//! unless a pose has been set for it.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use nalgebra::Isometry3;
use tracing::debug;

use super::{
    ApproachPlan, ArmId, EndEffector, GraspCandidate, GraspService, LiftDirection, MotionService,
    MoveTarget, PerceptionResult, PerceptionService, RobotState, SceneService, Trajectory,
};
use crate::pose::Pose;
use crate::shelf::Mesh;
use crate::types::{BinName, ProductName};

const JOINTS: usize = 7;
const APPROACH_WAYPOINTS: usize = 5;

/// Every call the cell can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    MoveTo,
    PlanApproach,
    ExecuteTrajectory,
    LiftAlong,
    CurrentState,
    GenerateGrasps,
    FindObject,
    SetOpen,
    FocusBin,
    CollisionWall,
    ClearCollisionObjects,
    AddObject,
    AllowFingerContact,
    Attach,
    Detach,
    Remove,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct SimCall {
    pub op: SimOp,
    pub detail: String,
}

#[derive(Debug)]
struct Script {
    failing: HashSet<SimOp>,
    grasp_count: usize,
    object_poses: HashMap<ProductName, Pose>,
    default_pose: Pose,
    perception_delay: Duration,
    report_mesh: bool,
    latency: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            failing: HashSet::new(),
            grasp_count: 1,
            object_poses: HashMap::new(),
            // Fits inside every bin of the default shelf.
            default_pose: Isometry3::translation(0.15, 0.1, 0.05),
            perception_delay: Duration::ZERO,
            report_mesh: true,
            latency: Duration::ZERO,
        }
    }
}

/// Scriptable fake for every collaborator trait.
#[derive(Debug, Default)]
pub struct SimulatedCell {
    script: Mutex<Script>,
    calls: Mutex<Vec<SimCall>>,
    state: Mutex<RobotState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RobotState::new(vec![0.0; JOINTS])),
            ..Default::default()
        }
    }

    /// Make every future call of `op` fail.
    pub fn fail_on(&self, op: SimOp) {
        lock(&self.script).failing.insert(op);
    }

    pub fn clear_failures(&self) {
        lock(&self.script).failing.clear();
    }

    /// Number of candidates the grasp generator returns.
    pub fn set_grasp_count(&self, count: usize) {
        lock(&self.script).grasp_count = count;
    }

    /// Pose perception reports for `product`, in the bin frame.
    pub fn set_object_pose(&self, product: impl Into<ProductName>, pose: Pose) {
        lock(&self.script).object_poses.insert(product.into(), pose);
    }

    /// Pose perception reports for products without their own pose.
    pub fn set_default_pose(&self, pose: Pose) {
        lock(&self.script).default_pose = pose;
    }

    /// How long perception takes to answer.
    pub fn set_perception_delay(&self, delay: Duration) {
        lock(&self.script).perception_delay = delay;
    }

    pub fn set_report_mesh(&self, report: bool) {
        lock(&self.script).report_mesh = report;
    }

    /// Delay added to every motion and end effector call.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.script).latency = latency;
    }

    /// Pose perception would report for `product`.
    pub fn object_pose(&self, product: &ProductName) -> Pose {
        let script = lock(&self.script);
        script
            .object_poses
            .get(product)
            .copied()
            .unwrap_or(script.default_pose)
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: SimOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op == op).count()
    }

    pub fn ops(&self) -> Vec<SimOp> {
        lock(&self.calls).iter().map(|c| c.op).collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, op: SimOp, detail: impl Into<String>) -> Result<()> {
        let detail = detail.into();
        debug!(?op, %detail, "Simulated call");
        lock(&self.calls).push(SimCall { op, detail });
        if lock(&self.script).failing.contains(&op) {
            bail!("simulated {:?} failure", op);
        }
        Ok(())
    }

    async fn settle(&self) {
        let latency = lock(&self.script).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn placeholder_mesh() -> Mesh {
    Mesh {
        vertices: vec![
            [0.0, 0.0, 0.0],
            [0.05, 0.0, 0.0],
            [0.0, 0.05, 0.0],
            [0.0, 0.0, 0.05],
        ],
        triangles: vec![[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]],
    }
}

#[async_trait]
impl MotionService for SimulatedCell {
    async fn move_to(
        &self,
        target: &MoveTarget,
        arm: Option<ArmId>,
        speed_scale: f64,
    ) -> Result<()> {
        self.settle().await;
        self.record(
            SimOp::MoveTo,
            format!("{} arm={:?} speed={}", target, arm, speed_scale),
        )?;
        if let MoveTarget::State(state) = target {
            *lock(&self.state) = state.clone();
        }
        Ok(())
    }

    async fn plan_approach(
        &self,
        arm: ArmId,
        from: &RobotState,
        to: &RobotState,
        distance: f64,
    ) -> Result<ApproachPlan> {
        self.settle().await;
        self.record(SimOp::PlanApproach, format!("{} distance={}", arm, distance))?;
        if to.positions.is_empty() {
            bail!("grasp state is empty");
        }

        // Back off from the grasp state by a fraction proportional to distance.
        let pre_grasp: Vec<f64> = to.positions.iter().map(|p| p - distance).collect();
        let mut waypoints: Vec<RobotState> = (0..APPROACH_WAYPOINTS - 1)
            .map(|i| {
                let t = i as f64 / (APPROACH_WAYPOINTS - 1) as f64;
                RobotState::new(
                    pre_grasp
                        .iter()
                        .zip(&to.positions)
                        .map(|(a, b)| a + (b - a) * t)
                        .collect(),
                )
            })
            .collect();
        waypoints.push(to.clone());
        debug!(from = ?from.positions, "Approach planned");

        Ok(ApproachPlan {
            trajectory: Trajectory { arm, waypoints },
            pre_grasp_state: RobotState::new(pre_grasp),
        })
    }

    async fn execute_trajectory(&self, trajectory: &Trajectory) -> Result<()> {
        self.settle().await;
        self.record(
            SimOp::ExecuteTrajectory,
            format!("{} waypoints={}", trajectory.arm, trajectory.waypoints.len()),
        )?;
        if let Some(last) = trajectory.last() {
            *lock(&self.state) = last.clone();
        }
        Ok(())
    }

    async fn lift_along(&self, arm: ArmId, distance: f64, direction: LiftDirection) -> Result<()> {
        self.settle().await;
        self.record(
            SimOp::LiftAlong,
            format!("{} {:?} {}", arm, direction, distance),
        )
    }

    async fn current_state(&self) -> Result<RobotState> {
        self.record(SimOp::CurrentState, "")?;
        Ok(lock(&self.state).clone())
    }
}

#[async_trait]
impl GraspService for SimulatedCell {
    async fn generate_grasps(&self, object_pose: &Pose, arm: ArmId) -> Result<Vec<GraspCandidate>> {
        self.record(SimOp::GenerateGrasps, format!("{}", arm))?;
        let count = lock(&self.script).grasp_count;
        let t = object_pose.translation.vector;

        Ok((0..count)
            .map(|i| GraspCandidate {
                grasp_pose: *object_pose,
                ik_solution: RobotState::new(
                    (0..JOINTS)
                        .map(|j| t[j % 3] + 0.01 * (i + j) as f64)
                        .collect(),
                ),
                score: 1.0 / (i + 1) as f64,
            })
            .collect())
    }
}

#[async_trait]
impl PerceptionService for SimulatedCell {
    async fn find_object(
        &self,
        product: &ProductName,
        expected: &[ProductName],
        bin: &BinName,
        timeout: Duration,
    ) -> Result<PerceptionResult> {
        self.record(
            SimOp::FindObject,
            format!("{} in {} among {}", product, bin, expected.len()),
        )?;

        let (delay, report_mesh) = {
            let script = lock(&self.script);
            (script.perception_delay, script.report_mesh)
        };
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(anyhow!("no result for {} within {:?}", product, timeout));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(PerceptionResult {
            local_pose: self.object_pose(product),
            mesh: report_mesh.then(placeholder_mesh),
        })
    }
}

#[async_trait]
impl EndEffector for SimulatedCell {
    async fn set_open(&self, open: bool, arm: ArmId) -> Result<()> {
        self.settle().await;
        self.record(
            SimOp::SetOpen,
            format!("{} {}", arm, if open { "open" } else { "close" }),
        )
    }
}

impl SceneService for SimulatedCell {
    fn focus_bin(&self, bin: &BinName) {
        let _ = self.record(SimOp::FocusBin, bin.as_str());
    }

    fn collision_wall(&self) {
        let _ = self.record(SimOp::CollisionWall, "");
    }

    fn clear_collision_objects(&self) {
        let _ = self.record(SimOp::ClearCollisionObjects, "");
    }

    fn add_object(&self, object: &str, _pose: &Pose, mesh: Option<&Mesh>) {
        let _ = self.record(
            SimOp::AddObject,
            format!("{} mesh={}", object, mesh.is_some()),
        );
    }

    fn allow_finger_contact(&self, object: &str, arm: ArmId) {
        let _ = self.record(SimOp::AllowFingerContact, format!("{} {}", object, arm));
    }

    fn attach(&self, object: &str, arm: ArmId) {
        let _ = self.record(SimOp::Attach, format!("{} {}", object, arm.end_effector_link()));
    }

    fn detach(&self, object: &str, arm: ArmId) {
        let _ = self.record(SimOp::Detach, format!("{} {}", object, arm));
    }

    fn remove(&self, object: &str) {
        let _ = self.record(SimOp::Remove, object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failure() {
        let cell = SimulatedCell::new();
        cell.fail_on(SimOp::SetOpen);
        assert!(cell.set_open(true, ArmId::Right).await.is_err());
        assert_eq!(cell.count(SimOp::SetOpen), 1);

        cell.clear_failures();
        assert!(cell.set_open(true, ArmId::Right).await.is_ok());
    }

    #[tokio::test]
    async fn test_grasp_count() {
        let cell = SimulatedCell::new();
        let pose = Isometry3::translation(1.0, 0.2, 1.0);
        assert_eq!(cell.generate_grasps(&pose, ArmId::Left).await.unwrap().len(), 1);

        cell.set_grasp_count(0);
        assert!(cell.generate_grasps(&pose, ArmId::Left).await.unwrap().is_empty());

        cell.set_grasp_count(3);
        let grasps = cell.generate_grasps(&pose, ArmId::Left).await.unwrap();
        assert!(grasps[0].score > grasps[2].score);
    }

    #[tokio::test]
    async fn test_perception_timeout() {
        let cell = SimulatedCell::new();
        cell.set_perception_delay(Duration::from_millis(100));
        let result = cell
            .find_object(
                &"glue".into(),
                &[],
                &"bin_A".into(),
                Duration::from_millis(10),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_perception_reports_scripted_pose() {
        let cell = SimulatedCell::new();
        cell.set_object_pose("glue", Isometry3::translation(0.3, 0.0, 0.0));
        cell.set_report_mesh(false);
        let result = cell
            .find_object(&"glue".into(), &[], &"bin_A".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.local_pose.translation.vector.x, 0.3);
        assert!(result.mesh.is_none());
    }

    #[tokio::test]
    async fn test_approach_ends_at_grasp_state() {
        let cell = SimulatedCell::new();
        let grasp = RobotState::new(vec![0.5; JOINTS]);
        let from = cell.current_state().await.unwrap();
        let plan = cell
            .plan_approach(ArmId::Right, &from, &grasp, 0.1)
            .await
            .unwrap();
        assert_eq!(plan.trajectory.last(), Some(&grasp));
        assert_eq!(plan.trajectory.first(), Some(&plan.pre_grasp_state));

        cell.execute_trajectory(&plan.trajectory).await.unwrap();
        assert_eq!(cell.current_state().await.unwrap(), grasp);
    }

    #[tokio::test]
    async fn test_default_pose_applies_to_unscripted_products() {
        let cell = SimulatedCell::new();
        cell.set_default_pose(Isometry3::translation(0.2, 0.05, 0.02));
        cell.set_object_pose("glue", Isometry3::translation(0.1, 0.1, 0.1));

        let stapler = cell.object_pose(&"stapler".into());
        assert_eq!(stapler.translation.vector.x, 0.2);
        let glue = cell.object_pose(&"glue".into());
        assert_eq!(glue.translation.vector.x, 0.1);
    }

    #[tokio::test]
    async fn test_latency_delays_motion() {
        let cell = SimulatedCell::new();
        cell.set_latency(Duration::from_millis(30));

        let start = std::time::Instant::now();
        cell.set_open(false, ArmId::Right).await.unwrap();
        cell.lift_along(ArmId::Right, 0.05, LiftDirection::Up).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_clear_calls() {
        let cell = SimulatedCell::new();
        cell.remove("glue_0");
        assert_eq!(cell.count(SimOp::Remove), 1);
        cell.clear_calls();
        assert!(cell.calls().is_empty());
    }

    #[test]
    fn test_scene_calls_recorded() {
        let cell = SimulatedCell::new();
        cell.focus_bin(&"bin_A".into());
        cell.attach("glue_0", ArmId::Left);
        assert_eq!(cell.ops(), vec![SimOp::FocusBin, SimOp::Attach]);
        assert!(cell.calls()[1].detail.contains("left_ee_link"));
    }
}
