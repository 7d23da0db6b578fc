//! The pick sequencer: drives one work order through the thirteen pick steps.
//!
//! The orchestrator is the only writer of the shelf. It consults the
//! execution gate at the start of every gated unit (a checkpointed step plus
//! any steps it falls through into), calls the collaborators for each step,
//! and aborts the order on the first failure.

mod runner;
mod steps;


pub use runner::{RunSummary, run_queue};
pub use steps::{PickStep, STEP_TABLE, StepContext, StepSpec, choose_arm, resolve_jump};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::PickConfig;
use crate::control::{ExecutionGate, WaitKind, WaitOutcome};
use crate::error::{PickError, PickResult};
use crate::pose::PoseValidator;
use crate::queue::WorkOrder;
use crate::services::{ArmId, Collaborators, LiftDirection, MoveTarget};
use crate::shelf::{Shelf, ShelfSnapshot};
use crate::status::{PickEvent, StatusPublisher};

/// How an order ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    Completed,
    /// Shutdown arrived while waiting at a checkpoint.
    Cancelled,
}

fn failed(step: PickStep, context: &'static str) -> impl FnOnce(anyhow::Error) -> PickError {
    move |e| PickError::step(step, format!("{}: {:#}", context, e))
}

async fn dwell(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Sequencer for pick orders against one shelf.
pub struct PickOrchestrator {
    shelf: Shelf,
    config: PickConfig,
    gate: Arc<ExecutionGate>,
    services: Collaborators,
    status: StatusPublisher,
    validator: PoseValidator,
}

impl PickOrchestrator {
    pub fn new(
        shelf: Shelf,
        config: PickConfig,
        gate: Arc<ExecutionGate>,
        services: Collaborators,
        status: StatusPublisher,
    ) -> Self {
        let validator = PoseValidator::new(config.pose_tolerance);
        Self {
            shelf,
            config,
            gate,
            services,
            status,
            validator,
        }
    }

    pub fn shelf(&self) -> &Shelf {
        &self.shelf
    }

    pub fn snapshot(&self) -> ShelfSnapshot {
        self.shelf.snapshot()
    }

    pub fn config(&self) -> &PickConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<ExecutionGate> {
        &self.gate
    }

    pub fn status(&self) -> &StatusPublisher {
        &self.status
    }

    /// Run one order, starting at step `jump_to` (0 for a fresh order).
    ///
    /// Returns `Ok(Cancelled)` if shutdown arrives at a checkpoint. Any step
    /// failure aborts the order and is returned as `PickError::StepFailed`.
    pub async fn run_order(
        &mut self,
        order: &WorkOrder,
        jump_to: usize,
    ) -> PickResult<OrderOutcome> {
        let collision_name = match self.shelf.resolve(&order.bin, &order.product) {
            Ok(product) => product.collision_name(),
            Err(e) => {
                error!("{}", e);
                self.publish_finished(order, false);
                return Err(e);
            }
        };

        let mut ctx = StepContext::starting_at(resolve_jump(jump_to));
        let mut first_unit = true;
        info!("Starting order: {}", order);

        while let Some(step) = PickStep::from_index(ctx.step) {
            if step.spec().checkpointed || first_unit {
                let kind = if self.config.is_breakpoint(step) {
                    WaitKind::FullStep
                } else {
                    WaitKind::Step
                };
                let caption = format!("run step {}", step);
                if self.gate.wait_for_release(kind, &caption).await == WaitOutcome::Cancelled {
                    warn!("Order {} cancelled before step {}", order, step);
                    return Ok(OrderOutcome::Cancelled);
                }
            }
            first_unit = false;

            let mut current = step;
            loop {
                if let Err(e) = self.run_step(current, order, &collision_name, &mut ctx).await {
                    error!("{}", e);
                    self.status.publish(PickEvent::StepFailed {
                        step: current,
                        reason: e.to_string(),
                    });
                    self.publish_finished(order, false);
                    return Err(e);
                }
                match current.next() {
                    Some(next) if current.spec().falls_through => current = next,
                    _ => break,
                }
            }
            ctx.step = current.index() + 1;
        }

        info!("Pick sequence end reached for {}", order);
        self.publish_finished(order, true);
        Ok(OrderOutcome::Completed)
    }

    fn publish_finished(&self, order: &WorkOrder, success: bool) {
        self.status.publish(PickEvent::OrderFinished {
            order: order.clone(),
            success,
        });
    }

    fn narrate(&self, step: PickStep, caption: String) {
        info!("Step {}: {}", step.index(), caption);
        self.status.publish(PickEvent::StepStarted { step, caption });
    }

    /// Arm chosen at step 3, or the right arm when the order was resumed past it.
    fn arm(&self, ctx: &StepContext) -> ArmId {
        ctx.arm.unwrap_or_else(|| {
            warn!("No arm chosen for this order, using {}", ArmId::Right);
            ArmId::Right
        })
    }

    async fn run_step(
        &mut self,
        step: PickStep,
        order: &WorkOrder,
        collision_name: &str,
        ctx: &mut StepContext,
    ) -> PickResult<()> {
        ctx.step = step.index();
        let speed = self.config.main_velocity_scaling_factor;

        match step {
            PickStep::MoveHome => {
                self.narrate(step, "Moving to initial position".to_string());
                self.services.scene.collision_wall();
                if self.config.skip_homing_step {
                    debug!("Homing skipped");
                } else {
                    self.move_to_start()
                        .await
                        .map_err(failed(step, "Unable to move to initial position"))?;
                }
            }
            PickStep::OpenEndEffectors => {
                self.narrate(step, "Open end effectors".to_string());
                for arm in self.config.arms() {
                    self.services
                        .end_effector
                        .set_open(true, arm)
                        .await
                        .map_err(failed(step, "Unable to open end effectors"))?;
                }
            }
            PickStep::LocateObject => {
                self.narrate(
                    step,
                    format!("Finding location of product {} from {}", order.product, order.bin),
                );
                self.locate_object(step, order, collision_name, ctx).await?;
            }
            PickStep::ChooseGrasp => {
                self.narrate(
                    step,
                    format!("Get grasp for product {} from {}", order.product, order.bin),
                );
                let global = ctx.global_object_pose.ok_or_else(|| {
                    PickError::step(step, "Object pose unknown; the product must be located first")
                })?;

                let arm = choose_arm(self.config.dual_arm, &global);
                ctx.arm = Some(arm);
                self.status.publish(PickEvent::ArmChosen { arm });
                self.services.scene.allow_finger_contact(collision_name, arm);

                let grasps = self
                    .services
                    .grasps
                    .generate_grasps(&global, arm)
                    .await
                    .map_err(failed(step, "Grasp generation failed"))?;
                let chosen = grasps
                    .into_iter()
                    .next()
                    .ok_or_else(|| PickError::step(step, "No grasps found"))?;
                debug!(score = chosen.score, "Grasp chosen");
                ctx.grasp = Some(chosen);
            }
            PickStep::PlanApproach => {
                self.narrate(step, "Get pre-grasp from the approach path".to_string());
                let arm = self.arm(ctx);
                let grasp_state = ctx
                    .grasp_state()
                    .cloned()
                    .ok_or_else(|| PickError::step(step, "No grasp chosen for this order"))?;

                let current = self
                    .services
                    .motion
                    .current_state()
                    .await
                    .map_err(failed(step, "Unable to read robot state"))?;
                let plan = self
                    .services
                    .motion
                    .plan_approach(
                        arm,
                        &current,
                        &grasp_state,
                        self.config.approach_distance_desired,
                    )
                    .await
                    .map_err(failed(step, "Unable to generate straight approach path"))?;
                ctx.approach = Some(plan);
            }
            PickStep::Reserved => {}
            PickStep::MoveToPreGrasp => {
                self.narrate(step, "Moving to pre-grasp position".to_string());
                let arm = self.arm(ctx);
                let pre_grasp = ctx
                    .pre_grasp_state()
                    .cloned()
                    .ok_or_else(|| PickError::step(step, "No approach planned for this order"))?;

                self.services.scene.collision_wall();
                self.services
                    .motion
                    .move_to(&MoveTarget::State(pre_grasp), Some(arm), speed)
                    .await
                    .map_err(failed(step, "Unable to plan to pre-grasp position"))?;
            }
            PickStep::ApproachGrasp => {
                self.narrate(step, "Cartesian move to the grasp position".to_string());
                let approach = ctx
                    .approach
                    .as_ref()
                    .ok_or_else(|| PickError::step(step, "No approach planned for this order"))?;

                self.services.scene.focus_bin(&order.bin);
                self.services
                    .motion
                    .execute_trajectory(&approach.trajectory)
                    .await
                    .map_err(failed(step, "Failed to move to the grasp position"))?;

                info!("Waiting {:?} before grasping", self.config.wait_before_grasp());
                dwell(self.config.wait_before_grasp()).await;
            }
            PickStep::CloseGripper => {
                self.narrate(step, "Grasping".to_string());
                let arm = self.arm(ctx);
                self.services
                    .end_effector
                    .set_open(false, arm)
                    .await
                    .map_err(failed(step, "Unable to close end effector"))?;
                self.services.scene.attach(collision_name, arm);

                info!("Waiting {:?} after grasping", self.config.wait_after_grasp());
                dwell(self.config.wait_after_grasp()).await;
            }
            PickStep::Lift => {
                self.narrate(step, "Lifting product up slightly".to_string());
                let arm = self.arm(ctx);
                self.services.scene.clear_collision_objects();
                self.services
                    .motion
                    .lift_along(arm, self.config.lift_distance_desired, LiftDirection::Up)
                    .await
                    .map_err(failed(step, "Unable to lift product"))?;
            }
            PickStep::Retreat => {
                self.narrate(
                    step,
                    "Moving back to pre-grasp position (retreat path)".to_string(),
                );
                let retreat = ctx
                    .approach
                    .as_ref()
                    .map(|a| a.trajectory.reversed())
                    .ok_or_else(|| PickError::step(step, "No approach planned for this order"))?;
                self.services
                    .motion
                    .execute_trajectory(&retreat)
                    .await
                    .map_err(failed(step, "Unable to execute retreat path"))?;
            }
            PickStep::PlaceInGoalBin => {
                self.narrate(step, "Placing product in goal bin".to_string());
                let arm = self.arm(ctx);
                self.services.scene.collision_wall();
                let dropoff = MoveTarget::Named(self.config.dropoff_pose(arm).clone());
                self.services
                    .motion
                    .move_to(&dropoff, Some(arm), speed)
                    .await
                    .map_err(failed(step, "Unable to plan to goal bin"))?;
                self.services
                    .motion
                    .lift_along(
                        arm,
                        self.config.place_goal_down_distance_desired,
                        LiftDirection::Down,
                    )
                    .await
                    .map_err(failed(step, "Failed to lower product into goal bin"))?;
            }
            PickStep::Release => {
                self.narrate(step, "Releasing product".to_string());
                let arm = self.arm(ctx);
                self.services
                    .end_effector
                    .set_open(true, arm)
                    .await
                    .map_err(failed(step, "Unable to open end effector"))?;

                if self.shelf.remove_product(&order.bin, &order.product).is_none() {
                    warn!("{} was already gone from {}", order.product, order.bin);
                }
                self.services.scene.detach(collision_name, arm);
                self.services.scene.remove(collision_name);
                self.status.publish(PickEvent::ShelfUpdated(self.shelf.snapshot()));
            }
        }

        Ok(())
    }

    async fn locate_object(
        &mut self,
        step: PickStep,
        order: &WorkOrder,
        collision_name: &str,
        ctx: &mut StepContext,
    ) -> PickResult<()> {
        self.services.scene.focus_bin(&order.bin);

        let expected = self
            .shelf
            .bin(&order.bin)
            .map(|b| b.product_names())
            .unwrap_or_default();
        let timeout = self.config.perception_timeout();

        let result = tokio::time::timeout(
            timeout,
            self.services
                .perception
                .find_object(&order.product, &expected, &order.bin, timeout),
        )
        .await
        .map_err(|_| {
            PickError::step(
                step,
                format!("Perception did not finish within {:?}", timeout),
            )
        })?
        .map_err(failed(step, "Unable to get object pose"))?;

        let validated = {
            let bin = self
                .shelf
                .bin(&order.bin)
                .ok_or_else(|| PickError::step(step, format!("Unknown bin {}", order.bin)))?;
            self.validator
                .validate(&order.product, bin, self.shelf.pose(), &result.local_pose)
                .map_err(|e| PickError::step(step, e))?
        };

        if let Some(product) = self
            .shelf
            .bin_mut(&order.bin)
            .and_then(|b| b.product_mut(&order.product))
        {
            product.set_local_pose(validated.local);
            match &result.mesh {
                Some(mesh) if !mesh.is_empty() => product.set_mesh(mesh.clone()),
                _ => warn!("No bounding mesh returned for {}", order.product),
            }
        }

        let mesh = result.mesh.as_ref().filter(|m| !m.is_empty());
        self.services
            .scene
            .add_object(collision_name, &validated.global, mesh);

        ctx.global_object_pose = Some(validated.global);
        self.status.publish(PickEvent::ShelfUpdated(self.shelf.snapshot()));
        Ok(())
    }

    /// Move to the configured start pose with every arm.
    pub async fn move_to_start(&self) -> anyhow::Result<()> {
        let arm = if self.config.dual_arm {
            None
        } else {
            Some(ArmId::Right)
        };
        self.services
            .motion
            .move_to(
                &MoveTarget::Named(self.config.start_pose.clone()),
                arm,
                self.config.main_velocity_scaling_factor,
            )
            .await
    }

    /// Alternate close and open on every arm, `cycles` times.
    ///
    /// Stops early, without error, on shutdown.
    pub async fn test_end_effectors(&self, cycles: usize) -> anyhow::Result<usize> {
        let mut done = 0;
        for i in 0..cycles {
            if self.gate.is_shut_down() {
                break;
            }
            let open = i % 2 == 1;
            info!("{} end effectors", if open { "Opening" } else { "Closing" });
            for arm in self.config.arms() {
                self.services.end_effector.set_open(open, arm).await?;
            }
            done += 1;
            dwell(self.config.wait_after_grasp()).await;
        }
        Ok(done)
    }
}
