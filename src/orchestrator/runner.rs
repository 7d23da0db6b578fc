//! Queue driver: feeds work orders to the orchestrator one at a time.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{OrderOutcome, PickOrchestrator};
use crate::config::FailurePolicy;
use crate::queue::WorkOrderQueue;
use crate::status::PickEvent;

/// What happened during one run over the queue.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Orders never started because the run stopped early
    pub skipped: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when every queued order was picked.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled && self.skipped == 0
    }
}

/// Process `queue` front to back.
///
/// `jump_to` applies to the first order only. With `FailurePolicy::Halt` the
/// run stops at the first failed order.
pub async fn run_queue(
    orchestrator: &mut PickOrchestrator,
    mut queue: WorkOrderQueue,
    jump_to: usize,
    policy: FailurePolicy,
) -> RunSummary {
    let run_id = Uuid::new_v4();
    let start = Instant::now();
    let mut completed = 0;
    let mut failed = 0;
    let mut cancelled = false;
    let mut jump = jump_to;

    info!(
        "Starting run {} with {} of {} orders",
        run_id,
        queue.remaining(),
        queue.total()
    );

    while let Some((index, order)) = queue.next() {
        orchestrator.status().publish(PickEvent::OrderStarted {
            index,
            order: order.clone(),
        });

        match orchestrator.run_order(&order, jump).await {
            Ok(OrderOutcome::Completed) => {
                completed += 1;
                info!("Order {} complete: {}", index, order);
            }
            Ok(OrderOutcome::Cancelled) => {
                cancelled = true;
                warn!("Run cancelled during order {}", index);
                break;
            }
            Err(e) => {
                failed += 1;
                error!("Order {} ({}) failed: {}", index, order, e);
                if policy == FailurePolicy::Halt {
                    error!("Halting run; the cell needs inspection before continuing");
                    break;
                }
            }
        }
        jump = 0;
    }

    let summary = RunSummary {
        run_id,
        completed,
        failed,
        cancelled,
        skipped: queue.remaining(),
        elapsed: start.elapsed(),
    };

    info!(
        completed = summary.completed,
        failed = summary.failed,
        cancelled = summary.cancelled,
        skipped = summary.skipped,
        "Finished run {} in {:.1}s",
        run_id,
        summary.elapsed.as_secs_f64()
    );
    orchestrator.status().publish(PickEvent::RunFinished {
        run_id,
        completed,
        failed,
        cancelled,
    });

    summary
}
