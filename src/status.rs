//! Status narration for dashboards.
//!
//! The orchestrator publishes `PickEvent`s on a broadcast channel. Nothing
//! downstream ever sees the live shelf, only `ShelfSnapshot` copies.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::orchestrator::PickStep;
use crate::queue::WorkOrder;
use crate::services::ArmId;
use crate::shelf::ShelfSnapshot;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PickEvent {
    OrderStarted {
        index: usize,
        order: WorkOrder,
    },
    StepStarted {
        step: PickStep,
        caption: String,
    },
    ArmChosen {
        arm: ArmId,
    },
    StepFailed {
        step: PickStep,
        reason: String,
    },
    OrderFinished {
        order: WorkOrder,
        success: bool,
    },
    ShelfUpdated(ShelfSnapshot),
    RunFinished {
        run_id: Uuid,
        completed: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Sending half of the status channel. Publishing never blocks and never
/// fails; events are dropped when nobody is subscribed.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    sender: broadcast::Sender<PickEvent>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PickEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PickEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let status = StatusPublisher::new();
        let mut rx = status.subscribe();

        status.publish(PickEvent::StepStarted {
            step: PickStep::LocateObject,
            caption: "find object".to_string(),
        });

        match rx.recv().await.unwrap() {
            PickEvent::StepStarted { step, .. } => assert_eq!(step, PickStep::LocateObject),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let status = StatusPublisher::new();
        status.publish(PickEvent::ArmChosen { arm: ArmId::Left });
    }

    #[test]
    fn test_event_json_shape() {
        let event = PickEvent::OrderFinished {
            order: WorkOrder::new("bin_A", "glue"),
            success: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "order_finished");
        assert_eq!(json["order"]["bin"], "bin_A");
    }
}
