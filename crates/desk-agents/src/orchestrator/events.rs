//! Live run events.
//!
//! Every phase transition and stage metric is published on a broadcast
//! channel as it is recorded, so callers can follow a run while it is still
//! being driven. Publishing never blocks and succeeds with no subscribers;
//! a subscriber that falls behind sees `RecvError::Lagged`.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::phase::PhaseRecord;
use crate::telemetry::StageMetric;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Phase { run_id: Uuid, record: PhaseRecord },
    Stage { run_id: Uuid, metric: StageMetric },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Phase { run_id, .. } | Self::Stage { run_id, .. } => *run_id,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            Self::Phase { .. } => "phase",
            Self::Stage { .. } => "stage",
        }
    }
}

/// Broadcast fan-out of run events, shared by every run of an orchestrator.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: RunEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "run event published"),
            Err(_) => debug!(event_type, "run event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::phase::RunPhase;
    use desk_coordination::StageId;

    fn phase(to: RunPhase) -> RunEvent {
        RunEvent::Phase {
            run_id: Uuid::nil(),
            record: PhaseRecord {
                from: None,
                to,
                elapsed_ms: 0,
            },
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(phase(RunPhase::Pending(StageId::Trader)));
    }

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(phase(RunPhase::Pending(StageId::Trader)));
        bus.publish(phase(RunPhase::Running(StageId::Trader)));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(matches!(first, RunEvent::Phase { record, .. } if record.to == RunPhase::Pending(StageId::Trader)));
        assert!(matches!(second, RunEvent::Phase { record, .. } if record.to == RunPhase::Running(StageId::Trader)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_value(phase(RunPhase::Terminal)).unwrap();
        assert_eq!(json["event"], "phase");
        assert_eq!(json["run_id"], Uuid::nil().to_string());
    }
}
