use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 1024;

/// Domain events emitted for gamification/notification/audit fan-out.
///
/// Delivery is fire-and-forget: a failed or absent subscriber never affects
/// the operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ProgressEvent {
    #[serde(rename = "ATTEMPT_RECORDED")]
    AttemptRecorded(AttemptRecordedPayload),

    #[serde(rename = "MASTERY_UPDATED")]
    MasteryUpdated(MasteryUpdatedPayload),

    #[serde(rename = "SESSION_STARTED")]
    SessionStarted(SessionStartedPayload),

    #[serde(rename = "SESSION_COMPLETED")]
    SessionCompleted(SessionCompletedPayload),

    #[serde(rename = "SESSION_ABANDONED")]
    SessionAbandoned(SessionAbandonedPayload),

    #[serde(rename = "PATH_GENERATED")]
    PathGenerated(PathGeneratedPayload),
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::AttemptRecorded(_) => "ATTEMPT_RECORDED",
            ProgressEvent::MasteryUpdated(_) => "MASTERY_UPDATED",
            ProgressEvent::SessionStarted(_) => "SESSION_STARTED",
            ProgressEvent::SessionCompleted(_) => "SESSION_COMPLETED",
            ProgressEvent::SessionAbandoned(_) => "SESSION_ABANDONED",
            ProgressEvent::PathGenerated(_) => "PATH_GENERATED",
        }
    }

    pub fn learner_id(&self) -> &str {
        match self {
            ProgressEvent::AttemptRecorded(p) => &p.learner_id,
            ProgressEvent::MasteryUpdated(p) => &p.learner_id,
            ProgressEvent::SessionStarted(p) => &p.learner_id,
            ProgressEvent::SessionCompleted(p) => &p.learner_id,
            ProgressEvent::SessionAbandoned(p) => &p.learner_id,
            ProgressEvent::PathGenerated(p) => &p.learner_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecordedPayload {
    pub learner_id: String,
    pub session_id: String,
    pub item_id: String,
    pub score: f64,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryUpdatedPayload {
    pub learner_id: String,
    pub skill_id: String,
    pub outcome: f64,
    pub new_mastery_estimate: f64,
    pub next_due_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartedPayload {
    pub learner_id: String,
    pub session_id: String,
    pub queue_len: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompletedPayload {
    pub learner_id: String,
    pub session_id: String,
    pub items_completed: u32,
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAbandonedPayload {
    pub learner_id: String,
    pub session_id: String,
    pub idle_secs: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathGeneratedPayload {
    pub learner_id: String,
    pub path_id: String,
    pub entry_count: usize,
    pub snapshot_version: u64,
    pub timestamp: DateTime<Utc>,
}

/// Event sink collaborator. Implementations own retry/reconciliation;
/// `publish` must not fail the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ProgressEvent);
}

/// In-process sink over a tokio broadcast channel. Lagging or absent
/// receivers drop events silently.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: ProgressEvent) {
        let event_type = event.event_type();
        let learner_id = event.learner_id().to_string();
        if self.sender.send(event).is_err() {
            debug!(event_type, "no subscribers for event");
        } else {
            debug!(event_type, learner_id = %learner_id, "event published");
        }
    }
}

/// Sink that swallows everything. Useful in tests and batch recomputation.
#[derive(Debug, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscriber() {
        let sink = BroadcastEventSink::new();
        let mut receiver = sink.subscribe();

        sink.publish(ProgressEvent::MasteryUpdated(MasteryUpdatedPayload {
            learner_id: "learner-1".to_string(),
            skill_id: "algebra".to_string(),
            outcome: 1.0,
            new_mastery_estimate: 0.42,
            next_due_at: Utc::now(),
            timestamp: Utc::now(),
        }))
        .await;

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "MASTERY_UPDATED");
        assert_eq!(event.learner_id(), "learner-1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let sink = BroadcastEventSink::new();
        sink.publish(ProgressEvent::SessionStarted(SessionStartedPayload {
            learner_id: "learner-1".to_string(),
            session_id: "session-1".to_string(),
            queue_len: 3,
            timestamp: Utc::now(),
        }))
        .await;
        assert_eq!(sink.receiver_count(), 0);
    }

    #[test]
    fn event_serializes_with_tagged_payload() {
        let event = ProgressEvent::SessionAbandoned(SessionAbandonedPayload {
            learner_id: "learner-1".to_string(),
            session_id: "session-1".to_string(),
            idle_secs: 3600,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SESSION_ABANDONED");
        assert_eq!(json["payload"]["learnerId"], "learner-1");
    }
}
