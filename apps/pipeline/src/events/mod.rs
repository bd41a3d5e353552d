//! Event bus for progress, completion and notification fan-out.
//!
//! Publishing is best-effort: events go to a tokio broadcast channel and are
//! dropped when nobody listens. The process forwards every event to the Redis
//! channel [`REDIS_CHANNEL`], where the WebSocket gateway picks them up.
//! Events are never persisted here.
//!
//! Wire shape: `{"type": "resume.progress", "data": {...}, "timestamp": "..."}`.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::resume::ResumeStatus;

pub const REDIS_CHANNEL: &str = "pipeline:events";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EventKind {
    #[serde(rename = "resume.progress")]
    ResumeProgress {
        resume_id: Uuid,
        uploader_id: Uuid,
        status: ResumeStatus,
        progress: i32,
        current_step: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "resume.completed")]
    ResumeCompleted {
        resume_id: Uuid,
        uploader_id: Uuid,
        candidate_id: Option<Uuid>,
        warnings: Vec<String>,
    },

    #[serde(rename = "candidate.added")]
    CandidateAdded {
        candidate_id: Uuid,
        resume_id: Uuid,
        owner_recruiter_id: Option<Uuid>,
        name: Option<String>,
    },

    #[serde(rename = "match.found")]
    MatchFound {
        match_id: Uuid,
        candidate_id: Uuid,
        job_id: Uuid,
        overall_score: f64,
    },

    #[serde(rename = "bulk.completed")]
    BulkCompleted {
        batch_id: Uuid,
        uploader_id: Uuid,
        total_files: i32,
        successful_files: i32,
        failed_files: i32,
    },

    #[serde(rename = "drive.sync.completed")]
    DriveSyncCompleted {
        sync_id: Uuid,
        folder_id: String,
        owner_id: Uuid,
        files_found: i32,
        files_ingested: i32,
        files_skipped: i32,
        files_failed: i32,
        error: Option<String>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::ResumeProgress { .. } => "resume.progress",
            EventKind::ResumeCompleted { .. } => "resume.completed",
            EventKind::CandidateAdded { .. } => "candidate.added",
            EventKind::MatchFound { .. } => "match.found",
            EventKind::BulkCompleted { .. } => "bulk.completed",
            EventKind::DriveSyncCompleted { .. } => "drive.sync.completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes to every current subscriber. Silently dropped when there are none.
    pub fn publish(&self, kind: EventKind) {
        let event = PipelineEvent::new(kind);
        debug!(
            event_type = event.kind.event_type(),
            subscriber_count = self.tx.receiver_count(),
            "EventBus publish"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

/// Relays bus events to the Redis pub/sub channel, in bus order, until the
/// bus is dropped.
pub async fn forward_to_redis(
    mut rx: broadcast::Receiver<PipelineEvent>,
    mut conn: redis::aio::MultiplexedConnection,
) {
    info!("Forwarding pipeline events to redis channel '{REDIS_CHANNEL}'");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event forwarder lagged; events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize event: {e}");
                continue;
            }
        };

        if let Err(e) = conn.publish::<_, _, i64>(REDIS_CHANNEL, payload).await {
            warn!(
                event_type = event.kind.event_type(),
                "Failed to publish event to redis: {e}"
            );
        }
    }
    info!("Event bus closed; forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_event_wire_shape() {
        let resume_id = Uuid::new_v4();
        let uploader_id = Uuid::new_v4();
        let event = PipelineEvent::new(EventKind::ResumeProgress {
            resume_id,
            uploader_id,
            status: ResumeStatus::Processing,
            progress: 10,
            current_step: "Extracting text".to_string(),
            error: None,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "resume.progress");
        assert_eq!(value["data"]["resume_id"], json!(resume_id));
        assert_eq!(value["data"]["status"], "processing");
        assert_eq!(value["data"]["progress"], 10);
        assert_eq!(value["data"]["current_step"], "Extracting text");
        assert!(value["data"].get("error").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let kind = EventKind::DriveSyncCompleted {
            sync_id: Uuid::new_v4(),
            folder_id: "folder".to_string(),
            owner_id: Uuid::new_v4(),
            files_found: 3,
            files_ingested: 2,
            files_skipped: 1,
            files_failed: 0,
            error: None,
        };
        let value = serde_json::to_value(PipelineEvent::new(kind.clone())).unwrap();
        assert_eq!(value["type"], kind.event_type());
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let resume_id = Uuid::new_v4();
        for progress in [10, 60, 80] {
            bus.publish(EventKind::ResumeProgress {
                resume_id,
                uploader_id: Uuid::new_v4(),
                status: ResumeStatus::Processing,
                progress,
                current_step: "step".to_string(),
                error: None,
            });
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let EventKind::ResumeProgress { progress, .. } = rx.recv().await.unwrap().kind {
                seen.push(progress);
            }
        }
        assert_eq!(seen, vec![10, 60, 80]);
    }

    #[test]
    fn test_publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new(4);
        bus.publish(EventKind::MatchFound {
            match_id: Uuid::new_v4(),
            candidate_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            overall_score: 72.5,
        });
    }
}
