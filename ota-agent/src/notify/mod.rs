//! User-facing lifecycle notifications.
//!
//! The orchestrator publishes events through an [`EventSink`] and never
//! waits on delivery. The daemon wires a [`BroadcastSink`] that fans events
//! out to WebSocket subscribers of the local API.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::manifest::{Manifest, Severity};

/// Maximum number of queued events per subscriber
const BROADCAST_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UpdateAvailable,
    UpdateScheduled,
    UpdateInProgress,
    UpdateCompleted,
    UpdateFailed,
    RollbackAvailable,
    RollbackCompleted,
    RollbackFailed,
}

impl EventKind {
    /// Terminal outcomes of an install or rollback run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::UpdateCompleted
                | EventKind::UpdateFailed
                | EventKind::RollbackCompleted
                | EventKind::RollbackFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    pub created_at: DateTime<Local>,
}

impl NotificationEvent {
    fn new(kind: EventKind, version: &str) -> Self {
        Self {
            kind,
            version: version.to_string(),
            severity: None,
            progress: None,
            success: None,
            message: None,
            release_notes: None,
            features: None,
            size_mb: None,
            scheduled_time: None,
            from_version: None,
            created_at: Local::now(),
        }
    }

    pub fn update_available(manifest: &Manifest) -> Self {
        Self {
            severity: Some(manifest.severity),
            release_notes: manifest.release_notes.clone(),
            features: manifest.features.clone(),
            size_mb: Some(manifest.total_size_bytes() as f64 / (1024.0 * 1024.0)),
            ..Self::new(EventKind::UpdateAvailable, &manifest.version)
        }
    }

    pub fn update_scheduled(version: &str, scheduled_time: &str) -> Self {
        Self {
            scheduled_time: Some(scheduled_time.to_string()),
            ..Self::new(EventKind::UpdateScheduled, version)
        }
    }

    pub fn update_in_progress(version: &str, progress: u8) -> Self {
        Self {
            progress: Some(progress.min(100)),
            ..Self::new(EventKind::UpdateInProgress, version)
        }
    }

    pub fn update_result(version: &str, success: bool, message: &str) -> Self {
        let kind = if success {
            EventKind::UpdateCompleted
        } else {
            EventKind::UpdateFailed
        };
        Self {
            success: Some(success),
            message: Some(message.to_string()),
            ..Self::new(kind, version)
        }
    }

    /// `version` is the version a rollback would restore.
    pub fn rollback_available(from_version: &str, version: &str) -> Self {
        Self {
            from_version: Some(from_version.to_string()),
            ..Self::new(EventKind::RollbackAvailable, version)
        }
    }

    pub fn rollback_result(version: &str, success: bool, message: &str) -> Self {
        let kind = if success {
            EventKind::RollbackCompleted
        } else {
            EventKind::RollbackFailed
        };
        Self {
            success: Some(success),
            message: Some(message.to_string()),
            ..Self::new(kind, version)
        }
    }
}

/// Destination for notifications. Publishing must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: NotificationEvent);
}

/// Fans events out to every current subscriber; succeeds with none.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<NotificationEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events (for new WebSocket connections)
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: NotificationEvent) {
        let kind = event.kind;
        match self.tx.send(event) {
            Ok(count) => debug!("Published {:?} to {} subscriber(s)", kind, count),
            Err(_) => debug!("Published {:?} with no subscribers", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let sink = BroadcastSink::new();
        sink.publish(NotificationEvent::update_in_progress("1.1.0", 30));
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();

        sink.publish(NotificationEvent::update_result("1.1.0", false, "Checksum mismatch"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::UpdateFailed);
        assert_eq!(event.success, Some(false));
        assert!(event.kind.is_terminal());
    }

    #[test]
    fn test_wire_shape() {
        let manifest = Manifest::from_slice(
            br#"{"version": "1.1.0", "release_date": "2024-05-01", "severity": "critical",
                 "files": [{"path": "a", "destination": "/opt/a", "size_bytes": 1048576}]}"#,
        )
        .unwrap();
        let json = serde_json::to_value(NotificationEvent::update_available(&manifest)).unwrap();

        assert_eq!(json["type"], "update_available");
        assert_eq!(json["version"], "1.1.0");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["size_mb"], 1.0);
        assert!(json.get("progress").is_none());
        assert!(json.get("created_at").is_some());
    }

    #[test]
    fn test_progress_clamped() {
        let event = NotificationEvent::update_in_progress("1.1.0", 250);
        assert_eq!(event.progress, Some(100));
    }
}
