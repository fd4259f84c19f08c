use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Security and moderation events worth keeping outside the regular logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    ParticipantKicked {
        session_id: Uuid,
        participant_id: Uuid,
        nickname: String,
    },
    ParticipantBanned {
        session_id: Uuid,
        participant_id: Uuid,
        nickname: String,
    },
    ParticipantReinstated {
        session_id: Uuid,
        participant_id: Uuid,
        nickname: String,
    },
    /// A banned nickname tried to join again.
    RejoinRefused { session_id: Uuid, nickname: String },
    /// Scoring math failed and a fallback breakdown was used.
    ScoringFailure {
        session_id: Uuid,
        participant_id: Uuid,
        question_id: Uuid,
        answer_id: String,
        error: String,
    },
}

/// Fire-and-forget sink for [`AuditEvent`]s.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => match event {
                AuditEvent::ScoringFailure { .. } | AuditEvent::RejoinRefused { .. } => {
                    warn!(target: "audit", %payload, "audit event")
                }
                _ => info!(target: "audit", %payload, "audit event"),
            },
            Err(err) => warn!(target: "audit", error = %err, "failed to encode audit event"),
        }
    }
}

/// Keeps audit events in memory; handy for inspection in tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let session_id = Uuid::new_v4();
        sink.record(AuditEvent::RejoinRefused {
            session_id,
            nickname: "troll".into(),
        });
        sink.record(AuditEvent::ParticipantKicked {
            session_id,
            participant_id: Uuid::new_v4(),
            nickname: "other".into(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AuditEvent::RejoinRefused { .. }));
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let json = serde_json::to_value(AuditEvent::RejoinRefused {
            session_id: Uuid::nil(),
            nickname: "x".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "rejoin_refused");
    }
}
