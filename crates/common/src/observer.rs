//! Failure reporting.
//!
//! Components never propagate runtime failures across their boundaries;
//! they describe them as an [`Incident`] and hand it to an [`Observer`].

use std::{fmt, sync::Mutex};

use {
    serde::Serialize,
    tracing::{error, warn},
};

use crate::types::Topic;

/// A runtime failure that was contained instead of propagated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Incident {
    /// A bus handler returned an error.
    HandlerFailed {
        topic: Topic,
        handler: String,
        error: String,
    },
    /// A bus handler panicked.
    HandlerPanicked { topic: Topic, handler: String },
    ChannelStartFailed { channel: String, error: String },
    ChannelStopFailed { channel: String, error: String },
    SendFailed {
        channel: String,
        chat_id: String,
        error: String,
    },
    /// An outbound message named a channel that is not registered.
    Unroutable { channel: String, chat_id: String },
    /// An inbound message was dropped before reaching the bus.
    InboundRejected { channel: String, reason: String },
    CompletionCallbackFailed { task_id: String, error: String },
    ServiceFailed {
        service: String,
        action: String,
        error: String,
    },
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlerFailed {
                topic,
                handler,
                error,
            } => write!(f, "handler {handler} failed on {topic}: {error}"),
            Self::HandlerPanicked { topic, handler } => {
                write!(f, "handler {handler} panicked on {topic}")
            },
            Self::ChannelStartFailed { channel, error } => {
                write!(f, "channel {channel} failed to start: {error}")
            },
            Self::ChannelStopFailed { channel, error } => {
                write!(f, "channel {channel} failed to stop: {error}")
            },
            Self::SendFailed {
                channel,
                chat_id,
                error,
            } => write!(f, "send to {channel}:{chat_id} failed: {error}"),
            Self::Unroutable { channel, chat_id } => {
                write!(f, "no channel named {channel} for chat {chat_id}")
            },
            Self::InboundRejected { channel, reason } => {
                write!(f, "inbound message on {channel} rejected: {reason}")
            },
            Self::CompletionCallbackFailed { task_id, error } => {
                write!(f, "completion callback for task {task_id} failed: {error}")
            },
            Self::ServiceFailed {
                service,
                action,
                error,
            } => write!(f, "service {service} failed to {action}: {error}"),
        }
    }
}

/// Receives incidents. Implementations must not block.
pub trait Observer: Send + Sync {
    fn observe(&self, incident: Incident);
}

/// Default observer: emits each incident as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, incident: Incident) {
        match &incident {
            Incident::HandlerPanicked { topic, handler } => {
                error!(topic = %topic, handler = %handler, "bus handler panicked");
            },
            Incident::CompletionCallbackFailed { task_id, error } => {
                error!(task_id = %task_id, error = %error, "sub-agent completion callback failed");
            },
            Incident::Unroutable { channel, chat_id } => {
                warn!(channel = %channel, chat_id = %chat_id, "dropping outbound message for unknown channel");
            },
            Incident::InboundRejected { channel, reason } => {
                warn!(channel = %channel, reason = %reason, "inbound message rejected");
            },
            other => warn!("{other}"),
        }
    }
}

/// Observer that keeps every incident in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    incidents: Mutex<Vec<Incident>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything observed so far.
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, incident: Incident) {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(incident);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.observe(Incident::Unroutable {
            channel: "nowhere".into(),
            chat_id: "1".into(),
        });
        observer.observe(Incident::ChannelStartFailed {
            channel: "telegram".into(),
            error: "token expired".into(),
        });
        let seen = observer.incidents();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], Incident::Unroutable { .. }));
        assert_eq!(
            seen[1].to_string(),
            "channel telegram failed to start: token expired"
        );
    }

    #[test]
    fn incident_serializes_with_kind() {
        let json = serde_json::to_value(Incident::HandlerPanicked {
            topic: Topic::Inbound,
            handler: "adapter".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "handler_panicked");
        assert_eq!(json["topic"], "message:inbound");
    }
}
