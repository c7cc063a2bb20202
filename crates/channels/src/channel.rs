use std::{fmt, sync::Arc};

use {
    anyhow::Result,
    async_trait::async_trait,
    courier_bus::{Dispatch, EventBus},
    courier_common::{InboundMessage, Incident, OutboundMessage},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{Error, gating};

/// A messaging transport (Telegram, Slack, a CLI, ...).
///
/// Channels hand inbound traffic to an [`InboundPublisher`] and receive
/// outbound traffic through [`send`](Self::send). Implementations use interior
/// mutability; the manager shares them as `Arc<dyn Channel>`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name, used as the routing key for outbound messages.
    fn name(&self) -> &str;

    /// Connect and begin receiving.
    async fn start(&self) -> Result<()>;

    /// Disconnect. Must be idempotent and safe to call when `start` failed or
    /// never ran.
    async fn stop(&self) -> Result<()>;

    /// Deliver one message to `message.chat_id`.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Lifecycle state of a registered channel, as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    NotStarted,
    Starting,
    Running,
    Failed,
    Stopped,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inbound publishing ──────────────────────────────────────────────────────

/// Handle a channel uses to put received messages on the bus.
///
/// Bound to one channel name. Messages are stamped with that name, validated,
/// and checked against the channel's sender allowlist before publishing.
#[derive(Clone)]
pub struct InboundPublisher {
    channel: String,
    bus: EventBus,
    allowlist: Arc<Vec<String>>,
}

impl fmt::Debug for InboundPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundPublisher")
            .field("channel", &self.channel)
            .field("allowlist", &self.allowlist.len())
            .finish()
    }
}

impl InboundPublisher {
    /// A publisher with an open allowlist.
    pub fn new(channel: impl Into<String>, bus: EventBus) -> Self {
        Self::with_allowlist(channel, bus, Vec::new())
    }

    pub fn with_allowlist(channel: impl Into<String>, bus: EventBus, allowlist: Vec<String>) -> Self {
        Self {
            channel: channel.into(),
            bus,
            allowlist: Arc::new(allowlist),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_allowed(&self, sender_id: &str) -> bool {
        gating::is_allowed(sender_id, &self.allowlist)
    }

    /// Publish `message` as an inbound event.
    ///
    /// Denied senders are dropped and reported to the bus observer; the
    /// returned error tells the channel the message went nowhere.
    pub fn publish(&self, mut message: InboundMessage) -> crate::Result<Dispatch> {
        message.channel.clone_from(&self.channel);
        message.validate()?;

        if !self.is_allowed(&message.sender_id) {
            warn!(
                channel = %self.channel,
                sender_id = %message.sender_id,
                "sender not on allowlist, dropping inbound message"
            );
            self.bus.observer().observe(Incident::InboundRejected {
                channel: self.channel.clone(),
                reason: format!("sender {} not allowed", message.sender_id),
            });
            return Err(Error::sender_not_allowed(&self.channel, &message.sender_id));
        }

        debug!(
            channel = %self.channel,
            chat_id = %message.chat_id,
            sender_id = %message.sender_id,
            "publishing inbound message"
        );
        Ok(self.bus.publish_inbound(message))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_bus::handler_fn,
        courier_common::{BusEvent, RecordingObserver, Topic},
        std::sync::Mutex,
    };

    fn capture(bus: &EventBus) -> Arc<Mutex<Vec<InboundMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            Topic::Inbound,
            handler_fn("capture", move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    if let BusEvent::Inbound { message, .. } = event {
                        sink.lock().unwrap().push(message);
                    }
                    Ok(())
                }
            }),
        );
        seen
    }

    #[tokio::test]
    async fn stamps_channel_name() {
        let bus = EventBus::new();
        let seen = capture(&bus);
        let publisher = InboundPublisher::new("telegram", bus);

        publisher
            .publish(InboundMessage::new("spoofed", "42", "alice", "hi"))
            .unwrap()
            .settled()
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].channel, "telegram");
    }

    #[tokio::test]
    async fn denied_sender_is_reported_not_published() {
        let observer = Arc::new(RecordingObserver::new());
        let bus = EventBus::with_observer(observer.clone());
        let seen = capture(&bus);
        let publisher =
            InboundPublisher::with_allowlist("slack", bus, vec!["alice".into(), "admin_*".into()]);

        let err = publisher
            .publish(InboundMessage::new("slack", "C1", "mallory", "hi"))
            .unwrap_err();
        assert!(matches!(err, Error::SenderNotAllowed { .. }));

        publisher
            .publish(InboundMessage::new("slack", "C1", "admin_bob", "hi"))
            .unwrap()
            .settled()
            .await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(matches!(
            observer.incidents().as_slice(),
            [Incident::InboundRejected { channel, .. }] if channel == "slack"
        ));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let publisher = InboundPublisher::new("cli", EventBus::new());
        let err = publisher
            .publish(InboundMessage::new("cli", "direct", "user", ""))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn status_display() {
        assert_eq!(ChannelStatus::NotStarted.to_string(), "not_started");
        assert_eq!(
            serde_json::to_value(ChannelStatus::Failed).unwrap(),
            serde_json::json!("failed")
        );
    }
}
