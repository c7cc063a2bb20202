//! Message and bus event types shared by channels, the bus and the agents.

use std::fmt;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{Error, Result};

/// Open string-keyed metadata attached to a message. Values are opaque to the
/// router; channels and the reasoning engine agree on their meaning.
pub type Metadata = serde_json::Map<String, Value>;

/// A media attachment carried alongside (or instead of) message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Location of the media: a URL, a local path, or a `data:` URI.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl MediaAttachment {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media_type: None,
            file_name: None,
        }
    }

    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

// ── Messages ────────────────────────────────────────────────────────────────

/// A message received from a channel, on its way to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Name of the channel the message arrived on (e.g. "telegram").
    pub channel: String,
    /// Channel-scoped conversation identifier.
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: Metadata::new(),
            reply_to: None,
            message_id: None,
            in_reply_to: None,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media.push(media);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// `channel:chat_id`, the key identifying the conversation.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// Content may only be empty when media is attached.
    pub fn is_deliverable(&self) -> bool {
        !self.content.is_empty() || !self.media.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_deliverable() {
            return Err(Error::empty_message(&self.channel, &self.chat_id));
        }
        Ok(())
    }
}

/// A message ready to be delivered through a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: Metadata::new(),
            reply_to: None,
            message_id: None,
            in_reply_to: None,
        }
    }

    /// Build a reply addressed to the same channel and chat as `inbound`.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        let mut reply = Self::new(&inbound.channel, &inbound.chat_id, content);
        reply.in_reply_to = inbound.message_id.clone();
        reply
    }

    #[must_use]
    pub fn with_media(mut self, media: Vec<MediaAttachment>) -> Self {
        self.media = media;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// True if the message was synthesized from a failure.
    pub fn is_error(&self) -> bool {
        self.metadata
            .get("error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Content may only be empty when media is attached.
    pub fn is_deliverable(&self) -> bool {
        !self.content.is_empty() || !self.media.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_deliverable() {
            return Err(Error::empty_message(&self.channel, &self.chat_id));
        }
        Ok(())
    }
}

// ── Bus events ──────────────────────────────────────────────────────────────

/// Bus topics. Every event belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "message:inbound")]
    Inbound,
    #[serde(rename = "message:outbound")]
    Outbound,
}

impl Topic {
    pub const ALL: &'static [Topic] = &[Self::Inbound, Self::Outbound];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "message:inbound",
            Self::Outbound => "message:outbound",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event travelling over the bus. The timestamp is assigned by the bus at
/// publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusEvent {
    Inbound {
        message: InboundMessage,
        timestamp: DateTime<Utc>,
    },
    Outbound {
        message: OutboundMessage,
        timestamp: DateTime<Utc>,
    },
}

impl BusEvent {
    pub fn inbound(message: InboundMessage) -> Self {
        Self::Inbound {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn outbound(message: OutboundMessage) -> Self {
        Self::Outbound {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            Self::Inbound { .. } => Topic::Inbound,
            Self::Outbound { .. } => Topic::Outbound,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Inbound { timestamp, .. } | Self::Outbound { timestamp, .. } => *timestamp,
        }
    }

    /// Re-stamp the event with the current time.
    #[must_use]
    pub fn stamped(self) -> Self {
        let now = Utc::now();
        match self {
            Self::Inbound { message, .. } => Self::Inbound {
                message,
                timestamp: now,
            },
            Self::Outbound { message, .. } => Self::Outbound {
                message,
                timestamp: now,
            },
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Self::Inbound { message, .. } => &message.channel,
            Self::Outbound { message, .. } => &message.channel,
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            Self::Inbound { message, .. } => &message.chat_id,
            Self::Outbound { message, .. } => &message.chat_id,
        }
    }
}
