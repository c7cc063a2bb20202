use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A channel with this name is already registered.
    #[error("channel already registered: {name}")]
    DuplicateChannel { name: String },

    /// A requested channel is not registered.
    #[error("unknown channel: {name}")]
    UnknownChannel { name: String },

    /// The sender is not on the channel's allowlist.
    #[error("sender {sender_id} is not allowed on channel {channel}")]
    SenderNotAllowed { channel: String, sender_id: String },

    /// Operation is currently unavailable (not started, bus closed).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// The message itself is malformed.
    #[error(transparent)]
    InvalidMessage(#[from] courier_common::Error),

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn duplicate_channel(name: impl std::fmt::Display) -> Self {
        Self::DuplicateChannel {
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_channel(name: impl std::fmt::Display) -> Self {
        Self::UnknownChannel {
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn sender_not_allowed(
        channel: impl std::fmt::Display,
        sender_id: impl std::fmt::Display,
    ) -> Self {
        Self::SenderNotAllowed {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
