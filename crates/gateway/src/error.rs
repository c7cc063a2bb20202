use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The bus was closed by an earlier `stop`; a gateway cannot restart.
    #[error("event bus is closed")]
    BusClosed,

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Channel(#[from] courier_channels::Error),

    #[error(transparent)]
    Heartbeat(#[from] courier_cron::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

impl courier_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

courier_common::impl_context!();
