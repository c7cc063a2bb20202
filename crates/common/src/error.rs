use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The message cannot be delivered: it has neither content nor media.
    #[error("message for {channel}:{chat_id} has no content and no media")]
    EmptyMessage { channel: String, chat_id: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn empty_message(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::EmptyMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Context ─────────────────────────────────────────────────────────────────

/// Error types buildable from a plain message, so [`impl_context!`] can
/// attach context to foreign errors.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Define a module-local `Context` trait adding `.context("...")` to any
/// `Result<T, E: Display>` and to `Option<T>`, producing the module's
/// `Result<T>`. The module must define `Error: FromMessage` and `Result<T>`.
///
/// ```ignore
/// courier_common::impl_context!();
///
/// registry.try_init().context("failed to install tracing subscriber")?;
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!(
                        "{}: {source}",
                        context.into()
                    ))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }
        }
    };
}
