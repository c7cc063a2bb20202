//! Scheduled background services for the gateway.
//!
//! Currently a single service: the heartbeat, which periodically asks the
//! reasoning engine whether anything needs the user's attention and delivers
//! the answer to a configured chat.

pub mod error;
pub mod heartbeat;
pub mod service;

pub use {
    error::{Error, Result},
    heartbeat::{
        ActiveWindow, DEFAULT_PROMPT, HEARTBEAT_OK, StripResult, WindowZone,
        resolve_heartbeat_prompt, strip_heartbeat_token,
    },
    service::{HEARTBEAT_SENDER, HeartbeatOutcome, HeartbeatService},
};
