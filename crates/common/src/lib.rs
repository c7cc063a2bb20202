//! Shared message types, error definitions, lifecycle and observer traits used
//! across all courier crates.

pub mod error;
pub mod observer;
pub mod service;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    observer::{Incident, Observer, RecordingObserver, TracingObserver},
    service::Service,
    types::{BusEvent, InboundMessage, MediaAttachment, Metadata, OutboundMessage, Topic},
};
