//! Channel capability contract and the channel manager.
//!
//! A channel (Telegram, Slack, a CLI, ...) implements [`Channel`]. The
//! [`ChannelManager`] owns the registered channels, drives their lifecycle and
//! routes outbound bus events to them by name. Inbound traffic reaches the bus
//! through an [`InboundPublisher`], which applies the channel's allowlist.

pub mod channel;
pub mod error;
pub mod gating;
pub mod manager;
pub mod memory;

pub use {
    channel::{Channel, ChannelStatus, InboundPublisher},
    error::{Error, Result},
    manager::{ChannelManager, LifecycleReport},
    memory::MemoryChannel,
};
