//! Gateway: composes the event bus, channel manager, bus adapter, sub-agents
//! and background services into one start/stop lifecycle.
//!
//! Lifecycle:
//! 1. Load + validate config (`courier-config`)
//! 2. Install telemetry
//! 3. Build the gateway, register channels
//! 4. `start()`: adapter, channels, cron, heartbeat
//! 5. `stop()`: the reverse, then close the bus

pub mod error;
pub mod gateway;
pub mod telemetry;

pub use {
    error::{Error, Result},
    gateway::{Gateway, GatewayState},
    telemetry::init_telemetry,
};
