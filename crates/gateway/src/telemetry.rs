//! `tracing` subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{Result, error::Context};

/// Install the global subscriber. `RUST_LOG` overrides `level`. Fails if a
/// subscriber is already installed.
pub fn init_telemetry(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .try_init()
    };
    installed.context("failed to install tracing subscriber")
}
