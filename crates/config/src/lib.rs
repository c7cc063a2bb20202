//! Configuration loading, validation and env substitution.
//!
//! Config files: `courier.toml`, `courier.yaml`, `courier.yml` or
//! `courier.json`, searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` substitution anywhere in the file.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        ActiveHoursConfig, ChannelsConfig, ChatOrderingMode, CourierConfig, DeliveryTarget,
        GatewayConfig, HeartbeatConfig, SubagentsConfig, parse_interval,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
