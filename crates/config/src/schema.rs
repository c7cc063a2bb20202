//! Config schema types (gateway, sub-agents, heartbeat, channels).

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub gateway: GatewayConfig,
    pub subagents: SubagentsConfig,
    pub heartbeat: HeartbeatConfig,
    pub channels: ChannelsConfig,
}

/// How inbound messages of one chat are scheduled against the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatOrderingMode {
    #[default]
    Concurrent,
    PerChat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub chat_ordering: ChatOrderingMode,
    /// Default log filter (e.g. "info", "courier_bus=debug"). `RUST_LOG`
    /// overrides it.
    pub log_level: String,
    /// Emit logs as JSON lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            chat_ordering: ChatOrderingMode::Concurrent,
            log_level: "info".into(),
            json_logs: false,
        }
    }
}

/// Budget for background sub-agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentsConfig {
    /// Wall-clock budget per task, in seconds. Defaults to 300.
    pub timeout_secs: u64,
    /// Maximum LLM calls per task. Defaults to 15.
    pub max_iterations: usize,
    /// Finished tasks kept for status queries. Defaults to 100.
    pub max_retained: usize,
}

impl Default for SubagentsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_iterations: 15,
            max_retained: 100,
        }
    }
}

impl SubagentsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Heartbeat configuration: a periodic agent turn whose reply is delivered
/// only when something needs attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether the heartbeat is enabled. Defaults to false.
    pub enabled: bool,
    /// Interval between heartbeats (e.g. "30m", "1h"). Defaults to "30m".
    pub every: String,
    /// Custom prompt override. If empty, the built-in default is used.
    pub prompt: Option<String>,
    /// Replies up to this many characters that only acknowledge are
    /// suppressed. Defaults to 300.
    pub ack_max_chars: usize,
    /// Heartbeats only run inside this daily window.
    pub active_hours: ActiveHoursConfig,
    /// Where non-suppressed replies are sent.
    pub deliver_to: Option<DeliveryTarget>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            every: "30m".into(),
            prompt: None,
            ack_max_chars: 300,
            active_hours: ActiveHoursConfig::default(),
            deliver_to: None,
        }
    }
}

/// Active hours window for heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveHoursConfig {
    /// Start time in HH:MM format. Defaults to "08:00".
    pub start: String,
    /// End time in HH:MM format. Defaults to "24:00" (end of day).
    pub end: String,
    /// IANA timezone (e.g. "Europe/Paris") or "local". Defaults to "local".
    pub timezone: String,
}

impl Default for ActiveHoursConfig {
    fn default() -> Self {
        Self {
            start: "08:00".into(),
            end: "24:00".into(),
            timezone: "local".into(),
        }
    }
}

/// A channel/chat pair messages can be addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    pub channel: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Sender allowlist per channel name. Missing or empty means open.
    pub allow_from: HashMap<String, Vec<String>>,
}

/// Parse a human-friendly interval like "30m", "1h", "90s". A bare number is
/// milliseconds. Returns `None` for unparseable or zero input.
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000u64)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000u64)
    } else {
        (s, 1u64)
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
