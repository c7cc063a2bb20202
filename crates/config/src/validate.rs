//! Semantic checks on a parsed configuration.

use std::fmt;

use chrono::NaiveTime;

use crate::schema::{CourierConfig, parse_interval};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "heartbeat.every".
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

impl CourierConfig {
    /// Check values serde cannot: zero budgets, unparsable intervals, bad
    /// times and timezones, incomplete delivery targets.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.subagents.timeout_secs == 0 {
            result.push(
                Severity::Error,
                "subagents.timeout_secs",
                "must be greater than zero",
            );
        }
        if self.subagents.max_iterations == 0 {
            result.push(
                Severity::Error,
                "subagents.max_iterations",
                "must be greater than zero",
            );
        }
        if self.subagents.max_retained == 0 {
            result.push(
                Severity::Warning,
                "subagents.max_retained",
                "finished tasks will not be queryable",
            );
        }

        let hb = &self.heartbeat;
        if parse_interval(&hb.every).is_none() {
            result.push(
                Severity::Error,
                "heartbeat.every",
                format!("invalid interval {:?} (expected e.g. \"30m\", \"1h\")", hb.every),
            );
        }
        for (path, value) in [
            ("heartbeat.active_hours.start", &hb.active_hours.start),
            ("heartbeat.active_hours.end", &hb.active_hours.end),
        ] {
            if value != "24:00" && NaiveTime::parse_from_str(value, "%H:%M").is_err() {
                result.push(
                    Severity::Error,
                    path,
                    format!("invalid time {value:?} (expected HH:MM)"),
                );
            }
        }
        let tz = hb.active_hours.timezone.as_str();
        if !tz.is_empty() && tz != "local" && tz.parse::<chrono_tz::Tz>().is_err() {
            result.push(
                Severity::Error,
                "heartbeat.active_hours.timezone",
                format!("unknown timezone {tz:?}"),
            );
        }
        match &hb.deliver_to {
            Some(target) if target.channel.is_empty() || target.chat_id.is_empty() => {
                result.push(
                    Severity::Error,
                    "heartbeat.deliver_to",
                    "channel and chat_id must both be set",
                );
            },
            None if hb.enabled => {
                result.push(
                    Severity::Warning,
                    "heartbeat.deliver_to",
                    "heartbeat is enabled but has no delivery target",
                );
            },
            _ => {},
        }

        for (channel, list) in &self.channels.allow_from {
            if list.iter().any(|entry| entry.trim().is_empty()) {
                result.push(
                    Severity::Warning,
                    &format!("channels.allow_from.{channel}"),
                    "contains an empty entry",
                );
            }
        }

        result
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::DeliveryTarget};

    #[test]
    fn default_config_is_valid() {
        let result = CourierConfig::default().validate();
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn zero_timeout_is_an_error() {
        let mut cfg = CourierConfig::default();
        cfg.subagents.timeout_secs = 0;
        let result = cfg.validate();
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].path, "subagents.timeout_secs");
    }

    #[test]
    fn heartbeat_problems_reported() {
        let mut cfg = CourierConfig::default();
        cfg.heartbeat.enabled = true;
        cfg.heartbeat.every = "often".into();
        cfg.heartbeat.active_hours.start = "8am".into();
        cfg.heartbeat.active_hours.timezone = "Mars/Olympus".into();

        let result = cfg.validate();
        let paths: Vec<&str> = result.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec![
            "heartbeat.every",
            "heartbeat.active_hours.start",
            "heartbeat.active_hours.timezone",
            "heartbeat.deliver_to",
        ]);
        assert_eq!(result.count(Severity::Error), 3);
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn incomplete_target_is_an_error() {
        let mut cfg = CourierConfig::default();
        cfg.heartbeat.deliver_to = Some(DeliveryTarget {
            channel: "telegram".into(),
            chat_id: String::new(),
        });
        assert!(cfg.validate().has_errors());
    }
}
