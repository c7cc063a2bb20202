//! Heartbeat logic: token stripping, prompt resolution, active-hours check.

use chrono::{Local, NaiveTime, Timelike, Utc};

use crate::{Error, Result};

/// The sentinel token an LLM returns when nothing noteworthy is happening.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Default heartbeat prompt sent to the LLM.
pub const DEFAULT_PROMPT: &str = "\
You are performing a periodic heartbeat check. Review any pending items \
(inbox, calendar, reminders, background tasks) and determine if anything \
needs the user's attention right now.\n\n\
- If nothing requires attention, reply with exactly: HEARTBEAT_OK\n\
- If something needs attention, describe it concisely.\n\
Do NOT wrap HEARTBEAT_OK in markdown formatting.";

/// Result of stripping the `HEARTBEAT_OK` token from an LLM reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripResult {
    /// Whether the reply should be suppressed (not delivered to the user).
    pub should_skip: bool,
    /// The remaining text after stripping.
    pub text: String,
    /// Whether the token was found and removed.
    pub did_strip: bool,
}

/// Strip `HEARTBEAT_OK` from `text`, including bold wrappers like
/// `**HEARTBEAT_OK**` and `<b>HEARTBEAT_OK</b>`.
///
/// A reply is suppressed when nothing is left, or when the token was present
/// and what remains is a short acknowledgment of at most `max_ack_chars`
/// characters.
pub fn strip_heartbeat_token(text: &str, max_ack_chars: usize) -> StripResult {
    let trimmed = text.trim();
    let mut result = trimmed.to_string();
    let mut did_strip = false;

    for pattern in [
        format!("**{HEARTBEAT_OK}**"),
        format!("<b>{HEARTBEAT_OK}</b>"),
        HEARTBEAT_OK.to_string(),
    ] {
        if result.contains(&pattern) {
            result = result.replace(&pattern, "");
            did_strip = true;
        }
    }

    let text = result.trim().to_string();
    let should_skip = text.is_empty() || (did_strip && text.chars().count() <= max_ack_chars);

    StripResult {
        should_skip,
        text,
        did_strip,
    }
}

/// The configured prompt, or [`DEFAULT_PROMPT`] when unset or blank.
pub fn resolve_heartbeat_prompt(custom: Option<&str>) -> String {
    match custom.map(str::trim) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => DEFAULT_PROMPT.to_string(),
    }
}

/// A daily window in minutes since midnight. `end` may be 1440 ("24:00").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: u32,
    pub end: u32,
}

impl ActiveWindow {
    pub const ALWAYS: Self = Self {
        start: 0,
        end: 24 * 60,
    };

    /// Parse `HH:MM` bounds. "24:00" is accepted as the end of the day.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: parse_minutes(start)?,
            end: parse_minutes(end)?,
        })
    }

    /// Handles overnight windows (e.g. start=22:00, end=06:00).
    pub fn contains(self, minutes: u32) -> bool {
        if self.start <= self.end {
            minutes >= self.start && minutes < self.end
        } else {
            minutes >= self.start || minutes < self.end
        }
    }
}

/// Timezone used to evaluate the active window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowZone {
    Local,
    Named(chrono_tz::Tz),
}

impl WindowZone {
    /// "local" or empty means system local time.
    pub fn parse(timezone: &str) -> Result<Self> {
        if timezone.is_empty() || timezone == "local" {
            return Ok(Self::Local);
        }
        timezone
            .parse::<chrono_tz::Tz>()
            .map(Self::Named)
            .map_err(|_| Error::unknown_timezone(timezone))
    }

    /// Minutes since midnight, now, in this zone.
    pub fn now_minutes(self) -> u32 {
        match self {
            Self::Local => {
                let now = Local::now();
                now.hour() * 60 + now.minute()
            },
            Self::Named(tz) => {
                let now = Utc::now().with_timezone(&tz);
                now.hour() * 60 + now.minute()
            },
        }
    }
}

fn parse_minutes(s: &str) -> Option<u32> {
    if s.trim() == "24:00" {
        return Some(24 * 60);
    }
    let t = NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()?;
    Some(t.hour() * 60 + t.minute())
}
