//! Normalization of raw systemd unit state into the dashboard's status vocabulary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Outcome used whenever systemd reports the unit's load state as `not-found`.
pub const NOT_FOUND: &str = "not-found";

/// Uptime text shown for any unit that is not running.
pub const ZERO_UPTIME: &str = "00:00:00";

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// UI bucket derived from load/active state.
///
/// `Absent` renders as `active` so existing stylesheets keep working: the
/// dashboard has always used that class for units systemd does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusClass {
    #[serde(rename = "active")]
    Absent,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "danger")]
    Danger,
    #[serde(rename = "warning")]
    Warning,
}

impl StatusClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusClass::Absent => "active",
            StatusClass::Success => "success",
            StatusClass::Danger => "danger",
            StatusClass::Warning => "warning",
        }
    }

    pub fn controls(self) -> Controls {
        match self {
            StatusClass::Absent => Controls {
                disable_start: true,
                disable_stop: true,
                disable_restart: true,
            },
            StatusClass::Success => Controls {
                disable_start: true,
                disable_stop: false,
                disable_restart: false,
            },
            StatusClass::Danger => Controls {
                disable_start: false,
                disable_stop: true,
                disable_restart: true,
            },
            StatusClass::Warning => Controls {
                disable_start: false,
                disable_stop: false,
                disable_restart: false,
            },
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which dashboard buttons are disabled for a given class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub disable_start: bool,
    pub disable_stop: bool,
    pub disable_restart: bool,
}

pub fn classify(load_state: &str, active_state: &str) -> StatusClass {
    if load_state == NOT_FOUND {
        return StatusClass::Absent;
    }
    match active_state {
        "inactive" | "failed" => StatusClass::Danger,
        "active" => StatusClass::Success,
        _ => StatusClass::Warning,
    }
}

/// Classify the outcome of a `status` action, which folds `not-found` and the active state into one string.
pub fn classify_status(status: &str) -> StatusClass {
    if status == NOT_FOUND {
        classify(NOT_FOUND, "")
    } else {
        classify("loaded", status)
    }
}

/// Uptime text as displayed on the dashboard for a unit of `class`.
pub fn display_uptime(class: StatusClass, uptime: &str) -> String {
    if class == StatusClass::Success {
        uptime.to_string()
    } else {
        ZERO_UPTIME.to_string()
    }
}

/// Elapsed time since `started_us` (microseconds since the epoch).
pub fn format_uptime(started_us: Option<u64>, now: DateTime<Utc>) -> String {
    let Some(started_us) = started_us else {
        return ZERO_UPTIME.to_string();
    };
    let started_us = i64::try_from(started_us).unwrap_or(i64::MAX);
    render_duration(now.timestamp_micros().saturating_sub(started_us))
}

/// Render a span as `[N day[s], ]H:MM:SS[.ffffff]`.
///
/// Days use floor division, so a negative span keeps a positive clock part
/// (`-1 day, 23:59:59` for minus one second).
pub fn render_duration(micros: i64) -> String {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let rem = micros.rem_euclid(MICROS_PER_DAY);
    let secs = rem / MICROS_PER_SECOND;
    let frac = rem % MICROS_PER_SECOND;

    let mut out = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        out.push_str(&format!("{days} day{plural}, "));
    }
    out.push_str(&format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60));
    if frac != 0 {
        out.push_str(&format!(".{frac:06}"));
    }
    out
}

/// Source of "now" for uptime computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
