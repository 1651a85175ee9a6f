//! Time window calculation.
//!
//! Every run processes a `[from, to)` window derived from the wall clock at
//! fire time: `to` is the start of the current UTC day and `from` lies a
//! whole number of days earlier. The window is never derived from the last
//! successfully processed day, so a skipped fire leaves its day unprocessed.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Format used when binding window bounds into statements.
pub const PARAM_TIME_FORMAT: &str = "%Y-%m-%d 00:00:00";

/// Largest accepted window, roughly a century of days.
pub const MAX_WINDOW_DAYS: u32 = 36_600;

/// Errors that can occur when building windows.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// Window sizes are whole days and must be positive.
    #[error("window size must be at least one day")]
    ZeroDays,

    /// Window sizes are capped so `from` stays representable.
    #[error("window size of {days} days exceeds the maximum of {max}")]
    TooManyDays { days: u32, max: u32 },

    /// `from` must be strictly before `to`.
    #[error("window start {from} is not before end {to}")]
    Inverted {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// A half-open `[from, to)` interval a run processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting empty or inverted ranges.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, WindowError> {
        if from >= to {
            return Err(WindowError::Inverted { from, to });
        }
        Ok(Self { from, to })
    }

    /// Inclusive start.
    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    /// Exclusive end.
    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    /// Statement parameters for this window, at day granularity.
    pub fn params(&self) -> WindowParams {
        WindowParams {
            from: self.from.format(PARAM_TIME_FORMAT).to_string(),
            to: self.to.format(PARAM_TIME_FORMAT).to_string(),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}

/// The `from`/`to` values handed to the execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowParams {
    pub from: String,
    pub to: String,
}

impl WindowParams {
    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "from" => Some(&self.from),
            "to" => Some(&self.to),
            _ => None,
        }
    }
}

/// How many whole UTC days a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct WindowPolicy {
    days: u32,
}

impl WindowPolicy {
    /// The default: exactly one UTC calendar day ("yesterday").
    pub const fn daily() -> Self {
        Self { days: 1 }
    }

    /// A window covering `days` whole days ending at today's UTC midnight.
    pub fn days(days: u32) -> Result<Self, WindowError> {
        if days == 0 {
            return Err(WindowError::ZeroDays);
        }
        if days > MAX_WINDOW_DAYS {
            return Err(WindowError::TooManyDays {
                days,
                max: MAX_WINDOW_DAYS,
            });
        }
        Ok(Self { days })
    }

    /// Number of days covered.
    pub fn size_days(&self) -> u32 {
        self.days
    }

    /// Compute the window for a run fired at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> TimeWindow {
        let to = start_of_day(now);
        let from = to
            .checked_sub_signed(Duration::days(i64::from(self.days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        TimeWindow { from, to }
    }
}

impl TryFrom<u32> for WindowPolicy {
    type Error = WindowError;

    fn try_from(days: u32) -> Result<Self, Self::Error> {
        Self::days(days)
    }
}

impl From<WindowPolicy> for u32 {
    fn from(policy: WindowPolicy) -> Self {
        policy.days
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::daily()
    }
}

/// The default one-day window for a run fired at `now`.
pub fn window(now: DateTime<Utc>) -> TimeWindow {
    WindowPolicy::daily().window(now)
}

fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(NaiveTime::MIN).and_utc()
}
