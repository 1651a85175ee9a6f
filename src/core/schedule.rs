//! Schedule parsing and next fire calculation.
//!
//! Schedules are a pluggable capability: the scheduler only needs something
//! that answers "when is the next fire strictly after T?". [`CronParser`] is
//! the default implementation and understands standard cron expressions,
//! extended 6-field cron (with seconds), shortcuts (`@daily`, `@hourly`, ...)
//! and interval expressions (`@every 5m`).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronExpression;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Timezone every trigger is evaluated in, regardless of deployment locale.
pub const SCHEDULE_TIMEZONE: Tz = chrono_tz::UTC;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// A parsed schedule that can compute its next fire instant.
pub trait TriggerSchedule: Send + Sync + fmt::Debug {
    /// The expression this schedule was parsed from.
    fn expression(&self) -> &str;

    /// The first fire instant strictly after `after`.
    fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError>;
}

/// Turns schedule expressions into [`TriggerSchedule`]s.
pub trait ScheduleParser: Send + Sync {
    /// Parse `expression`, evaluating it in `timezone`.
    fn parse(
        &self,
        expression: &str,
        timezone: Tz,
    ) -> Result<Arc<dyn TriggerSchedule>, ScheduleError>;
}

/// Default parser backed by the `cron` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronParser;

impl ScheduleParser for CronParser {
    fn parse(
        &self,
        expression: &str,
        timezone: Tz,
    ) -> Result<Arc<dyn TriggerSchedule>, ScheduleError> {
        Ok(Arc::new(CronSchedule::with_timezone(expression, timezone)?))
    }
}

/// A cron- or interval-based schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// The original expression string.
    expression: String,
    /// The timezone the expression is evaluated in.
    timezone: Tz,
    /// Parsed schedule kind.
    kind: ScheduleKind,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    /// Standard cron schedule.
    Cron(Box<CronExpression>),
    /// Interval-based schedule (e.g., @every 5m).
    Interval(chrono::Duration),
}

impl CronSchedule {
    /// Parse a schedule evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, SCHEDULE_TIMEZONE)
    }

    /// Parse a schedule evaluated in the given timezone.
    pub fn with_timezone(expression: impl Into<String>, timezone: Tz) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let kind = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            kind,
        })
    }

    fn parse_expression(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    fn parse_shortcut(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            s if s.starts_with("@every ") => Self::parse_interval(&s[7..]),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    fn parse_interval(interval: &str) -> Result<ScheduleKind, ScheduleError> {
        let trimmed = interval.trim();
        let seconds = Self::parse_duration_secs(trimmed)?;
        let seconds = i64::try_from(seconds)
            .map_err(|_| ScheduleError::InvalidInterval(trimmed.to_string()))?;
        let duration = chrono::Duration::try_seconds(seconds)
            .ok_or_else(|| ScheduleError::InvalidInterval(trimmed.to_string()))?;
        Ok(ScheduleKind::Interval(duration))
    }

    /// Parse a duration string like "5m", "1h", "1h30m", "30s".
    fn parse_duration_secs(s: &str) -> Result<u64, ScheduleError> {
        let mut total_secs: u64 = 0;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
                continue;
            }

            let num: u64 = current_num
                .parse()
                .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
            current_num.clear();

            let unit = match c {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86400,
                _ => return Err(ScheduleError::InvalidInterval(s.to_string())),
            };
            total_secs = num
                .checked_mul(unit)
                .and_then(|secs| total_secs.checked_add(secs))
                .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;
        }

        // Trailing digits without a unit
        if !current_num.is_empty() || total_secs == 0 {
            return Err(ScheduleError::InvalidInterval(s.to_string()));
        }

        Ok(total_secs)
    }

    fn parse_cron(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();

        let cron_expr = match fields.len() {
            // Standard 5-field cron, add seconds field
            5 => format!("0 {}", expression),
            6 => expression.to_string(),
            _ => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {}",
                    fields.len()
                )));
            }
        };

        let schedule = CronExpression::from_str(&cron_expr)
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))?;

        Ok(ScheduleKind::Cron(Box::new(schedule)))
    }

    /// Get the next N occurrences after the given time.
    pub fn next_n_after(
        &self,
        after: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let mut results = Vec::with_capacity(n);
        let mut current = after;
        for _ in 0..n {
            current = self.next_after(current)?;
            results.push(current);
        }
        Ok(results)
    }

    /// Get the timezone.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

impl TriggerSchedule for CronSchedule {
    fn expression(&self) -> &str {
        &self.expression
    }

    fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.kind {
            ScheduleKind::Cron(schedule) => {
                let local_time = after.with_timezone(&self.timezone);
                schedule
                    .after(&local_time)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(ScheduleError::NoMoreOccurrences)
            }
            ScheduleKind::Interval(duration) => after
                .checked_add_signed(*duration)
                .ok_or(ScheduleError::NoMoreOccurrences),
        }
    }
}
