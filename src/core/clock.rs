//! Wall-clock source.

use chrono::{DateTime, Utc};

/// Source of the current instant.
///
/// Window computation and schedule evaluation read time through this trait so
/// they can be driven deterministically.
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
