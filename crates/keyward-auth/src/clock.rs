//! Time source for token issuance and expiry checks.
//!
//! Signed tokens carry their own expiry, so verifying them needs the current
//! time. Services take an `Arc<dyn Clock>` so tests can drive expiry with a
//! [`ManualClock`] instead of sleeping.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;

/// A source of the current UTC time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> OffsetDateTime;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: OffsetDateTime,
    elapsed_ms: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `origin`.
    #[must_use]
    pub fn new(origin: OffsetDateTime) -> Self {
        Self {
            origin,
            elapsed_ms: AtomicI64::new(0),
        }
    }

    /// Creates a clock frozen at the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        self.origin
            .saturating_add(time::Duration::milliseconds(self.elapsed_ms.load(Ordering::SeqCst)))
    }
}
