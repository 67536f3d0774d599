//! Run-wide deadline
//!
//! One `Deadline` is created per script run. Every blocking operation
//! (process wait, in-process call, `wait`) races its completion against it.

use std::time::{Duration, Instant};

/// A point in time after which the run is considered timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn never() -> Self {
        Self { at: None }
    }

    /// A deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self { at: Instant::now().checked_add(timeout) }
    }

    /// Time left before expiry; `None` means unbounded.
    /// An expired deadline reports `Some(Duration::ZERO)`.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// The earlier of this deadline and `grace` from now
    pub fn capped(&self, grace: Duration) -> Self {
        let other = Self::after(grace);
        match (self.at, other.at) {
            (Some(a), Some(b)) => Self { at: Some(a.min(b)) },
            (None, b) => Self { at: b },
            (a, None) => Self { at: a },
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_unbounded() {
        let d = Deadline::never();
        assert_eq!(d.remaining(), None);
        assert!(!d.expired());
    }

    #[test]
    fn zero_timeout_is_expired() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.expired());
    }

    #[test]
    fn capped_takes_the_earlier() {
        let d = Deadline::never().capped(Duration::from_millis(10));
        assert!(d.remaining().unwrap() <= Duration::from_millis(10));
        let long = Deadline::after(Duration::from_secs(3600)).capped(Duration::from_secs(1));
        assert!(long.remaining().unwrap() <= Duration::from_secs(1));
    }
}
