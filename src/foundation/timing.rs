use std::time::{Duration, Instant};

/// Granularity of bounded waits that have to spin (GPU fence polling).
pub const POLL_PERIOD: Duration = Duration::from_millis(1);

/// An absolute time budget for a bounded operation.
///
/// `Deadline::NEVER` means "block until done"; everything else means "return control at
/// this instant even if incomplete". An already-expired deadline still permits a single
/// non-blocking poll, so callers can drain work that happens to be ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Block indefinitely.
    pub const NEVER: Deadline = Deadline(None);

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn within(budget: Duration) -> Self {
        Deadline(Some(Instant::now() + budget))
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_none()
    }

    pub fn expired(&self) -> bool {
        matches!(self.0, Some(t) if Instant::now() >= t)
    }

    /// Remaining budget. `None` means unbounded; an expired deadline yields zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|t| t.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_unbounded_and_does_not_expire() {
        assert!(Deadline::NEVER.is_unbounded());
        assert!(!Deadline::NEVER.expired());
        assert_eq!(Deadline::NEVER.remaining(), None);
    }

    #[test]
    fn past_deadline_is_expired_with_zero_remaining() {
        let d = Deadline::at(Instant::now() - Duration::from_millis(5));
        assert!(d.expired());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn future_deadline_has_budget_left() {
        let d = Deadline::within(Duration::from_secs(60));
        assert!(!d.expired());
        assert!(d.remaining().unwrap() > Duration::from_secs(59));
    }
}
