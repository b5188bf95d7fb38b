// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use super::{Clock, Stopwatch};

/// The total wall-clock duration allowed for one logical request.
///
/// A budget is started when the request enters the pipeline and ticks on the
/// monotonic clock; the remaining time shrinks by true elapsed time, never by
/// allocation, so time unused by a fast-failing attempt automatically flows
/// to subsequent attempts.
///
/// `remaining` clamps at zero and is therefore non-increasing over the life
/// of the request.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    total: Duration,
    stopwatch: Stopwatch,
}

impl TimeBudget {
    /// Starts a budget of `total` on the given clock.
    #[must_use]
    pub fn start(clock: &Clock, total: Duration) -> Self {
        Self {
            total,
            stopwatch: clock.stopwatch(),
        }
    }

    /// The total duration this budget was started with.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Time consumed since the budget was started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    /// Time left before the budget expires; zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    /// Returns `true` once the budget is exhausted.
    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Replaces the total while keeping the original start point.
    pub(crate) fn with_total(&self, total: Duration) -> Self {
        Self {
            total,
            stopwatch: self.stopwatch.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::time::ClockControl;

    use super::*;

    #[test]
    fn fresh_budget_has_everything_remaining() {
        let control = ClockControl::new();
        let budget = TimeBudget::start(&control.to_clock(), Duration::from_secs(10));

        assert_eq!(budget.total(), Duration::from_secs(10));
        assert_eq!(budget.remaining(), Duration::from_secs(10));
        assert_eq!(budget.elapsed(), Duration::ZERO);
        assert!(!budget.has_expired());
    }

    #[test]
    fn remaining_shrinks_with_time_and_clamps_at_zero() {
        let control = ClockControl::new();
        let budget = TimeBudget::start(&control.to_clock(), Duration::from_secs(10));

        control.advance(Duration::from_secs(4));
        assert_eq!(budget.remaining(), Duration::from_secs(6));

        control.advance(Duration::from_secs(7));
        assert_eq!(budget.remaining(), Duration::ZERO);
        assert_eq!(budget.elapsed(), Duration::from_secs(11));
        assert!(budget.has_expired());
    }

    #[test]
    fn remaining_is_non_increasing() {
        let control = ClockControl::new();
        let budget = TimeBudget::start(&control.to_clock(), Duration::from_secs(5));

        let mut previous = budget.remaining();
        for _ in 0..10 {
            control.advance(Duration::from_millis(700));
            let current = budget.remaining();
            assert!(current <= previous);
            previous = current;
        }
    }

    #[test]
    fn zero_budget_is_expired_immediately() {
        let control = ClockControl::new();
        let budget = TimeBudget::start(&control.to_clock(), Duration::ZERO);
        assert!(budget.has_expired());
    }
}
