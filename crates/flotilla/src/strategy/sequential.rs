// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Either, select};

use crate::cancellation::CancelToken;
use crate::model::Verdict;
use crate::time::TimeBudget;

use super::{RequestStrategy, StrategyScope};

/// Allocates a per-attempt timeout from the remaining budget.
pub trait TimeoutsProvider: Send + Sync + fmt::Debug {
    /// The timeout for the attempt at `index` out of `total` replicas.
    fn timeout(&self, budget: &TimeBudget, index: usize, total: usize) -> Duration;
}

/// Splits the remaining budget evenly over the next attempts.
///
/// With division factor `D` and `N` replicas, the first attempt receives
/// `remaining / min(D, N)`; each subsequent attempt divides what is left by
/// one slot fewer. Because the budget shrinks by true elapsed time rather
/// than by allocation, time unused by a fast-failing attempt automatically
/// redistributes to the attempts after it.
#[derive(Debug, Clone, Copy)]
pub struct EqualTimeoutsProvider {
    division_factor: usize,
}

impl EqualTimeoutsProvider {
    /// Creates a provider with the given division factor (at least 1).
    #[must_use]
    pub fn new(division_factor: usize) -> Self {
        Self {
            division_factor: division_factor.max(1),
        }
    }
}

impl TimeoutsProvider for EqualTimeoutsProvider {
    fn timeout(&self, budget: &TimeBudget, index: usize, total: usize) -> Duration {
        let division = self.division_factor.min(total.max(1));
        let slots = division - index.min(division - 1);
        budget.remaining() / slots as u32
    }
}

/// Gives every attempt the same fixed timeout, clamped to the remaining
/// budget by the strategy.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeoutsProvider {
    timeout: Duration,
}

impl FixedTimeoutsProvider {
    /// Creates a provider with the given per-attempt timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TimeoutsProvider for FixedTimeoutsProvider {
    fn timeout(&self, _budget: &TimeBudget, _index: usize, _total: usize) -> Duration {
        self.timeout
    }
}

/// Tries replicas one at a time, each with a timeout from the provider,
/// until an attempt is accepted or the budget runs out.
#[derive(Debug, Clone)]
pub struct SequentialStrategy {
    timeouts: Arc<dyn TimeoutsProvider>,
}

impl SequentialStrategy {
    /// Creates a sequential strategy over the given timeouts provider.
    #[must_use]
    pub fn new(timeouts: Arc<dyn TimeoutsProvider>) -> Self {
        Self { timeouts }
    }
}

impl Default for SequentialStrategy {
    fn default() -> Self {
        Self::new(Arc::new(EqualTimeoutsProvider::new(2)))
    }
}

impl RequestStrategy for SequentialStrategy {
    fn execute<'a>(&'a self, scope: StrategyScope<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            loop {
                if scope.cancel.is_cancelled() || scope.budget.has_expired() {
                    return;
                }

                let index = scope.replicas.index();
                let total = scope.replicas.total();
                let Some(replica) = scope.replicas.next() else {
                    return;
                };

                let timeout = self
                    .timeouts
                    .timeout(scope.budget, index, total)
                    .min(scope.budget.remaining());
                if timeout.is_zero() {
                    return;
                }

                let attempt_cancel = CancelToken::new();
                let stopwatch = scope.clock.stopwatch();

                let completed = {
                    let attempt = pin!(scope.sender.send(&replica, timeout, attempt_cancel.clone()));
                    let cancelled = pin!(scope.cancel.cancelled());
                    match select(attempt, cancelled).await {
                        Either::Left((result, _)) => Some(result),
                        Either::Right(((), _)) => None,
                    }
                };

                match completed {
                    Some(result) => {
                        if result.verdict() == Verdict::Accept {
                            return;
                        }
                    }
                    None => {
                        attempt_cancel.cancel();
                        scope.sender.record_abandoned(&replica, stopwatch.elapsed());
                        return;
                    }
                }
            }
        })
    }
}
