// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Either, select};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::cancellation::CancelToken;
use crate::model::{Replica, ReplicaResult, Verdict};
use crate::time::TimeBudget;

use super::{InFlight, RequestStrategy, StrategyScope, abandon_in_flight};

/// Supplies the stagger delays of the forking strategy.
pub trait ForkingDelaysProvider: Send + Sync + fmt::Debug {
    /// The delay before launching the fork at `fork_index` (1-based: the
    /// first fork after the initial attempt has index 1).
    fn delay(&self, fork_index: usize, budget: &TimeBudget) -> Duration;
}

/// A fixed delay schedule; the last entry repeats for any further forks.
#[derive(Debug, Clone)]
pub struct FixedForkingDelays {
    delays: Vec<Duration>,
}

impl FixedForkingDelays {
    /// Creates a schedule from the given delays. An empty schedule forks
    /// immediately.
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }
}

impl ForkingDelaysProvider for FixedForkingDelays {
    fn delay(&self, fork_index: usize, _budget: &TimeBudget) -> Duration {
        let index = fork_index.saturating_sub(1);
        self.delays
            .get(index.min(self.delays.len().saturating_sub(1)))
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// Hedged dispatch with staggered starts.
///
/// One attempt starts immediately; if it has not completed after the first
/// configured delay, a second replica is attempted in parallel, then a third
/// after the next delay, and so on. A failed attempt forks the next replica
/// immediately instead of waiting out the delay. The first accepted response
/// wins and cancels its siblings.
///
/// Forbidden for requests with a single-use (streaming) body.
#[derive(Debug, Clone)]
pub struct ForkingStrategy {
    delays: Arc<dyn ForkingDelaysProvider>,
}

impl ForkingStrategy {
    /// Creates a strategy over the given delay schedule.
    #[must_use]
    pub fn new(delays: Arc<dyn ForkingDelaysProvider>) -> Self {
        Self { delays }
    }
}

enum Wait {
    Completed(ReplicaResult),
    Drained,
    DelayExpired,
    Cancelled,
}

impl RequestStrategy for ForkingStrategy {
    fn execute<'a>(&'a self, scope: StrategyScope<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let sender = scope.sender;
            let mut futs: FuturesUnordered<BoxFuture<'a, ReplicaResult>> = FuturesUnordered::new();
            let mut inflight: Vec<InFlight> = Vec::new();
            let mut forks = 0usize;

            let mut launch = |replica: Replica, inflight: &mut Vec<InFlight>, futs: &mut FuturesUnordered<_>| {
                let cancel = CancelToken::new();
                let timeout = scope.budget.remaining();
                inflight.push(InFlight {
                    replica: replica.clone(),
                    cancel: cancel.clone(),
                    stopwatch: scope.clock.stopwatch(),
                });
                futs.push(async move { sender.send(&replica, timeout, cancel).await }.boxed());
            };

            let Some(first) = scope.replicas.next() else {
                return;
            };
            launch(first, &mut inflight, &mut futs);

            // Pull ahead by one replica so the next fork needs no draw.
            let mut upcoming = scope.replicas.next();

            loop {
                if scope.cancel.is_cancelled() || scope.budget.has_expired() {
                    abandon_in_flight(&mut inflight, sender);
                    return;
                }

                // While more replicas are available, wait for at most the
                // stagger delay; once exhausted, wait out the budget.
                let wait_for = match upcoming {
                    Some(_) => self.delays.delay(forks + 1, scope.budget),
                    None => scope.budget.remaining(),
                }
                .min(scope.budget.remaining());

                let wait = {
                    let next = pin!(futs.next());
                    let delay = pin!(scope.clock.delay(wait_for));
                    let cancelled = pin!(scope.cancel.cancelled());
                    match select(next, select(delay, cancelled)).await {
                        Either::Left((Some(result), _)) => Wait::Completed(result),
                        Either::Left((None, _)) => Wait::Drained,
                        Either::Right((Either::Left(_), _)) => Wait::DelayExpired,
                        Either::Right((Either::Right(_), _)) => Wait::Cancelled,
                    }
                };

                match wait {
                    Wait::Completed(result) => {
                        inflight.retain(|attempt| attempt.replica != *result.replica());
                        if result.verdict() == Verdict::Accept {
                            abandon_in_flight(&mut inflight, sender);
                            return;
                        }
                        // A failed attempt hedges immediately rather than
                        // waiting out the delay.
                        if let Some(replica) = upcoming.take() {
                            forks += 1;
                            launch(replica, &mut inflight, &mut futs);
                            upcoming = scope.replicas.next();
                        } else if futs.is_empty() {
                            return;
                        }
                    }
                    Wait::DelayExpired => {
                        if scope.budget.has_expired() || upcoming.is_none() {
                            // The budget ran out, either mid-stagger or
                            // while draining.
                            abandon_in_flight(&mut inflight, sender);
                            return;
                        }
                        if let Some(replica) = upcoming.take() {
                            forks += 1;
                            launch(replica, &mut inflight, &mut futs);
                            upcoming = scope.replicas.next();
                        }
                    }
                    Wait::Drained => return,
                    Wait::Cancelled => {
                        abandon_in_flight(&mut inflight, sender);
                        return;
                    }
                }
            }
        })
    }

    fn supports_single_use_body(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delays_repeat_the_last_entry() {
        let delays = FixedForkingDelays::new(vec![Duration::from_millis(50), Duration::from_millis(200)]);
        let clock = crate::time::ClockControl::new().to_clock();
        let budget = TimeBudget::start(&clock, Duration::from_secs(10));

        assert_eq!(delays.delay(1, &budget), Duration::from_millis(50));
        assert_eq!(delays.delay(2, &budget), Duration::from_millis(200));
        assert_eq!(delays.delay(7, &budget), Duration::from_millis(200));
    }

    #[test]
    fn empty_schedule_forks_immediately() {
        let delays = FixedForkingDelays::new(Vec::new());
        let clock = crate::time::ClockControl::new().to_clock();
        let budget = TimeBudget::start(&clock, Duration::from_secs(10));

        assert_eq!(delays.delay(1, &budget), Duration::ZERO);
    }
}
