// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;

use futures::FutureExt;
use futures::future::{BoxFuture, Either, select};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::cancellation::CancelToken;
use crate::model::{ReplicaResult, Verdict};

use super::{InFlight, RequestStrategy, StrategyScope, abandon_in_flight};

/// Dispatches to up to `parallelism` replicas at once.
///
/// The first `parallelism` replicas are attempted simultaneously; whenever an
/// attempt completes without acceptance and more replicas remain, the pool is
/// topped back up. The first accepted response wins and the remaining
/// in-flight attempts are cancelled and recorded as abandoned.
///
/// Forbidden for requests with a single-use (streaming) body, since the same
/// body cannot feed several concurrent attempts.
#[derive(Debug, Clone, Copy)]
pub struct ParallelStrategy {
    parallelism: usize,
}

impl ParallelStrategy {
    /// Creates a strategy with the given parallelism level (at least 1).
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }
}

enum Step {
    Completed(ReplicaResult),
    Stop,
}

impl RequestStrategy for ParallelStrategy {
    fn execute<'a>(&'a self, scope: StrategyScope<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let sender = scope.sender;
            let mut futs: FuturesUnordered<BoxFuture<'a, ReplicaResult>> = FuturesUnordered::new();
            let mut inflight: Vec<InFlight> = Vec::new();

            loop {
                while inflight.len() < self.parallelism
                    && !scope.budget.has_expired()
                    && !scope.cancel.is_cancelled()
                {
                    let Some(replica) = scope.replicas.next() else {
                        break;
                    };

                    let cancel = CancelToken::new();
                    let timeout = scope.budget.remaining();
                    inflight.push(InFlight {
                        replica: replica.clone(),
                        cancel: cancel.clone(),
                        stopwatch: scope.clock.stopwatch(),
                    });
                    futs.push(async move { sender.send(&replica, timeout, cancel).await }.boxed());
                }

                if futs.is_empty() {
                    return;
                }

                let step = {
                    let next = pin!(futs.next());
                    let delay = pin!(scope.clock.delay(scope.budget.remaining()));
                    let cancelled = pin!(scope.cancel.cancelled());
                    let stop = select(delay, cancelled);
                    match select(next, stop).await {
                        Either::Left((Some(result), _)) => Step::Completed(result),
                        Either::Left((None, _)) | Either::Right(_) => Step::Stop,
                    }
                };

                match step {
                    Step::Completed(result) => {
                        inflight.retain(|attempt| attempt.replica != *result.replica());
                        if result.verdict() == Verdict::Accept {
                            abandon_in_flight(&mut inflight, sender);
                            return;
                        }
                    }
                    Step::Stop => {
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
