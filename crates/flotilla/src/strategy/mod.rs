// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Request dispatch strategies.
//!
//! A strategy consumes the ordered replica stream and coordinates attempts
//! against the time budget. All strategies share the same termination rules:
//! stop immediately on cancellation, stop when the budget expires, stop when
//! the replica stream is exhausted, and stop when any attempt's verdict is
//! [`Accept`][crate::Verdict::Accept].

mod forking;
mod parallel;
mod sequential;

pub use forking::{FixedForkingDelays, ForkingDelaysProvider, ForkingStrategy};
pub use parallel::ParallelStrategy;
pub use sequential::{EqualTimeoutsProvider, FixedTimeoutsProvider, SequentialStrategy, TimeoutsProvider};

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::cancellation::CancelToken;
use crate::context::RequestParameters;
use crate::model::{Replica, ReplicaResult, Request};
use crate::ordering::OrderedReplicas;
use crate::time::{Clock, Stopwatch, TimeBudget};

/// Issues single-replica attempts on behalf of a strategy.
///
/// The concrete sender runs the transport, classifies the response, records
/// the result, and feeds the ordering's learning loop. Strategies only decide
/// *which* replicas to try, *when*, and with *what timeout*.
pub trait AttemptSender: Send + Sync {
    /// Runs one attempt against one replica.
    fn send<'a>(&'a self, replica: &'a Replica, timeout: Duration, cancel: CancelToken) -> BoxFuture<'a, ReplicaResult>;

    /// Records a synthetic result for an attempt abandoned before completion.
    fn record_abandoned(&self, replica: &Replica, elapsed: Duration);
}

/// The inputs a strategy consumes.
pub struct StrategyScope<'a> {
    /// The request being dispatched.
    pub request: &'a Request,
    /// The per-request parameters.
    pub parameters: &'a RequestParameters,
    /// Issues attempts and records their results.
    pub sender: &'a dyn AttemptSender,
    /// The time budget of the request.
    pub budget: &'a TimeBudget,
    /// The ordered, capped replica stream. Single-consumer.
    pub replicas: &'a mut ReplicaStream,
    /// The request-level cancellation signal.
    pub cancel: &'a CancelToken,
    /// The clock to wait on.
    pub clock: &'a Clock,
}

impl fmt::Debug for StrategyScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyScope")
            .field("budget", &self.budget)
            .field("replicas", &self.replicas)
            .finish_non_exhaustive()
    }
}

/// The policy governing how many attempts run, in parallel or sequence, and
/// when to stop.
///
/// A strategy yields no value; its side effect is the set of
/// [`ReplicaResult`]s accumulated through the sender.
pub trait RequestStrategy: Send + Sync + fmt::Debug {
    /// Dispatches the request over the ordered replicas.
    fn execute<'a>(&'a self, scope: StrategyScope<'a>) -> BoxFuture<'a, ()>;

    /// Whether this strategy can carry a single-use (streaming) body.
    ///
    /// Strategies that may submit the same request concurrently must return
    /// `false`; validation rejects streaming requests for them upfront.
    fn supports_single_use_body(&self) -> bool {
        true
    }
}

/// The ordered replica stream handed to a strategy, capped at the configured
/// maximum number of replicas per request.
#[derive(Debug)]
pub struct ReplicaStream {
    inner: OrderedReplicas,
    total: usize,
    taken: usize,
}

impl ReplicaStream {
    pub(crate) fn new(inner: OrderedReplicas, cluster_size: usize, cap: usize) -> Self {
        Self {
            inner,
            total: cluster_size.min(cap),
            taken: 0,
        }
    }

    /// Pulls the next replica; `None` once the cap or the cluster is
    /// exhausted.
    pub fn next(&mut self) -> Option<Replica> {
        if self.taken >= self.total {
            return None;
        }
        let replica = self.inner.next()?;
        self.taken += 1;
        Some(replica)
    }

    /// How many replicas this stream will yield in total.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// How many replicas have been pulled so far.
    #[must_use]
    pub fn index(&self) -> usize {
        self.taken
    }
}

/// Bookkeeping for one launched attempt, used to cancel and record the
/// stragglers when a strategy stops early.
pub(crate) struct InFlight {
    pub replica: Replica,
    pub cancel: CancelToken,
    pub stopwatch: Stopwatch,
}

/// Cancels and records every still-running attempt as abandoned.
pub(crate) fn abandon_in_flight(inflight: &mut Vec<InFlight>, sender: &dyn AttemptSender) {
    for attempt in inflight.drain(..) {
        attempt.cancel.cancel();
        sender.record_abandoned(&attempt.replica, attempt.stopwatch.elapsed());
    }
}
