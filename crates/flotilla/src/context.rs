// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancellation::CancelToken;
use crate::model::{ClusterResult, ClusterStatus, ReplicaResult, Request, Response};
use crate::storage::ReplicaStorageContainer;
use crate::strategy::RequestStrategy;
use crate::time::{Clock, TimeBudget};
use crate::transport::Transport;

/// Relative importance of a request, propagated to replicas so servers can
/// shed load sensibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// May be dropped first under pressure.
    Sheddable,
    /// Regular traffic.
    Ordinary,
    /// Shed last.
    Critical,
}

impl Priority {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Sheddable => "sheddable",
            Self::Ordinary => "ordinary",
            Self::Critical => "critical",
        }
    }
}

/// Per-request options: dispatch strategy, priority, and custom properties.
#[derive(Debug, Clone, Default)]
pub struct RequestParameters {
    strategy: Option<Arc<dyn RequestStrategy>>,
    priority: Option<Priority>,
    properties: HashMap<String, String>,
}

impl RequestParameters {
    /// Creates empty parameters; the client fills in its defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the dispatch strategy for this request.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn RequestStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Sets the request priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Attaches an opaque property readable by user modules and modifiers.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The strategy override, if any.
    #[must_use]
    pub fn strategy(&self) -> Option<&Arc<dyn RequestStrategy>> {
        self.strategy.as_ref()
    }

    /// The priority, if set.
    #[must_use]
    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Looks up a custom property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Append-only collector of attempt results, shared across concurrent
/// attempts. Results land in completion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResultAccumulator {
    results: Arc<Mutex<Vec<ReplicaResult>>>,
}

impl ResultAccumulator {
    pub fn push(&self, result: ReplicaResult) {
        self.results.lock().push(result);
    }

    pub fn snapshot(&self) -> Vec<ReplicaResult> {
        self.results.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }
}

/// Mutable per-request state threaded through the pipeline.
///
/// Created at pipeline entry, destroyed at pipeline exit; it never escapes
/// the pipeline. Modules may mutate the request on the way in; after `next`
/// returns, only the response side of the result may change.
pub struct RequestContext {
    request: Request,
    parameters: RequestParameters,
    strategy: Arc<dyn RequestStrategy>,
    budget: TimeBudget,
    cancel: CancelToken,
    clock: Clock,
    transport: Arc<dyn Transport>,
    storage: ReplicaStorageContainer,
    maximum_replicas: usize,
    results: ResultAccumulator,
}

impl RequestContext {
    #[expect(clippy::too_many_arguments, reason = "assembled in one place by the client")]
    pub(crate) fn new(
        request: Request,
        parameters: RequestParameters,
        strategy: Arc<dyn RequestStrategy>,
        budget: TimeBudget,
        cancel: CancelToken,
        clock: Clock,
        transport: Arc<dyn Transport>,
        storage: ReplicaStorageContainer,
        maximum_replicas: usize,
    ) -> Self {
        Self {
            request,
            parameters,
            strategy,
            budget,
            cancel,
            clock,
            transport,
            storage,
            maximum_replicas,
            results: ResultAccumulator::default(),
        }
    }

    /// The request being dispatched.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable access to the request. Must not be used after `next` returns.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The per-request parameters.
    #[must_use]
    pub fn parameters(&self) -> &RequestParameters {
        &self.parameters
    }

    /// The resolved dispatch strategy for this request.
    #[must_use]
    pub fn strategy(&self) -> &Arc<dyn RequestStrategy> {
        &self.strategy
    }

    /// The time budget of this request.
    #[must_use]
    pub fn budget(&self) -> &TimeBudget {
        &self.budget
    }

    pub(crate) fn trim_budget(&mut self, total: std::time::Duration) {
        self.budget = self.budget.with_total(total);
    }

    /// The cancellation signal of this request.
    #[must_use]
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// The clock all timing in this request runs on.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The shared transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The per-replica state container in effect for this request.
    #[must_use]
    pub fn storage(&self) -> &ReplicaStorageContainer {
        &self.storage
    }

    /// The cap on replicas used for this request.
    #[must_use]
    pub fn maximum_replicas(&self) -> usize {
        self.maximum_replicas
    }

    /// The number of attempt results collected so far.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.results.len()
    }

    pub(crate) fn results(&self) -> &ResultAccumulator {
        &self.results
    }

    /// Builds a terminal result from the current state, without selecting a
    /// response. Used by modules that short-circuit the pipeline.
    #[must_use]
    pub fn complete(&self, status: ClusterStatus) -> ClusterResult {
        ClusterResult::new(status, self.results.snapshot(), Response::none(), self.request.clone())
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("budget", &self.budget)
            .field("maximum_replicas", &self.maximum_replicas)
            .field("attempts", &self.results.len())
            .finish_non_exhaustive()
    }
}
