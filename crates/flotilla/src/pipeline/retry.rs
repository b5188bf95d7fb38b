// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::RequestContext;
use crate::model::{ClusterResult, ClusterStatus};
use crate::pipeline::{PipelineNext, RequestModule};

/// Decides whether a finished execution pass should run again.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// `attempt` is the number of passes completed so far (starting at 1).
    fn should_retry(&self, attempt: usize, result: &ClusterResult) -> bool;
}

/// Retries topology-level failures a bounded number of times.
///
/// Only [`ReplicasNotFound`][ClusterStatus::ReplicasNotFound] and
/// [`ReplicasExhausted`][ClusterStatus::ReplicasExhausted] are worth another
/// pass: the cluster may repopulate, and replica health may already have
/// shifted the ordering. Every other status is final.
#[derive(Debug, Clone, Copy)]
pub struct AttemptLimitRetryPolicy {
    max_attempts: usize,
}

impl AttemptLimitRetryPolicy {
    /// Creates a policy allowing up to `max_attempts` execution passes.
    #[must_use]
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for AttemptLimitRetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RetryPolicy for AttemptLimitRetryPolicy {
    fn should_retry(&self, attempt: usize, result: &ClusterResult) -> bool {
        attempt < self.max_attempts
            && matches!(
                result.status(),
                ClusterStatus::ReplicasNotFound | ClusterStatus::ReplicasExhausted
            )
    }
}

/// Re-runs the inner pipeline while the policy asks for another pass.
///
/// Each pass rebuilds no state: the attempt accumulator keeps growing, and
/// replica ordering naturally reshuffles from what the previous pass taught
/// the weight modifiers. Retrying stops unconditionally once the budget
/// expires or the caller cancels.
pub(crate) struct RetryModule {
    policy: Arc<dyn RetryPolicy>,
}

impl RetryModule {
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self { policy }
    }
}

impl RequestModule for RetryModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                let result = next.proceed(context).await;
                attempt += 1;

                if context.cancel().is_cancelled() || context.budget().has_expired() {
                    return result;
                }
                if !self.policy.should_retry(attempt, &result) {
                    return result;
                }

                tracing::event!(
                    name: "flotilla.retry",
                    tracing::Level::WARN,
                    attempt,
                    status = %result.status(),
                    remaining.ms = context.budget().remaining().as_millis(),
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::executor::block_on;

    use crate::cancellation::CancelToken;
    use crate::context::RequestParameters;
    use crate::model::{Request, Response};
    use crate::storage::ReplicaStorageContainer;
    use crate::strategy::SequentialStrategy;
    use crate::time::{ClockControl, TimeBudget};
    use crate::transport::Transport;

    use super::*;

    struct UnusedTransport;

    impl Transport for UnusedTransport {
        fn send(
            &self,
            _request: Request,
            _connect_timeout: Option<Duration>,
            _timeout: Duration,
            _cancel: CancelToken,
        ) -> BoxFuture<'_, Response> {
            Box::pin(std::future::pending())
        }
    }

    fn test_context() -> RequestContext {
        let clock = ClockControl::new().to_clock();
        RequestContext::new(
            Request::get(http::Uri::from_static("/")),
            RequestParameters::new(),
            Arc::new(SequentialStrategy::default()),
            TimeBudget::start(&clock, Duration::from_secs(5)),
            CancelToken::new(),
            clock,
            Arc::new(UnusedTransport),
            ReplicaStorageContainer::new(),
            3,
        )
    }

    struct ScriptedTail {
        calls: AtomicUsize,
        statuses: Vec<ClusterStatus>,
    }

    impl RequestModule for ScriptedTail {
        fn execute<'a>(&'a self, context: &'a mut RequestContext, _next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self.statuses[call.min(self.statuses.len() - 1)];
            Box::pin(std::future::ready(context.complete(status)))
        }
    }

    fn run_retry(policy: AttemptLimitRetryPolicy, statuses: Vec<ClusterStatus>) -> (ClusterResult, usize) {
        let tail = Arc::new(ScriptedTail {
            calls: AtomicUsize::new(0),
            statuses,
        });
        let chain: Vec<Arc<dyn RequestModule>> = vec![tail.clone()];
        let module = RetryModule::new(Arc::new(policy));
        let mut context = test_context();

        let result = block_on(module.execute(&mut context, PipelineNext::new(&chain)));
        let calls = tail.calls.load(Ordering::SeqCst);
        (result, calls)
    }

    #[test]
    fn retries_until_success() {
        let (result, calls) = run_retry(
            AttemptLimitRetryPolicy::new(3),
            vec![
                ClusterStatus::ReplicasExhausted,
                ClusterStatus::ReplicasExhausted,
                ClusterStatus::Success,
            ],
        );
        assert_eq!(result.status(), ClusterStatus::Success);
        assert_eq!(calls, 3);
    }

    #[test]
    fn attempt_limit_is_respected() {
        let (result, calls) = run_retry(
            AttemptLimitRetryPolicy::new(2),
            vec![ClusterStatus::ReplicasExhausted],
        );
        assert_eq!(result.status(), ClusterStatus::ReplicasExhausted);
        assert_eq!(calls, 2);
    }

    #[test]
    fn non_retryable_statuses_return_immediately() {
        let (result, calls) = run_retry(
            AttemptLimitRetryPolicy::new(5),
            vec![ClusterStatus::IncorrectArguments],
        );
        assert_eq!(result.status(), ClusterStatus::IncorrectArguments);
        assert_eq!(calls, 1);
    }
}
