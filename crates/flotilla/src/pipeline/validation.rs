// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use futures::future::BoxFuture;
use http::Method;

use crate::context::RequestContext;
use crate::model::{ClusterResult, ClusterStatus};
use crate::pipeline::{PipelineNext, RequestModule};

/// The widest total timeout a request may carry; anything above is trimmed.
pub(crate) const MAXIMUM_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

fn reject(context: &RequestContext, reason: &str) -> ClusterResult {
    tracing::event!(
        name: "flotilla.invalid_request",
        tracing::Level::WARN,
        url = %context.request().uri(),
        reason,
    );
    context.complete(ClusterStatus::IncorrectArguments)
}

/// Rejects requests the transport or the chosen strategy cannot carry.
pub(crate) struct RequestValidationModule;

impl RequestModule for RequestValidationModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            let body = context.request().body();

            if let Some(capability) = body.required_capability()
                && !context.transport().supports(capability)
            {
                return reject(context, "the transport does not support the request body");
            }

            if body.is_single_use() && !context.strategy().supports_single_use_body() {
                return reject(context, "a single-use body cannot be dispatched concurrently");
            }

            next.proceed(context).await
        })
    }
}

/// Rejects methods outside the supported set.
pub(crate) struct HttpMethodValidationModule;

const SUPPORTED_METHODS: [Method; 8] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::HEAD,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
    Method::TRACE,
];

impl RequestModule for HttpMethodValidationModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            if !SUPPORTED_METHODS.contains(context.request().method()) {
                return reject(context, "unsupported request method");
            }
            next.proceed(context).await
        })
    }
}

/// Rejects empty budgets and trims absurdly large ones.
pub(crate) struct TimeoutValidationModule;

impl RequestModule for TimeoutValidationModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            let total = context.budget().total();
            if total.is_zero() {
                return reject(context, "the request timeout must be positive");
            }
            if total > MAXIMUM_TIMEOUT {
                context.trim_budget(MAXIMUM_TIMEOUT);
            }
            next.proceed(context).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::executor::block_on;

    use crate::cancellation::CancelToken;
    use crate::context::RequestParameters;
    use crate::model::{Body, Request, Response, StreamBody};
    use crate::storage::ReplicaStorageContainer;
    use crate::strategy::{ParallelStrategy, RequestStrategy, SequentialStrategy};
    use crate::time::{ClockControl, TimeBudget};
    use crate::transport::{Capability, Transport};

    use super::*;

    struct CapabilityTransport {
        streaming: bool,
    }

    impl Transport for CapabilityTransport {
        fn send(
            &self,
            _request: Request,
            _connect_timeout: Option<Duration>,
            _timeout: Duration,
            _cancel: CancelToken,
        ) -> BoxFuture<'_, Response> {
            Box::pin(std::future::pending())
        }

        fn supports(&self, capability: Capability) -> bool {
            match capability {
                Capability::RequestStreaming => self.streaming,
                Capability::RequestCompositeBody => false,
            }
        }
    }

    struct SucceedingTail;

    impl RequestModule for SucceedingTail {
        fn execute<'a>(&'a self, context: &'a mut RequestContext, _next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
            Box::pin(std::future::ready(context.complete(ClusterStatus::Success)))
        }
    }

    fn context_with(
        request: Request,
        strategy: Arc<dyn RequestStrategy>,
        streaming_transport: bool,
        timeout: Duration,
    ) -> RequestContext {
        let clock = ClockControl::new().to_clock();
        RequestContext::new(
            request,
            RequestParameters::new(),
            strategy,
            TimeBudget::start(&clock, timeout),
            CancelToken::new(),
            clock,
            Arc::new(CapabilityTransport {
                streaming: streaming_transport,
            }),
            ReplicaStorageContainer::new(),
            3,
        )
    }

    fn run(module: &dyn RequestModule, context: &mut RequestContext) -> ClusterResult {
        let tail: Vec<Arc<dyn RequestModule>> = vec![Arc::new(SucceedingTail)];
        block_on(module.execute(context, PipelineNext::new(&tail)))
    }

    fn streaming_request() -> Request {
        Request::post(http::Uri::from_static("/upload"))
            .with_body(Body::Stream(StreamBody::new(futures::stream::empty())))
    }

    #[test]
    fn streaming_body_with_parallel_strategy_is_rejected() {
        let mut context = context_with(
            streaming_request(),
            Arc::new(ParallelStrategy::new(2)),
            true,
            Duration::from_secs(5),
        );
        let result = run(&RequestValidationModule, &mut context);
        assert_eq!(result.status(), ClusterStatus::IncorrectArguments);
    }

    #[test]
    fn streaming_body_with_sequential_strategy_passes() {
        let mut context = context_with(
            streaming_request(),
            Arc::new(SequentialStrategy::default()),
            true,
            Duration::from_secs(5),
        );
        let result = run(&RequestValidationModule, &mut context);
        assert_eq!(result.status(), ClusterStatus::Success);
    }

    #[test]
    fn unsupported_body_capability_is_rejected() {
        let mut context = context_with(
            streaming_request(),
            Arc::new(SequentialStrategy::default()),
            false,
            Duration::from_secs(5),
        );
        let result = run(&RequestValidationModule, &mut context);
        assert_eq!(result.status(), ClusterStatus::IncorrectArguments);
    }

    #[test]
    fn unsupported_method_is_rejected() {
        let request = Request::new(
            Method::from_bytes(b"BREW").unwrap(),
            http::Uri::from_static("/coffee"),
        );
        let mut context = context_with(
            request,
            Arc::new(SequentialStrategy::default()),
            true,
            Duration::from_secs(5),
        );
        let result = run(&HttpMethodValidationModule, &mut context);
        assert_eq!(result.status(), ClusterStatus::IncorrectArguments);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut context = context_with(
            Request::get(http::Uri::from_static("/")),
            Arc::new(SequentialStrategy::default()),
            true,
            Duration::ZERO,
        );
        let result = run(&TimeoutValidationModule, &mut context);
        assert_eq!(result.status(), ClusterStatus::IncorrectArguments);
    }

    #[test]
    fn oversized_timeout_is_trimmed() {
        let mut context = context_with(
            Request::get(http::Uri::from_static("/")),
            Arc::new(SequentialStrategy::default()),
            true,
            MAXIMUM_TIMEOUT * 4,
        );
        let result = run(&TimeoutValidationModule, &mut context);
        assert_eq!(result.status(), ClusterStatus::Success);
        assert_eq!(context.budget().total(), MAXIMUM_TIMEOUT);
    }
}
