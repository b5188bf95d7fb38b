// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use futures::future::BoxFuture;

use crate::context::RequestContext;
use crate::criteria::ResponseClassifier;
use crate::model::{ClusterResult, Verdict};
use crate::pipeline::{PipelineNext, RequestModule};

/// Toggles for the structured events the client emits.
#[derive(Debug, Clone, Copy)]
pub struct LoggingOptions {
    /// Include the method and URL in the request-started event.
    pub log_request_details: bool,
    /// Include the selected response code in the completion event.
    pub log_result_details: bool,
    /// Emit an event per replica attempt issued.
    pub log_replica_requests: bool,
    /// Emit an event per replica attempt completed.
    pub log_replica_results: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_request_details: true,
            log_result_details: true,
            log_replica_requests: false,
            log_replica_results: false,
        }
    }
}

/// Emits a structured event before and after the rest of the pipeline.
///
/// The completion event is WARN when any configured error-response criterion
/// rejects the selected response, INFO otherwise.
pub(crate) struct LoggingModule {
    options: LoggingOptions,
    error_criteria: Option<ResponseClassifier>,
}

impl LoggingModule {
    pub fn new(options: LoggingOptions, error_criteria: Option<ResponseClassifier>) -> Self {
        Self {
            options,
            error_criteria,
        }
    }

    fn is_error(&self, result: &ClusterResult) -> bool {
        !result.is_successful()
            || self
                .error_criteria
                .as_ref()
                .is_some_and(|criteria| criteria.decide(result.response()) == Verdict::Reject)
    }
}

impl RequestModule for LoggingModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            if self.options.log_request_details {
                tracing::event!(
                    name: "flotilla.request",
                    tracing::Level::INFO,
                    http.method = %context.request().method(),
                    url = %context.request().uri(),
                    timeout.ms = context.budget().total().as_millis(),
                );
            } else {
                tracing::event!(name: "flotilla.request", tracing::Level::INFO, {});
            }

            let result = next.proceed(context).await;
            let elapsed = context.budget().elapsed();

            if self.is_error(&result) {
                tracing::event!(
                    name: "flotilla.result",
                    tracing::Level::WARN,
                    status = %result.status(),
                    code = %result.response().code(),
                    attempts = result.replica_results().len(),
                    elapsed.ms = elapsed.as_millis(),
                );
            } else if self.options.log_result_details {
                tracing::event!(
                    name: "flotilla.result",
                    tracing::Level::INFO,
                    status = %result.status(),
                    code = %result.response().code(),
                    attempts = result.replica_results().len(),
                    elapsed.ms = elapsed.as_millis(),
                );
            } else {
                tracing::event!(
                    name: "flotilla.result",
                    tracing::Level::INFO,
                    status = %result.status(),
                );
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::criteria::{AlwaysAccept, RejectServerErrors, ResponseCriterion};
    use crate::model::{
        ClusterStatus, Replica, ReplicaResult, Request, Response, ResponseCode,
    };

    use super::*;

    fn module_with_error_criteria() -> LoggingModule {
        let criteria: Vec<Arc<dyn ResponseCriterion>> = vec![Arc::new(RejectServerErrors), Arc::new(AlwaysAccept)];
        LoggingModule::new(LoggingOptions::default(), Some(ResponseClassifier::new(criteria)))
    }

    fn result_with(code: ResponseCode, status: ClusterStatus) -> ClusterResult {
        let request = Request::get(http::Uri::from_static("/"));
        let response = Response::new(code);
        let attempt = ReplicaResult::new(
            Replica::parse("http://a/").unwrap(),
            response.clone(),
            Verdict::Accept,
            std::time::Duration::ZERO,
        );
        ClusterResult::new(status, vec![attempt], response, request)
    }

    #[test]
    fn error_criteria_classify_the_selected_response() {
        let module = module_with_error_criteria();

        let healthy = result_with(ResponseCode::OK, ClusterStatus::Success);
        assert!(!module.is_error(&healthy));

        let broken = result_with(ResponseCode::INTERNAL_SERVER_ERROR, ClusterStatus::Success);
        assert!(module.is_error(&broken));
    }

    #[test]
    fn unsuccessful_statuses_are_errors_regardless_of_criteria() {
        let module = LoggingModule::new(LoggingOptions::default(), None);
        let expired = result_with(ResponseCode::OK, ClusterStatus::TimeExpired);
        assert!(module.is_error(&expired));
    }

    #[test]
    fn request_and_result_events_are_emitted() {
        use std::sync::{Arc as StdArc, Mutex};
        use std::time::Duration;

        use futures::executor::block_on;
        use futures::future::BoxFuture;

        use crate::cancellation::CancelToken;
        use crate::context::{RequestContext, RequestParameters};
        use crate::storage::ReplicaStorageContainer;
        use crate::strategy::SequentialStrategy;
        use crate::time::{ClockControl, TimeBudget};
        use crate::transport::Transport;

        #[derive(Clone, Default)]
        struct BufferWriter(StdArc<Mutex<Vec<u8>>>);

        impl std::io::Write for BufferWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().expect("buffer lock").extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for BufferWriter {
            type Writer = Self;

            fn make_writer(&'a self) -> Self::Writer {
                self.clone()
            }
        }

        struct UnusedTransport;

        impl Transport for UnusedTransport {
            fn send(
                &self,
                _request: crate::model::Request,
                _connect_timeout: Option<Duration>,
                _timeout: Duration,
                _cancel: CancelToken,
            ) -> BoxFuture<'_, crate::model::Response> {
                Box::pin(std::future::pending())
            }
        }

        struct SucceedingTail;

        impl RequestModule for SucceedingTail {
            fn execute<'a>(
                &'a self,
                context: &'a mut RequestContext,
                _next: PipelineNext<'a>,
            ) -> BoxFuture<'a, ClusterResult> {
                Box::pin(std::future::ready(context.complete(ClusterStatus::Success)))
            }
        }

        let buffer = BufferWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let clock = ClockControl::new().to_clock();
        let mut context = RequestContext::new(
            crate::model::Request::get(http::Uri::from_static("/ping")),
            RequestParameters::new(),
            StdArc::new(SequentialStrategy::default()),
            TimeBudget::start(&clock, Duration::from_secs(5)),
            CancelToken::new(),
            clock,
            StdArc::new(UnusedTransport),
            ReplicaStorageContainer::new(),
            3,
        );

        let module = LoggingModule::new(LoggingOptions::default(), None);
        let tail: Vec<StdArc<dyn RequestModule>> = vec![StdArc::new(SucceedingTail)];
        let result = block_on(module.execute(&mut context, PipelineNext::new(&tail)));
        assert_eq!(result.status(), ClusterStatus::Success);

        let output = String::from_utf8(buffer.0.lock().expect("buffer lock").clone()).expect("utf8 log output");
        assert!(output.contains("flotilla::pipeline::logging"), "target missing: {output}");
        assert!(output.contains("/ping"));
        assert!(output.contains("status=Success"));
    }
}
