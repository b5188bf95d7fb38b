// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;
use std::time::Duration;

use futures::future::{BoxFuture, Either, select};

use crate::cancellation::CancelToken;
use crate::context::ResultAccumulator;
use crate::criteria::ResponseClassifier;
use crate::model::{Replica, ReplicaResult, Request, Response, Verdict};
use crate::ordering::ReplicaOrdering;
use crate::storage::ReplicaStorageContainer;
use crate::strategy::AttemptSender;
use crate::time::Clock;
use crate::topology::ReplicaTransform;
use crate::transport::Transport;

/// Executes single-replica attempts for one request.
///
/// The sender rebases the request onto the replica, races the transport
/// against the per-attempt timeout, classifies the outcome, appends it to the
/// accumulator, and feeds the ordering's learning loop. Abandoned attempts
/// are recorded as synthetic cancellations and deliberately kept away from
/// `learn`: a replica must not lose health because a sibling won the race.
pub(crate) struct RequestSender<'a> {
    pub transport: &'a dyn Transport,
    pub transform: &'a dyn ReplicaTransform,
    pub classifier: &'a ResponseClassifier,
    pub ordering: &'a dyn ReplicaOrdering,
    pub storage: &'a ReplicaStorageContainer,
    pub request: &'a Request,
    pub results: &'a ResultAccumulator,
    pub clock: &'a Clock,
    pub connection_timeout: Option<Duration>,
    pub log_replica_requests: bool,
    pub log_replica_results: bool,
}

impl RequestSender<'_> {
    async fn run_attempt(&self, replica: &Replica, timeout: Duration, cancel: CancelToken) -> ReplicaResult {
        let stopwatch = self.clock.stopwatch();
        let request = self.transform.transform(replica, self.request.clone());

        if self.log_replica_requests {
            tracing::event!(
                name: "flotilla.replica_request",
                tracing::Level::DEBUG,
                replica = %replica,
                url = %request.uri(),
                timeout.ms = timeout.as_millis(),
            );
        }

        let response = {
            let attempt = pin!(self.transport.send(request, self.connection_timeout, timeout, cancel.clone()));
            let deadline = pin!(self.clock.delay(timeout));
            match select(attempt, deadline).await {
                Either::Left((response, _)) => response,
                Either::Right(((), _)) => {
                    // The transport did not return promptly; cancel it and
                    // synthesize the timeout.
                    cancel.cancel();
                    Response::timeout()
                }
            }
        };

        let verdict = self.classifier.decide(&response);
        let result = ReplicaResult::new(replica.clone(), response, verdict, stopwatch.elapsed());

        if self.log_replica_results {
            tracing::event!(
                name: "flotilla.replica_result",
                tracing::Level::DEBUG,
                replica = %replica,
                code = %result.response().code(),
                verdict = ?result.verdict(),
                elapsed.ms = result.elapsed().as_millis(),
            );
        }

        self.results.push(result.clone());
        self.ordering.learn(&result, self.storage);
        result
    }
}

impl AttemptSender for RequestSender<'_> {
    fn send<'a>(&'a self, replica: &'a Replica, timeout: Duration, cancel: CancelToken) -> BoxFuture<'a, ReplicaResult> {
        Box::pin(self.run_attempt(replica, timeout, cancel))
    }

    fn record_abandoned(&self, replica: &Replica, elapsed: Duration) {
        let result = ReplicaResult::new(replica.clone(), Response::canceled(), Verdict::DontKnow, elapsed);
        self.results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::executor::block_on;

    use crate::criteria::default_criteria;
    use crate::model::ResponseCode;
    use crate::ordering::WeightedOrdering;
    use crate::time::ClockControl;
    use crate::topology::DefaultReplicaTransform;
    use crate::transport::Capability;

    use super::*;

    struct ScriptedTransport {
        response: Response,
        delay: Duration,
        clock: Clock,
        observed_cancel: Arc<AtomicBool>,
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            _request: Request,
            _connect_timeout: Option<Duration>,
            _timeout: Duration,
            cancel: CancelToken,
        ) -> BoxFuture<'_, Response> {
            let response = self.response.clone();
            let delay = self.delay;
            let clock = self.clock.clone();
            let observed = Arc::clone(&self.observed_cancel);
            Box::pin(async move {
                clock.delay(delay).await;
                if cancel.is_cancelled() {
                    observed.store(true, Ordering::SeqCst);
                }
                response
            })
        }

        fn supports(&self, _capability: Capability) -> bool {
            true
        }
    }

    fn noop_ordering() -> WeightedOrdering {
        WeightedOrdering::with_seed(Vec::new(), 0)
    }

    fn sender_parts() -> (
        ClockControl,
        ReplicaStorageContainer,
        ResultAccumulator,
        ResponseClassifier,
        Request,
    ) {
        (
            ClockControl::new().auto_advance(true),
            ReplicaStorageContainer::new(),
            ResultAccumulator::default(),
            ResponseClassifier::new(default_criteria()),
            Request::get(http::Uri::from_static("/ping")),
        )
    }

    #[test]
    fn attempt_classifies_and_records() {
        let (control, storage, results, classifier, request) = sender_parts();
        let clock = control.to_clock();
        let transport = ScriptedTransport {
            response: Response::new(ResponseCode::OK),
            delay: Duration::from_millis(100),
            clock: clock.clone(),
            observed_cancel: Arc::new(AtomicBool::new(false)),
        };
        let ordering = noop_ordering();

        let sender = RequestSender {
            transport: &transport,
            transform: &DefaultReplicaTransform,
            classifier: &classifier,
            ordering: &ordering,
            storage: &storage,
            request: &request,
            results: &results,
            clock: &clock,
            connection_timeout: None,
            log_replica_requests: false,
            log_replica_results: false,
        };

        let replica = Replica::parse("http://a/").unwrap();
        let result = block_on(sender.send(&replica, Duration::from_secs(5), CancelToken::new()));

        assert_eq!(result.verdict(), Verdict::Accept);
        assert_eq!(result.elapsed(), Duration::from_millis(100));
        assert_eq!(results.snapshot().len(), 1);
    }

    #[test]
    fn slow_transport_yields_a_synthetic_timeout() {
        let (control, storage, results, classifier, request) = sender_parts();
        let clock = control.to_clock();
        let transport = ScriptedTransport {
            response: Response::new(ResponseCode::OK),
            delay: Duration::from_secs(30),
            clock: clock.clone(),
            observed_cancel: Arc::new(AtomicBool::new(false)),
        };
        let ordering = noop_ordering();

        let sender = RequestSender {
            transport: &transport,
            transform: &DefaultReplicaTransform,
            classifier: &classifier,
            ordering: &ordering,
            storage: &storage,
            request: &request,
            results: &results,
            clock: &clock,
            connection_timeout: None,
            log_replica_requests: false,
            log_replica_results: false,
        };

        let replica = Replica::parse("http://a/").unwrap();
        let result = block_on(sender.send(&replica, Duration::from_secs(1), CancelToken::new()));

        assert_eq!(result.response().code(), ResponseCode::REQUEST_TIMEOUT);
        assert_eq!(result.verdict(), Verdict::Reject);
        assert_eq!(result.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn abandoned_attempts_are_recorded_without_learning() {
        let (_, storage, results, classifier, request) = sender_parts();
        let clock = ClockControl::new().to_clock();
        let transport = ScriptedTransport {
            response: Response::new(ResponseCode::OK),
            delay: Duration::ZERO,
            clock: clock.clone(),
            observed_cancel: Arc::new(AtomicBool::new(false)),
        };
        let ordering = noop_ordering();

        let sender = RequestSender {
            transport: &transport,
            transform: &DefaultReplicaTransform,
            classifier: &classifier,
            ordering: &ordering,
            storage: &storage,
            request: &request,
            results: &results,
            clock: &clock,
            connection_timeout: None,
            log_replica_requests: false,
            log_replica_results: false,
        };

        let replica = Replica::parse("http://a/").unwrap();
        sender.record_abandoned(&replica, Duration::from_millis(40));

        let snapshot = results.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].verdict(), Verdict::DontKnow);
        assert_eq!(snapshot[0].response().code(), ResponseCode::CANCELED);
    }
}
