// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, select};

use crate::context::RequestContext;
use crate::criteria::ResponseClassifier;
use crate::model::{ClusterResult, ClusterStatus};
use crate::ordering::ReplicaOrdering;
use crate::pipeline::{PipelineNext, RequestModule};
use crate::selector::{ResponseSelector, select_status};
use crate::sender::RequestSender;
use crate::strategy::{ReplicaStream, StrategyScope};
use crate::topology::{ClusterProvider, ReplicaTransform, deduplicate};

/// The innermost module: resolves the cluster, orders it, hands the stream
/// to the strategy, and folds the accumulated attempts into the terminal
/// result.
pub(crate) struct ExecutionModule {
    pub provider: Arc<dyn ClusterProvider>,
    pub ordering: Arc<dyn ReplicaOrdering>,
    pub transform: Arc<dyn ReplicaTransform>,
    pub classifier: ResponseClassifier,
    pub selector: Arc<dyn ResponseSelector>,
    pub connection_timeout: Option<Duration>,
    pub deduplicate_urls: bool,
    pub log_replica_requests: bool,
    pub log_replica_results: bool,
}

impl RequestModule for ExecutionModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, _next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            let mut replicas = self.provider.get_cluster();
            if self.deduplicate_urls {
                replicas = deduplicate(replicas);
            }

            if replicas.is_empty() {
                tracing::event!(
                    name: "flotilla.no_replicas",
                    tracing::Level::WARN,
                    url = %context.request().uri(),
                );
                return context.complete(ClusterStatus::ReplicasNotFound);
            }

            let ordered = self
                .ordering
                .order(&replicas, context.storage(), context.request(), context.parameters());
            let mut stream = ReplicaStream::new(ordered, replicas.len(), context.maximum_replicas());

            let sender = RequestSender {
                transport: context.transport().as_ref(),
                transform: self.transform.as_ref(),
                classifier: &self.classifier,
                ordering: self.ordering.as_ref(),
                storage: context.storage(),
                request: context.request(),
                results: context.results(),
                clock: context.clock(),
                connection_timeout: self.connection_timeout,
                log_replica_requests: self.log_replica_requests,
                log_replica_results: self.log_replica_results,
            };

            let strategy = Arc::clone(context.strategy());
            let scope = StrategyScope {
                request: context.request(),
                parameters: context.parameters(),
                sender: &sender,
                budget: context.budget(),
                replicas: &mut stream,
                cancel: context.cancel(),
                clock: context.clock(),
            };

            // The strategy checks the cancel signal itself; this outer race
            // guarantees promptness even for a strategy stuck in transport.
            {
                let dispatch = pin!(strategy.execute(scope));
                let cancelled = pin!(context.cancel().cancelled());
                // On cancellation the dispatch future is simply dropped,
                // which aborts every in-flight attempt with it.
                let _ = select(dispatch, cancelled).await;
            }

            let results = context.results().snapshot();
            let response = self
                .selector
                .select(context.request(), context.parameters(), &results);
            let status = select_status(&results, context.budget(), context.cancel());

            ClusterResult::new(status, results, response, context.request().clone())
        })
    }
}
