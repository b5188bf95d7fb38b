// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancelToken;
use crate::context::{RequestContext, RequestParameters};
use crate::criteria::{ResponseClassifier, ResponseCriterion, default_criteria};
use crate::error::{Error, Result};
use crate::model::{ClusterResult, Request};
use crate::ordering::{ReplicaOrdering, WeightModifier, WeightedOrdering};
use crate::pipeline::error_handling::GlobalErrorHandlingModule;
use crate::pipeline::execution::ExecutionModule;
use crate::pipeline::logging::LoggingModule;
use crate::pipeline::priority::PriorityModule;
use crate::pipeline::retry::RetryModule;
use crate::pipeline::transforms::{RequestTransformationModule, ResponseTransformationModule};
use crate::pipeline::validation::{HttpMethodValidationModule, RequestValidationModule, TimeoutValidationModule};
use crate::pipeline::{
    AttemptLimitRetryPolicy, LoggingOptions, ModuleGroup, PipelineNext, RequestModule, RequestTransform,
    ResponseTransform, RetryPolicy,
};
use crate::selector::{BestVerdictSelector, ResponseSelector};
use crate::storage::{ReplicaStorageContainer, ReplicaStorageScope};
use crate::strategy::{RequestStrategy, SequentialStrategy};
use crate::throttling::{AdaptiveThrottlingModule, AdaptiveThrottlingOptions};
use crate::time::{Clock, TimeBudget};
use crate::topology::{ClusterProvider, DefaultReplicaTransform, ReplicaTransform};
use crate::transport::Transport;

/// A cluster-aware HTTP client.
///
/// Given a logical service's replica set, the client dispatches each request
/// to one or more replicas according to the configured strategy, applying
/// ordering, health-based weighting, retry, and deadline semantics until a
/// satisfactory response is obtained or the time budget is exhausted.
///
/// The client is cheap to clone; clones share the pipeline, the transport,
/// and (with [`ReplicaStorageScope::Process`]) the learned per-replica state.
///
/// Build one with [`ClusterClient::builder`]; see the
/// [crate documentation][crate] for a complete example.
#[derive(Clone)]
pub struct ClusterClient {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    chain: Vec<Arc<dyn RequestModule>>,
    transport: Arc<dyn Transport>,
    default_strategy: Arc<dyn RequestStrategy>,
    clock: Clock,
    default_timeout: Duration,
    maximum_replicas: usize,
    storage_scope: ReplicaStorageScope,
    process_storage: ReplicaStorageContainer,
}

impl ClusterClient {
    /// Starts configuring a new client.
    #[must_use]
    pub fn builder() -> ClusterClientBuilder {
        ClusterClientBuilder::new()
    }

    /// Dispatches a request with the default timeout and parameters.
    pub async fn send(&self, request: Request) -> ClusterResult {
        self.send_with(request, RequestParameters::new(), None, CancelToken::new())
            .await
    }

    /// Dispatches a request with explicit parameters, an optional timeout
    /// override, and a caller-owned cancellation token.
    ///
    /// Never fails: every outcome, including invalid input, is reported
    /// through the returned [`ClusterResult`].
    pub async fn send_with(
        &self,
        request: Request,
        parameters: RequestParameters,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> ClusterResult {
        let shared = &self.shared;
        let budget = TimeBudget::start(&shared.clock, timeout.unwrap_or(shared.default_timeout));
        let storage = match shared.storage_scope {
            ReplicaStorageScope::Process => shared.process_storage.clone(),
            ReplicaStorageScope::Request => ReplicaStorageContainer::new(),
        };
        let strategy = parameters
            .strategy()
            .cloned()
            .unwrap_or_else(|| Arc::clone(&shared.default_strategy));

        let mut context = RequestContext::new(
            request,
            parameters,
            strategy,
            budget,
            cancel,
            shared.clock.clone(),
            Arc::clone(&shared.transport),
            storage,
            shared.maximum_replicas,
        );

        PipelineNext::new(&shared.chain).proceed(&mut context).await
    }
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("default_timeout", &self.shared.default_timeout)
            .field("maximum_replicas", &self.shared.maximum_replicas)
            .field("storage_scope", &self.shared.storage_scope)
            .field("modules", &self.shared.chain.len())
            .finish_non_exhaustive()
    }
}

/// Configures and validates a [`ClusterClient`].
///
/// Required: a transport, a cluster provider, and a positive default
/// timeout. Everything else has defaults matching a plain sequential client.
pub struct ClusterClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    provider: Option<Arc<dyn ClusterProvider>>,
    default_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
    maximum_replicas: usize,
    storage_scope: ReplicaStorageScope,
    deduplicate_request_url: bool,
    validate_http_method: bool,
    clock: Clock,
    default_strategy: Arc<dyn RequestStrategy>,
    replica_transform: Arc<dyn ReplicaTransform>,
    response_selector: Arc<dyn ResponseSelector>,
    ordering: Option<Arc<dyn ReplicaOrdering>>,
    modifiers: Vec<Arc<dyn WeightModifier>>,
    criteria: Option<Vec<Arc<dyn ResponseCriterion>>>,
    retry_policy: Arc<dyn RetryPolicy>,
    request_transforms: Vec<Arc<dyn RequestTransform>>,
    response_transforms: Vec<Arc<dyn ResponseTransform>>,
    logging: LoggingOptions,
    error_response_criteria: Option<Vec<Arc<dyn ResponseCriterion>>>,
    adaptive_throttling: Option<AdaptiveThrottlingOptions>,
    user_modules: HashMap<ModuleGroup, Vec<Arc<dyn RequestModule>>>,
}

impl Default for ClusterClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterClientBuilder {
    /// Creates a builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: None,
            provider: None,
            default_timeout: None,
            connection_timeout: None,
            maximum_replicas: usize::MAX,
            storage_scope: ReplicaStorageScope::Process,
            deduplicate_request_url: false,
            validate_http_method: true,
            clock: Clock::system(),
            default_strategy: Arc::new(SequentialStrategy::default()),
            replica_transform: Arc::new(DefaultReplicaTransform),
            response_selector: Arc::new(BestVerdictSelector),
            ordering: None,
            modifiers: Vec::new(),
            criteria: None,
            retry_policy: Arc::new(AttemptLimitRetryPolicy::default()),
            request_transforms: Vec::new(),
            response_transforms: Vec::new(),
            logging: LoggingOptions::default(),
            error_response_criteria: None,
            adaptive_throttling: None,
            user_modules: HashMap::new(),
        }
    }

    /// Sets the HTTP transport. Required.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the topology source. Required.
    #[must_use]
    pub fn cluster_provider(mut self, provider: Arc<dyn ClusterProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the default per-request time budget. Required, positive.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sets the connection-establishment timeout passed to the transport.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Caps how many replicas one request may use.
    #[must_use]
    pub fn maximum_replicas_per_request(mut self, maximum: usize) -> Self {
        self.maximum_replicas = maximum;
        self
    }

    /// Selects the lifetime of learned per-replica state.
    #[must_use]
    pub fn replica_storage_scope(mut self, scope: ReplicaStorageScope) -> Self {
        self.storage_scope = scope;
        self
    }

    /// Merges replicas with identical normalized URLs before ordering.
    #[must_use]
    pub fn deduplicate_request_url(mut self, deduplicate: bool) -> Self {
        self.deduplicate_request_url = deduplicate;
        self
    }

    /// Toggles the request-method validation module.
    #[must_use]
    pub fn validate_http_method(mut self, validate: bool) -> Self {
        self.validate_http_method = validate;
        self
    }

    /// Overrides the clock. Tests inject a manual clock here.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the strategy used when request parameters do not override it.
    #[must_use]
    pub fn default_strategy(mut self, strategy: Arc<dyn RequestStrategy>) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Overrides how requests are rebased onto replicas.
    #[must_use]
    pub fn replica_transform(mut self, transform: Arc<dyn ReplicaTransform>) -> Self {
        self.replica_transform = transform;
        self
    }

    /// Overrides how one response is selected from the attempt results.
    #[must_use]
    pub fn response_selector(mut self, selector: Arc<dyn ResponseSelector>) -> Self {
        self.response_selector = selector;
        self
    }

    /// Replaces the whole ordering engine. Mutually exclusive with
    /// [`add_weight_modifier`][Self::add_weight_modifier].
    #[must_use]
    pub fn replica_ordering(mut self, ordering: Arc<dyn ReplicaOrdering>) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Appends a weight modifier to the default weighted ordering.
    #[must_use]
    pub fn add_weight_modifier(mut self, modifier: Arc<dyn WeightModifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Replaces the response criteria list. The last entry must be terminal.
    #[must_use]
    pub fn response_criteria(mut self, criteria: Vec<Arc<dyn ResponseCriterion>>) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Sets the retry policy of the execution stage.
    #[must_use]
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Registers an in-place request transform; applied in registration order.
    #[must_use]
    pub fn add_request_transform(mut self, transform: Arc<dyn RequestTransform>) -> Self {
        self.request_transforms.push(transform);
        self
    }

    /// Registers an in-place response transform; applied in registration order.
    #[must_use]
    pub fn add_response_transform(mut self, transform: Arc<dyn ResponseTransform>) -> Self {
        self.response_transforms.push(transform);
        self
    }

    /// Configures the structured events the client emits.
    #[must_use]
    pub fn logging(mut self, options: LoggingOptions) -> Self {
        self.logging = options;
        self
    }

    /// Criteria that decide whether the completion event is an error. The
    /// last entry must be terminal.
    #[must_use]
    pub fn error_response_criteria(mut self, criteria: Vec<Arc<dyn ResponseCriterion>>) -> Self {
        self.error_response_criteria = Some(criteria);
        self
    }

    /// Enables client-side adaptive throttling.
    #[must_use]
    pub fn adaptive_throttling(mut self, options: AdaptiveThrottlingOptions) -> Self {
        self.adaptive_throttling = Some(options);
        self
    }

    /// Appends a user module to the given pipeline group.
    #[must_use]
    pub fn add_module(mut self, group: ModuleGroup, module: Arc<dyn RequestModule>) -> Self {
        self.user_modules.entry(group).or_default().push(module);
        self
    }

    /// Validates the configuration and builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport or cluster provider is unset, a
    /// timeout or the replica cap is non-positive, or a criteria list does
    /// not end with a terminal criterion.
    pub fn build(self) -> Result<ClusterClient> {
        let transport = self
            .transport
            .ok_or_else(|| Error::configuration("a transport must be configured"))?;
        let provider = self
            .provider
            .ok_or_else(|| Error::configuration("a cluster provider must be configured"))?;
        let default_timeout = self
            .default_timeout
            .ok_or_else(|| Error::configuration("a default timeout must be configured"))?;

        if default_timeout.is_zero() {
            return Err(Error::configuration("the default timeout must be positive"));
        }
        if self.maximum_replicas == 0 {
            return Err(Error::configuration("the replica cap must be positive"));
        }

        let classifier = ResponseClassifier::new(self.criteria.unwrap_or_else(default_criteria));
        if !classifier.ends_with_terminal() {
            return Err(Error::configuration(
                "the last response criterion must be terminal (always-accept or always-reject)",
            ));
        }

        let error_criteria = match self.error_response_criteria {
            Some(criteria) => {
                let classifier = ResponseClassifier::new(criteria);
                if !classifier.ends_with_terminal() {
                    return Err(Error::configuration(
                        "the last error-response criterion must be terminal (always-accept or always-reject)",
                    ));
                }
                Some(classifier)
            }
            None => None,
        };

        let ordering: Arc<dyn ReplicaOrdering> = match self.ordering {
            Some(ordering) => {
                if !self.modifiers.is_empty() {
                    return Err(Error::configuration(
                        "weight modifiers cannot be combined with a custom replica ordering",
                    ));
                }
                ordering
            }
            None => Arc::new(WeightedOrdering::new(self.modifiers)),
        };

        let execution = ExecutionModule {
            provider,
            ordering,
            transform: self.replica_transform,
            classifier,
            selector: self.response_selector,
            connection_timeout: self.connection_timeout,
            deduplicate_urls: self.deduplicate_request_url,
            log_replica_requests: self.logging.log_replica_requests,
            log_replica_results: self.logging.log_replica_results,
        };

        let mut user_modules = self.user_modules;
        let mut chain: Vec<Arc<dyn RequestModule>> = Vec::new();
        for group in ModuleGroup::ORDER {
            if group == ModuleGroup::Execution {
                break;
            }
            match group {
                ModuleGroup::GlobalErrorHandling => chain.push(Arc::new(GlobalErrorHandlingModule)),
                ModuleGroup::RequestTransformation => {
                    if !self.request_transforms.is_empty() {
                        chain.push(Arc::new(RequestTransformationModule::new(
                            self.request_transforms.clone(),
                        )));
                    }
                }
                ModuleGroup::Priority => chain.push(Arc::new(PriorityModule)),
                ModuleGroup::Logging => {
                    chain.push(Arc::new(LoggingModule::new(self.logging, error_criteria.clone())));
                }
                ModuleGroup::ResponseTransformation => {
                    if !self.response_transforms.is_empty() {
                        chain.push(Arc::new(ResponseTransformationModule::new(
                            self.response_transforms.clone(),
                        )));
                    }
                }
                ModuleGroup::RequestValidation => {
                    chain.push(Arc::new(RequestValidationModule));
                    if self.validate_http_method {
                        chain.push(Arc::new(HttpMethodValidationModule));
                    }
                }
                ModuleGroup::TimeoutValidation => chain.push(Arc::new(TimeoutValidationModule)),
                ModuleGroup::Retry => chain.push(Arc::new(RetryModule::new(Arc::clone(&self.retry_policy)))),
                ModuleGroup::Sending => {
                    if let Some(options) = self.adaptive_throttling.clone() {
                        chain.push(Arc::new(AdaptiveThrottlingModule::new(options, &self.clock)));
                    }
                }
                ModuleGroup::LeakPrevention | ModuleGroup::RequestErrorHandling => {}
                ModuleGroup::Execution => {}
            }

            if let Some(extensions) = user_modules.remove(&group) {
                chain.extend(extensions);
            }
        }

        // The built-in executor terminates the chain after any user-supplied
        // Execution modules.
        if let Some(extensions) = user_modules.remove(&ModuleGroup::Execution) {
            chain.extend(extensions);
        }
        chain.push(Arc::new(execution));

        Ok(ClusterClient {
            shared: Arc::new(ClientShared {
                chain,
                transport,
                default_strategy: self.default_strategy,
                clock: self.clock,
                default_timeout,
                maximum_replicas: self.maximum_replicas,
                storage_scope: self.storage_scope,
                process_storage: ReplicaStorageContainer::new(),
            }),
        })
    }
}
