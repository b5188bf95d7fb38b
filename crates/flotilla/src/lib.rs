// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! # Cluster-Aware HTTP Client
//!
//! Given a logical service name resolved to a set of candidate replicas,
//! this crate dispatches each logical request to one or more of those
//! replicas according to a configurable policy, applying ordering,
//! health-based weighting, retry, hedging, and deadline semantics until a
//! satisfactory response arrives or the time budget runs out.
//!
//! # Why
//!
//! Calling a replicated service well is harder than calling a URL: replicas
//! degrade and recover, tail latency hides behind the median, and a fixed
//! timeout is either too short for slow days or too long for outages. This
//! crate packages the client-side half of that problem into composable
//! pieces with learned per-replica state, so every service client in a
//! process shares one battle-tested dispatch pipeline.
//!
//! # Overview
//!
//! - [`ClusterClient`] - The entry point; built from a [`Transport`], a
//!   [`ClusterProvider`], and a default timeout.
//! - **Pipeline** - Requests flow through an ordered chain of
//!   [`RequestModule`]s (validation, transforms, logging, retry, execution);
//!   user modules slot into any [`ModuleGroup`].
//! - **Ordering** - [`WeightedOrdering`] folds [`WeightModifier`]s such as
//!   [`AdaptiveHealthModifier`] and [`LeadershipModifier`] into a weighted
//!   random permutation of the cluster, fed back by every attempt outcome.
//! - **Strategies** - [`SequentialStrategy`], [`ParallelStrategy`], and
//!   [`ForkingStrategy`] decide how many attempts run at once and when to
//!   stop, always inside the request's [`TimeBudget`].
//! - **Time** - Everything ticks on a [`Clock`]; tests drive a manual clock
//!   through [`ClockControl`] for instant, deterministic timer behaviour.
//!
//! # Quickstart
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use flotilla::{
//!     CancelToken, ClusterClient, ClusterStatus, FixedClusterProvider, Request, Response,
//!     Transport,
//! };
//! use futures::future::BoxFuture;
//!
//! // The transport is an external collaborator; any HTTP stack plugs in
//! // behind this trait.
//! struct LoopbackTransport;
//!
//! impl Transport for LoopbackTransport {
//!     fn send(
//!         &self,
//!         request: Request,
//!         _connect_timeout: Option<Duration>,
//!         _timeout: Duration,
//!         _cancel: CancelToken,
//!     ) -> BoxFuture<'_, Response> {
//!         Box::pin(async move {
//!             let _ = request;
//!             Response::new(flotilla::ResponseCode::OK)
//!         })
//!     }
//! }
//!
//! # async fn example() -> Result<(), flotilla::Error> {
//! let client = ClusterClient::builder()
//!     .transport(Arc::new(LoopbackTransport))
//!     .cluster_provider(Arc::new(FixedClusterProvider::from_urls([
//!         "http://replica-1:8080/",
//!         "http://replica-2:8080/",
//!     ])?))
//!     .default_timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let result = client.send(Request::get("/ping".parse().unwrap())).await;
//! assert_eq!(result.status(), ClusterStatus::Success);
//! # Ok(())
//! # }
//! ```

mod cancellation;
mod client;
mod context;
mod criteria;
mod error;
mod model;
mod rnd;
mod selector;
mod sender;
mod storage;
mod throttling;
mod topology;
mod transport;

pub mod ordering;
pub mod pipeline;
pub mod strategy;
pub mod time;

pub use cancellation::CancelToken;
pub use client::{ClusterClient, ClusterClientBuilder};
pub use context::{Priority, RequestContext, RequestParameters};
pub use criteria::{
    AlwaysAccept, AlwaysReject, RejectServerErrors, RejectThrottling, RejectTransportFailures, ResponseCriterion,
};
pub use error::{Error, Result};
pub use model::{
    Body, ClusterResult, ClusterStatus, Replica, ReplicaResult, Request, Response, ResponseClass, ResponseCode,
    StreamBody, TransportVerdict, Verdict,
};
pub use ordering::{
    AdaptiveHealthModifier, LeadershipModifier, OrderedReplicas, ReplicaOrdering, WeightModifier, WeightedOrdering,
};
pub use pipeline::{LoggingOptions, ModuleGroup, PipelineNext, RequestModule};
pub use selector::{BestVerdictSelector, ResponseSelector};
pub use storage::{ReplicaStorage, ReplicaStorageContainer, ReplicaStorageScope};
pub use strategy::{ForkingStrategy, ParallelStrategy, RequestStrategy, SequentialStrategy};
pub use throttling::AdaptiveThrottlingOptions;
pub use time::{Clock, ClockControl, TimeBudget};
pub use topology::{ClusterProvider, DefaultReplicaTransform, FixedClusterProvider, ReplicaTransform};
pub use transport::{Capability, Transport};
