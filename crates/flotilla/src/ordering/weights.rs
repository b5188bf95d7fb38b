// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use crate::context::RequestParameters;
use crate::model::{Replica, ReplicaResult, Request};
use crate::storage::ReplicaStorageContainer;

/// A replica weight. Non-negative; zero means "do not use".
///
/// Weights above zero define a categorical distribution over the cluster:
/// a replica with twice the weight is twice as likely to be ordered first.
pub type Weight = f64;

/// Read-only inputs available to a weight modifier.
#[derive(Debug)]
pub struct WeightContext<'a> {
    /// Every replica in the cluster for this request.
    pub replicas: &'a [Replica],
    /// The per-replica state container in effect for this request.
    pub storage: &'a ReplicaStorageContainer,
    /// The request being ordered for.
    pub request: &'a Request,
    /// The per-request parameters.
    pub parameters: &'a RequestParameters,
}

/// A pluggable influence on replica ordering.
///
/// Modifiers compose by ordered application over a shared weight starting at
/// 1.0; each modifier observes the weight produced by its predecessors. A
/// modifier that zeroes the weight does not short-circuit the rest: a later
/// modifier may raise it again, so composition order is part of the
/// configuration contract.
///
/// [`learn`][Self::learn] receives every completed attempt, in the same
/// configuration order across modifiers. Modifiers own their storage
/// namespace exclusively and must not read another modifier's state.
pub trait WeightModifier: Send + Sync + fmt::Debug {
    /// Adjusts the weight of one replica.
    fn modify(&self, replica: &Replica, context: &WeightContext<'_>, weight: &mut Weight);

    /// Consumes feedback from a completed attempt.
    fn learn(&self, result: &ReplicaResult, storage: &ReplicaStorageContainer) {
        let _ = (result, storage);
    }
}
