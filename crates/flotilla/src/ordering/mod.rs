// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-request replica ordering.
//!
//! The ordering engine folds pluggable [`WeightModifier`]s into a weight for
//! every replica, then draws a lazy weighted permutation of the cluster.
//! Completed attempts feed back through [`ReplicaOrdering::learn`], which is
//! how adaptive health and leadership state evolve.

mod health;
mod leadership;
mod weights;

pub use health::{
    AdaptiveHealthModifier, CompositeTuningPolicy, DecayingHealth, HealthAction, HealthTuningPolicy, HealthWithDecay,
    NetworkErrorTuningPolicy, ScalarHealth, TimeoutTuningPolicy, VerdictTuningPolicy,
};
pub use leadership::{AcceptedResultDetector, LeaderResultDetector, LeadershipModifier};
pub use weights::{Weight, WeightContext, WeightModifier};

use std::fmt;
use std::sync::Arc;

use crate::context::RequestParameters;
use crate::model::{Replica, ReplicaResult, Request};
use crate::rnd::Rnd;
use crate::storage::ReplicaStorageContainer;

/// Produces, per request, a lazy ordering of the cluster and consumes
/// feedback from completed attempts.
pub trait ReplicaOrdering: Send + Sync + fmt::Debug {
    /// Orders the cluster for one request.
    ///
    /// The returned sequence is lazy, single-use, and must be advanced by a
    /// single consumer at a time.
    fn order(
        &self,
        replicas: &[Replica],
        storage: &ReplicaStorageContainer,
        request: &Request,
        parameters: &RequestParameters,
    ) -> OrderedReplicas;

    /// Fans a completed attempt out to every modifier, in configuration order.
    fn learn(&self, result: &ReplicaResult, storage: &ReplicaStorageContainer);
}

/// A lazy, single-use ordering of replicas.
pub struct OrderedReplicas {
    inner: Box<dyn Iterator<Item = Replica> + Send>,
}

impl OrderedReplicas {
    /// Wraps an iterator into an ordering.
    #[must_use]
    pub fn new(inner: impl Iterator<Item = Replica> + Send + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }
}

impl Iterator for OrderedReplicas {
    type Item = Replica;

    fn next(&mut self) -> Option<Replica> {
        self.inner.next()
    }
}

impl fmt::Debug for OrderedReplicas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedReplicas").finish_non_exhaustive()
    }
}

/// The standard ordering: weighted random selection without replacement.
///
/// Weights start at 1.0 and are folded through the configured modifiers, then
/// clamped to `[0, max_weight]`. Replicas with weight zero are never emitted,
/// unless every weight is zero, in which case the ordering degrades to a
/// uniform random permutation so a non-empty cluster never orders empty.
///
/// # Determinism
///
/// Randomness is injectable: [`with_seed`][Self::with_seed] produces a
/// reproducible ordering for tests.
#[derive(Debug)]
pub struct WeightedOrdering {
    modifiers: Vec<Arc<dyn WeightModifier>>,
    max_weight: f64,
    rnd: Rnd,
}

impl WeightedOrdering {
    /// The default cap applied to folded weights.
    pub const DEFAULT_MAX_WEIGHT: f64 = 1_000_000.0;

    /// Creates an ordering over the given modifiers.
    #[must_use]
    pub fn new(modifiers: Vec<Arc<dyn WeightModifier>>) -> Self {
        Self::with_rnd(modifiers, Rnd::Real)
    }

    /// Creates an ordering whose random draws are seeded and reproducible.
    #[must_use]
    pub fn with_seed(modifiers: Vec<Arc<dyn WeightModifier>>, seed: u64) -> Self {
        Self::with_rnd(modifiers, Rnd::seeded(seed))
    }

    pub(crate) fn with_rnd(modifiers: Vec<Arc<dyn WeightModifier>>, rnd: Rnd) -> Self {
        Self {
            modifiers,
            max_weight: Self::DEFAULT_MAX_WEIGHT,
            rnd,
        }
    }

    /// Overrides the weight cap.
    #[must_use]
    pub fn max_weight(mut self, max_weight: f64) -> Self {
        self.max_weight = max_weight;
        self
    }

    fn compute_weights(
        &self,
        replicas: &[Replica],
        storage: &ReplicaStorageContainer,
        request: &Request,
        parameters: &RequestParameters,
    ) -> Vec<(Replica, f64)> {
        let context = WeightContext {
            replicas,
            storage,
            request,
            parameters,
        };

        replicas
            .iter()
            .map(|replica| {
                let mut weight = 1.0;
                for modifier in &self.modifiers {
                    modifier.modify(replica, &context, &mut weight);
                }
                if !weight.is_finite() || weight < 0.0 {
                    weight = 0.0;
                }
                (replica.clone(), weight.min(self.max_weight))
            })
            .collect()
    }
}

impl ReplicaOrdering for WeightedOrdering {
    fn order(
        &self,
        replicas: &[Replica],
        storage: &ReplicaStorageContainer,
        request: &Request,
        parameters: &RequestParameters,
    ) -> OrderedReplicas {
        let mut entries = self.compute_weights(replicas, storage, request, parameters);

        // A non-empty cluster must never order empty: when every weight is
        // zero, degrade to a uniform permutation.
        if entries.iter().all(|(_, weight)| *weight <= 0.0) {
            for entry in &mut entries {
                entry.1 = 1.0;
            }
        } else {
            entries.retain(|(_, weight)| *weight > 0.0);
        }

        OrderedReplicas::new(WeightedSequence {
            entries,
            rnd: self.rnd.clone(),
        })
    }

    fn learn(&self, result: &ReplicaResult, storage: &ReplicaStorageContainer) {
        for modifier in &self.modifiers {
            modifier.learn(result, storage);
        }
    }
}

/// Stateful weighted sampling without replacement.
struct WeightedSequence {
    entries: Vec<(Replica, f64)>,
    rnd: Rnd,
}

impl Iterator for WeightedSequence {
    type Item = Replica;

    fn next(&mut self) -> Option<Replica> {
        if self.entries.is_empty() {
            return None;
        }

        // The total is recomputed per draw; with cluster-sized inputs this
        // costs nothing and avoids floating-point drift from subtraction.
        let total: f64 = self.entries.iter().map(|(_, weight)| weight).sum();
        let chosen = if total > 0.0 {
            let mut draw = self.rnd.next_f64() * total;
            let mut chosen = self.entries.len() - 1;
            for (index, (_, weight)) in self.entries.iter().enumerate() {
                if draw < *weight {
                    chosen = index;
                    break;
                }
                draw -= weight;
            }
            chosen
        } else {
            self.rnd.index(self.entries.len())
        };

        Some(self.entries.remove(chosen).0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn replicas(urls: &[&str]) -> Vec<Replica> {
        urls.iter().map(|url| Replica::parse(url).unwrap()).collect()
    }

    fn order_with<M>(modifiers: Vec<Arc<dyn WeightModifier>>, rnd: Rnd, cluster: &[Replica], map: M) -> Vec<String>
    where
        M: Fn(OrderedReplicas) -> Vec<String>,
    {
        let ordering = WeightedOrdering::with_rnd(modifiers, rnd);
        let storage = ReplicaStorageContainer::new();
        let request = Request::get(http::Uri::from_static("/"));
        let parameters = RequestParameters::new();
        map(ordering.order(cluster, &storage, &request, &parameters))
    }

    fn collect(ordered: OrderedReplicas) -> Vec<String> {
        ordered.map(|replica| replica.as_str().to_string()).collect()
    }

    #[derive(Debug)]
    struct FixedWeights(HashMap<String, f64>);

    impl WeightModifier for FixedWeights {
        fn modify(&self, replica: &Replica, _context: &WeightContext<'_>, weight: &mut Weight) {
            if let Some(fixed) = self.0.get(replica.as_str()) {
                *weight = *fixed;
            }
        }
    }

    fn fixed(weights: &[(&str, f64)]) -> Arc<dyn WeightModifier> {
        Arc::new(FixedWeights(
            weights.iter().map(|(url, w)| ((*url).to_string(), *w)).collect(),
        ))
    }

    #[test]
    fn ordering_is_a_permutation() {
        let cluster = replicas(&["http://a/", "http://b/", "http://c/"]);
        let mut ordered = order_with(vec![], Rnd::seeded(7), &cluster, collect);
        ordered.sort();
        assert_eq!(ordered, vec!["http://a", "http://b", "http://c"]);
    }

    #[test]
    fn zero_weight_replicas_are_skipped() {
        let cluster = replicas(&["http://a/", "http://b/", "http://c/"]);
        let modifier = fixed(&[("http://b", 0.0)]);
        let ordered = order_with(vec![modifier], Rnd::seeded(7), &cluster, collect);
        assert_eq!(ordered.len(), 2);
        assert!(!ordered.contains(&"http://b".to_string()));
    }

    #[test]
    fn all_zero_weights_fall_back_to_uniform_permutation() {
        let cluster = replicas(&["http://a/", "http://b/", "http://c/"]);
        let modifier = fixed(&[("http://a", 0.0), ("http://b", 0.0), ("http://c", 0.0)]);
        let mut ordered = order_with(vec![modifier], Rnd::seeded(7), &cluster, collect);
        ordered.sort();
        assert_eq!(ordered, vec!["http://a", "http://b", "http://c"]);
    }

    #[test]
    fn weights_bias_the_first_draw() {
        // Draw 0.0 lands in the first positive bucket; b has nearly all of
        // the mass, so a tiny draw just above zero still picks it once the
        // draw exceeds a's sliver.
        let cluster = replicas(&["http://a/", "http://b/"]);
        let modifier = fixed(&[("http://a", 0.001), ("http://b", 100.0)]);
        let ordered = order_with(vec![modifier], Rnd::new_fixed(0.5), &cluster, collect);
        assert_eq!(ordered[0], "http://b");
    }

    #[test]
    fn selection_frequency_tracks_weights() {
        let cluster = replicas(&["http://a/", "http://b/"]);
        let rnd = Rnd::seeded(1234);
        let ordering = WeightedOrdering::with_rnd(vec![fixed(&[("http://a", 3.0), ("http://b", 1.0)])], rnd);
        let storage = ReplicaStorageContainer::new();
        let request = Request::get(http::Uri::from_static("/"));
        let parameters = RequestParameters::new();

        let mut a_first = 0;
        for _ in 0..1000 {
            let mut ordered = ordering.order(&cluster, &storage, &request, &parameters);
            if ordered.next().map(|r| r.as_str().to_string()) == Some("http://a".to_string()) {
                a_first += 1;
            }
        }

        // Expectation is 750 of 1000; allow generous slack.
        assert!((680..=820).contains(&a_first), "a was first {a_first} times");
    }

    #[test]
    fn negative_and_non_finite_weights_are_treated_as_zero() {
        let cluster = replicas(&["http://a/", "http://b/"]);
        let modifier = fixed(&[("http://a", -5.0), ("http://b", f64::NAN)]);
        let mut ordered = order_with(vec![modifier], Rnd::seeded(7), &cluster, collect);
        ordered.sort();
        // Everything degraded to zero, so the uniform fallback emits both.
        assert_eq!(ordered, vec!["http://a", "http://b"]);
    }

    #[test]
    fn weight_cap_is_applied() {
        let cluster = replicas(&["http://a/"]);
        let ordering = WeightedOrdering::new(vec![fixed(&[("http://a", 1e12)])]).max_weight(10.0);
        let storage = ReplicaStorageContainer::new();
        let request = Request::get(http::Uri::from_static("/"));
        let parameters = RequestParameters::new();

        let weights = ordering.compute_weights(&cluster, &storage, &request, &parameters);
        assert_eq!(weights[0].1, 10.0);
    }
}
