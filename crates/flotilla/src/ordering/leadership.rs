// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use crate::model::{Replica, ReplicaResult, Verdict};
use crate::ordering::weights::{Weight, WeightContext, WeightModifier};
use crate::storage::ReplicaStorageContainer;

const LEADERSHIP_NAMESPACE: &str = "leadership";

/// Recognizes responses that could only have been served by the cluster's
/// current leader.
pub trait LeaderResultDetector: Send + Sync + fmt::Debug {
    /// Returns `true` when the result proves the replica is the leader.
    fn is_leader_result(&self, result: &ReplicaResult) -> bool;
}

/// Treats any accepted response as proof of leadership. Suitable for
/// clusters where only the leader answers successfully.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptedResultDetector;

impl LeaderResultDetector for AcceptedResultDetector {
    fn is_leader_result(&self, result: &ReplicaResult) -> bool {
        result.verdict() == Verdict::Accept
    }
}

/// Routes traffic to the single known leader of the cluster.
///
/// Every replica starts as non-leader, which forces its weight to zero; with
/// nobody promoted yet the ordering falls back to a uniform permutation, so
/// the leader is discovered by probing. Once a result is classified as
/// leader-served, that replica keeps its weight untouched and everyone else
/// stays at zero, until a non-leader result from the leader demotes it again.
#[derive(Debug)]
pub struct LeadershipModifier {
    detector: Arc<dyn LeaderResultDetector>,
}

impl LeadershipModifier {
    /// Creates a modifier over the given detector.
    #[must_use]
    pub fn new(detector: Arc<dyn LeaderResultDetector>) -> Self {
        Self { detector }
    }

    fn demote(storage: &crate::storage::ReplicaStorage<bool>, replica: &Replica) {
        if storage.try_update(replica, false, &true) {
            tracing::event!(
                name: "flotilla.leader_demoted",
                tracing::Level::INFO,
                replica = %replica,
            );
        }
    }
}

impl Default for LeadershipModifier {
    fn default() -> Self {
        Self::new(Arc::new(AcceptedResultDetector))
    }
}

impl WeightModifier for LeadershipModifier {
    fn modify(&self, replica: &Replica, context: &WeightContext<'_>, weight: &mut Weight) {
        let storage = context.storage.obtain::<bool>(LEADERSHIP_NAMESPACE);
        let is_leader = storage.get(replica).unwrap_or(false);
        if !is_leader {
            *weight = 0.0;
        }
    }

    fn learn(&self, result: &ReplicaResult, storage: &ReplicaStorageContainer) {
        let map = storage.obtain::<bool>(LEADERSHIP_NAMESPACE);
        let replica = result.replica();

        if self.detector.is_leader_result(result) {
            // A single leader at a time: promoting one demotes the rest.
            for (other, is_leader) in map.entries() {
                if is_leader && other != *replica {
                    Self::demote(&map, &other);
                }
            }

            let promoted = map.try_add(replica, true) || map.try_update(replica, true, &false);
            if promoted {
                tracing::event!(
                    name: "flotilla.leader_promoted",
                    tracing::Level::INFO,
                    replica = %replica,
                );
            }
        } else if map.get(replica).unwrap_or(false) {
            Self::demote(&map, replica);
        } else {
            // Record the replica as a known non-leader so probes are
            // observable in storage.
            map.try_add(replica, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::context::RequestParameters;
    use crate::model::{Request, Response, ResponseCode};

    use super::*;

    fn replica(url: &str) -> Replica {
        Replica::parse(url).unwrap()
    }

    fn accepted(url: &str) -> ReplicaResult {
        ReplicaResult::new(
            replica(url),
            Response::new(ResponseCode::OK),
            Verdict::Accept,
            Duration::ZERO,
        )
    }

    fn rejected(url: &str) -> ReplicaResult {
        ReplicaResult::new(
            replica(url),
            Response::new(ResponseCode::SERVICE_UNAVAILABLE),
            Verdict::Reject,
            Duration::ZERO,
        )
    }

    fn weight_of(modifier: &LeadershipModifier, storage: &ReplicaStorageContainer, url: &str) -> f64 {
        let target = replica(url);
        let cluster = [target.clone()];
        let request = Request::get(http::Uri::from_static("/"));
        let parameters = RequestParameters::new();
        let context = WeightContext {
            replicas: &cluster,
            storage,
            request: &request,
            parameters: &parameters,
        };
        let mut weight = 1.0;
        modifier.modify(&target, &context, &mut weight);
        weight
    }

    #[test]
    fn everyone_starts_as_non_leader() {
        let modifier = LeadershipModifier::default();
        let storage = ReplicaStorageContainer::new();
        assert_eq!(weight_of(&modifier, &storage, "http://a/"), 0.0);
    }

    #[test]
    fn leader_result_promotes_the_replica() {
        let modifier = LeadershipModifier::default();
        let storage = ReplicaStorageContainer::new();

        modifier.learn(&accepted("http://b/"), &storage);

        assert_eq!(weight_of(&modifier, &storage, "http://b/"), 1.0);
        assert_eq!(weight_of(&modifier, &storage, "http://a/"), 0.0);
    }

    #[test]
    fn non_leader_result_demotes_the_leader() {
        let modifier = LeadershipModifier::default();
        let storage = ReplicaStorageContainer::new();

        modifier.learn(&accepted("http://b/"), &storage);
        modifier.learn(&rejected("http://b/"), &storage);

        assert_eq!(weight_of(&modifier, &storage, "http://b/"), 0.0);
    }

    #[test]
    fn promotion_moves_between_replicas() {
        let modifier = LeadershipModifier::default();
        let storage = ReplicaStorageContainer::new();

        modifier.learn(&accepted("http://a/"), &storage);
        modifier.learn(&accepted("http://b/"), &storage);

        assert_eq!(weight_of(&modifier, &storage, "http://a/"), 0.0);
        assert_eq!(weight_of(&modifier, &storage, "http://b/"), 1.0);
    }

    #[test]
    fn non_leader_results_do_not_disturb_a_leader_elsewhere() {
        let modifier = LeadershipModifier::default();
        let storage = ReplicaStorageContainer::new();

        modifier.learn(&accepted("http://a/"), &storage);
        modifier.learn(&rejected("http://b/"), &storage);

        assert_eq!(weight_of(&modifier, &storage, "http://a/"), 1.0);
        assert_eq!(weight_of(&modifier, &storage, "http://b/"), 0.0);
    }
}
