// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashSet;

use http::Uri;
use http::uri::PathAndQuery;

use crate::error::Result;
use crate::model::{Replica, Request};

/// Produces the current set of replicas serving the logical service.
///
/// Queried once per execution attempt, so implementations must be cheap;
/// anything that involves IO belongs behind a cache. Returning an empty list
/// is legal and yields [`ClusterStatus::ReplicasNotFound`][crate::ClusterStatus::ReplicasNotFound].
pub trait ClusterProvider: Send + Sync + 'static {
    /// The replicas currently serving the service; may be empty.
    fn get_cluster(&self) -> Vec<Replica>;
}

/// A provider backed by a fixed list of replicas.
#[derive(Debug, Clone)]
pub struct FixedClusterProvider {
    replicas: Vec<Replica>,
}

impl FixedClusterProvider {
    /// Creates a provider over the given replicas.
    #[must_use]
    pub fn new(replicas: Vec<Replica>) -> Self {
        Self { replicas }
    }

    /// Parses a list of absolute URLs into a provider.
    ///
    /// # Errors
    ///
    /// Returns an error when any entry is not a valid absolute HTTP(S) URL.
    pub fn from_urls<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let replicas = urls
            .into_iter()
            .map(|url| Replica::parse(url.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(replicas))
    }
}

impl ClusterProvider for FixedClusterProvider {
    fn get_cluster(&self) -> Vec<Replica> {
        self.replicas.clone()
    }
}

/// Removes replicas whose normalized URL repeats, keeping first occurrences.
pub(crate) fn deduplicate(replicas: Vec<Replica>) -> Vec<Replica> {
    let mut seen = HashSet::with_capacity(replicas.len());
    replicas
        .into_iter()
        .filter(|replica| seen.insert(replica.clone()))
        .collect()
}

/// Rewrites a request so its URL is absolute on the given replica.
///
/// Must be idempotent: transforming an already-absolute request is a no-op.
pub trait ReplicaTransform: Send + Sync + 'static {
    /// Returns the request addressed to the replica.
    fn transform(&self, replica: &Replica, request: Request) -> Request;
}

/// The standard transform: joins the replica's base path with the request's
/// relative path and query. Requests that already carry an authority are
/// passed through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReplicaTransform;

impl ReplicaTransform for DefaultReplicaTransform {
    fn transform(&self, replica: &Replica, request: Request) -> Request {
        if request.uri().authority().is_some() {
            return request;
        }

        match rebase(replica.uri(), request.uri()) {
            Some(uri) => request.with_uri(uri),
            None => {
                tracing::event!(
                    name: "flotilla.rebase_failed",
                    tracing::Level::DEBUG,
                    replica = %replica,
                    target = %request.uri(),
                );
                request
            }
        }
    }
}

fn rebase(base: &Uri, target: &Uri) -> Option<Uri> {
    let scheme = base.scheme()?.clone();
    let authority = base.authority()?.clone();

    let base_path = base.path().trim_end_matches('/');
    let target_path = target
        .path_and_query()
        .map_or("/", PathAndQuery::as_str);

    let mut joined = String::with_capacity(base_path.len() + target_path.len() + 1);
    joined.push_str(base_path);
    if !target_path.starts_with('/') {
        joined.push('/');
    }
    joined.push_str(target_path);

    let path_and_query: PathAndQuery = joined.parse().ok()?;

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .ok()
}
