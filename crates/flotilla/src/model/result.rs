// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::time::Duration;

use super::replica::Replica;
use super::request::Request;
use super::response::Response;

/// The classification of one response by the configured criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// The response satisfies the request; dispatch stops.
    Accept,
    /// The response is unusable; dispatch moves on.
    Reject,
    /// The criteria abstained.
    DontKnow,
}

/// The outcome of one attempt against one replica. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct ReplicaResult {
    replica: Replica,
    response: Response,
    verdict: Verdict,
    elapsed: Duration,
}

impl ReplicaResult {
    /// Bundles an attempt outcome.
    #[must_use]
    pub fn new(replica: Replica, response: Response, verdict: Verdict, elapsed: Duration) -> Self {
        Self {
            replica,
            response,
            verdict,
            elapsed,
        }
    }

    /// The replica this attempt targeted.
    #[must_use]
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// The response produced by the attempt.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// The verdict of the configured criteria on the response.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// How long the attempt ran.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// The terminal status of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ClusterStatus {
    /// An attempt produced an accepted response.
    Success,
    /// The topology returned no replicas.
    ReplicasNotFound,
    /// Every attempted replica rejected the request.
    ReplicasExhausted,
    /// The time budget ran out before an acceptable response arrived.
    TimeExpired,
    /// Client-side throttling rejected the request before dispatch.
    Throttled,
    /// The request failed validation; no replica was contacted.
    IncorrectArguments,
    /// A module or handler failed unexpectedly.
    UnexpectedException,
    /// The caller cancelled the request.
    Canceled,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "Success",
            Self::ReplicasNotFound => "ReplicasNotFound",
            Self::ReplicasExhausted => "ReplicasExhausted",
            Self::TimeExpired => "TimeExpired",
            Self::Throttled => "Throttled",
            Self::IncorrectArguments => "IncorrectArguments",
            Self::UnexpectedException => "UnexpectedException",
            Self::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// The final outcome of one logical request against a cluster.
///
/// Carries the full ordered list of attempt results (in completion order),
/// the selected response, and the original request. Partial progress is
/// observable even when the terminal status is a failure.
#[derive(Debug, Clone)]
pub struct ClusterResult {
    status: ClusterStatus,
    replica_results: Vec<ReplicaResult>,
    response: Response,
    request: Request,
}

impl ClusterResult {
    /// Bundles a terminal outcome.
    #[must_use]
    pub fn new(status: ClusterStatus, replica_results: Vec<ReplicaResult>, response: Response, request: Request) -> Self {
        Self {
            status,
            replica_results,
            response,
            request,
        }
    }

    /// The terminal status.
    #[must_use]
    pub fn status(&self) -> ClusterStatus {
        self.status
    }

    /// All attempt results, in completion order.
    #[must_use]
    pub fn replica_results(&self) -> &[ReplicaResult] {
        &self.replica_results
    }

    /// The selected response; the no-response sentinel when no replica
    /// produced anything usable.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub(crate) fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// The request this outcome belongs to.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns `true` for [`ClusterStatus::Success`].
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == ClusterStatus::Success
    }
}
