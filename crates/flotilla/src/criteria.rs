// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use crate::model::{Response, ResponseClass, ResponseCode, TransportVerdict, Verdict};

/// One rule in an ordered response classification list.
///
/// Criteria are applied in order; the first non-[`DontKnow`][Verdict::DontKnow]
/// verdict wins. The last criterion of a configured list must be terminal
/// ([`AlwaysAccept`] or [`AlwaysReject`]) so classification is total; the
/// client builder rejects lists that violate this.
pub trait ResponseCriterion: Send + Sync + fmt::Debug {
    /// Judges a single response.
    fn decide(&self, response: &Response) -> Verdict;

    /// Returns `true` when this criterion never abstains.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Accepts every response. Terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAccept;

impl ResponseCriterion for AlwaysAccept {
    fn decide(&self, _response: &Response) -> Verdict {
        Verdict::Accept
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

/// Rejects every response. Terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReject;

impl ResponseCriterion for AlwaysReject {
    fn decide(&self, _response: &Response) -> Verdict {
        Verdict::Reject
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

/// Rejects responses whose transport verdict is anything but success:
/// timeouts, connection failures, cancellations, reuse failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectTransportFailures;

impl ResponseCriterion for RejectTransportFailures {
    fn decide(&self, response: &Response) -> Verdict {
        if response.verdict() == TransportVerdict::Success && response.class() != ResponseClass::NetworkFailure {
            Verdict::DontKnow
        } else {
            Verdict::Reject
        }
    }
}

/// Rejects 5xx responses so dispatch moves on to another replica.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectServerErrors;

impl ResponseCriterion for RejectServerErrors {
    fn decide(&self, response: &Response) -> Verdict {
        if response.class() == ResponseClass::ServerFailure {
            Verdict::Reject
        } else {
            Verdict::DontKnow
        }
    }
}

/// Rejects 429 responses from replicas shedding load.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectThrottling;

impl ResponseCriterion for RejectThrottling {
    fn decide(&self, response: &Response) -> Verdict {
        if response.code() == ResponseCode::TOO_MANY_REQUESTS {
            Verdict::Reject
        } else {
            Verdict::DontKnow
        }
    }
}

/// An ordered, validated list of criteria applied to one response.
#[derive(Debug, Clone)]
pub(crate) struct ResponseClassifier {
    criteria: Arc<[Arc<dyn ResponseCriterion>]>,
}

impl ResponseClassifier {
    pub fn new(criteria: Vec<Arc<dyn ResponseCriterion>>) -> Self {
        Self {
            criteria: criteria.into(),
        }
    }

    /// The first non-abstaining verdict, or `DontKnow` when every criterion
    /// abstains (possible only for lists without a terminal tail).
    pub fn decide(&self, response: &Response) -> Verdict {
        for criterion in self.criteria.iter() {
            let verdict = criterion.decide(response);
            if verdict != Verdict::DontKnow {
                return verdict;
            }
        }
        Verdict::DontKnow
    }

    pub fn ends_with_terminal(&self) -> bool {
        self.criteria.last().is_some_and(|criterion| criterion.is_terminal())
    }
}

/// The standard criteria list: transport failures and server errors move
/// dispatch along, replica throttling is rejected, everything else accepted.
pub(crate) fn default_criteria() -> Vec<Arc<dyn ResponseCriterion>> {
    vec![
        Arc::new(RejectTransportFailures),
        Arc::new(RejectServerErrors),
        Arc::new(RejectThrottling),
        Arc::new(AlwaysAccept),
    ]
}
