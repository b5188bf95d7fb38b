// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use crate::cancellation::CancelToken;
use crate::context::RequestParameters;
use crate::model::{ClusterStatus, ReplicaResult, Request, Response, Verdict};
use crate::time::TimeBudget;

/// Picks the single response a [`ClusterResult`][crate::ClusterResult]
/// carries out of the frozen attempt list.
///
/// Must be total: when the list is empty or nothing qualifies, return the
/// [`Response::none`] sentinel rather than failing.
pub trait ResponseSelector: Send + Sync + fmt::Debug {
    /// Chooses one response from the attempt results.
    fn select(&self, request: &Request, parameters: &RequestParameters, results: &[ReplicaResult]) -> Response;
}

/// The standard selector: best verdict wins (`Accept` over `DontKnow` over
/// `Reject`), ties broken by recency.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestVerdictSelector;

impl ResponseSelector for BestVerdictSelector {
    fn select(&self, _request: &Request, _parameters: &RequestParameters, results: &[ReplicaResult]) -> Response {
        let rank = |verdict: Verdict| match verdict {
            Verdict::Accept => 2,
            Verdict::DontKnow => 1,
            Verdict::Reject => 0,
        };

        let mut best: Option<&ReplicaResult> = None;
        for result in results {
            // `>=` so a later result wins ties.
            if best.is_none_or(|current| rank(result.verdict()) >= rank(current.verdict())) {
                best = Some(result);
            }
        }

        best.map_or_else(Response::none, |result| result.response().clone())
    }
}

/// Folds the frozen attempt list and the budget into the terminal status.
///
/// Priority order, first match wins: any accepted attempt, an expired
/// budget, an observed cancellation, a fully rejected list, anything else.
pub(crate) fn select_status(results: &[ReplicaResult], budget: &TimeBudget, cancel: &CancelToken) -> ClusterStatus {
    if results.iter().any(|result| result.verdict() == Verdict::Accept) {
        return ClusterStatus::Success;
    }
    if budget.has_expired() {
        return ClusterStatus::TimeExpired;
    }
    if cancel.is_cancelled() {
        return ClusterStatus::Canceled;
    }
    if !results.is_empty() && results.iter().all(|result| result.verdict() == Verdict::Reject) {
        return ClusterStatus::ReplicasExhausted;
    }
    if results.is_empty() {
        // The strategy attempted nobody although replicas existed; treat the
        // cluster as exhausted rather than invent an exception.
        return ClusterStatus::ReplicasExhausted;
    }
    ClusterStatus::UnexpectedException
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::model::{Replica, ResponseCode};
    use crate::time::ClockControl;

    use super::*;

    fn result(url: &str, code: ResponseCode, verdict: Verdict) -> ReplicaResult {
        ReplicaResult::new(
            Replica::parse(url).unwrap(),
            Response::new(code),
            verdict,
            Duration::ZERO,
        )
    }

    fn select(results: &[ReplicaResult]) -> Response {
        let request = Request::get(http::Uri::from_static("/"));
        BestVerdictSelector.select(&request, &RequestParameters::new(), results)
    }

    #[test]
    fn accepted_beats_rejected() {
        let results = [
            result("http://a/", ResponseCode::INTERNAL_SERVER_ERROR, Verdict::Reject),
            result("http://b/", ResponseCode::OK, Verdict::Accept),
            result("http://c/", ResponseCode::SERVICE_UNAVAILABLE, Verdict::Reject),
        ];
        assert_eq!(select(&results).code(), ResponseCode::OK);
    }

    #[test]
    fn recency_breaks_ties() {
        let results = [
            result("http://a/", ResponseCode::INTERNAL_SERVER_ERROR, Verdict::Reject),
            result("http://b/", ResponseCode::SERVICE_UNAVAILABLE, Verdict::Reject),
        ];
        assert_eq!(select(&results).code(), ResponseCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn empty_list_selects_the_sentinel() {
        assert_eq!(select(&[]).code(), ResponseCode::UNKNOWN);
    }

    #[test]
    fn status_priority_rule() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let fresh = TimeBudget::start(&clock, Duration::from_secs(10));
        let cancel = CancelToken::new();

        let accepted = [result("http://a/", ResponseCode::OK, Verdict::Accept)];
        assert_eq!(select_status(&accepted, &fresh, &cancel), ClusterStatus::Success);

        let rejected = [
            result("http://a/", ResponseCode::INTERNAL_SERVER_ERROR, Verdict::Reject),
            result("http://b/", ResponseCode::INTERNAL_SERVER_ERROR, Verdict::Reject),
        ];
        assert_eq!(select_status(&rejected, &fresh, &cancel), ClusterStatus::ReplicasExhausted);

        let mixed = [
            result("http://a/", ResponseCode::INTERNAL_SERVER_ERROR, Verdict::Reject),
            result("http://b/", ResponseCode::UNKNOWN, Verdict::DontKnow),
        ];
        assert_eq!(select_status(&mixed, &fresh, &cancel), ClusterStatus::UnexpectedException);

        let expired = TimeBudget::start(&clock, Duration::ZERO);
        assert_eq!(select_status(&rejected, &expired, &cancel), ClusterStatus::TimeExpired);
        assert_eq!(select_status(&accepted, &expired, &cancel), ClusterStatus::Success);

        let cancelled = CancelToken::new();
        cancelled.cancel();
        assert_eq!(select_status(&rejected, &fresh, &cancelled), ClusterStatus::Canceled);
    }
}
