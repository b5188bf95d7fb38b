// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The request-processing pipeline.
//!
//! A pipeline is an ordered chain of modules, each receiving the mutable
//! request context and a continuation into the remainder of the chain. A
//! module may short-circuit with a synthetic result, transform the context,
//! recurse through [`PipelineNext::proceed`] at most once (the retry module
//! being the sanctioned exception), and post-process what comes back.
//!
//! Modules are arranged in ordinal [`ModuleGroup`]s executing from
//! [`LeakPrevention`][ModuleGroup::LeakPrevention] on the outside down to
//! [`Execution`][ModuleGroup::Execution] innermost. Within a group, built-in
//! modules run first and user-supplied modules extend the list.

pub(crate) mod error_handling;
pub(crate) mod execution;
pub(crate) mod logging;
pub(crate) mod priority;
pub(crate) mod retry;
pub(crate) mod transforms;
pub(crate) mod validation;

pub use logging::LoggingOptions;
pub use retry::{AttemptLimitRetryPolicy, RetryPolicy};
pub use transforms::{RequestTransform, ResponseTransform};

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::RequestContext;
use crate::model::{ClusterResult, ClusterStatus};

/// The ordinal slots of the pipeline, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum ModuleGroup {
    /// Guards that must observe every outcome, before anything else runs.
    LeakPrevention,
    /// Converts unexpected failures into a terminal result.
    GlobalErrorHandling,
    /// In-place request rewriting.
    RequestTransformation,
    /// Priority stamping.
    Priority,
    /// Structured request/result events.
    Logging,
    /// In-place response rewriting.
    ResponseTransformation,
    /// User-level error mapping.
    RequestErrorHandling,
    /// Request shape checks.
    RequestValidation,
    /// Budget sanity checks.
    TimeoutValidation,
    /// Re-runs the inner pipeline on retryable outcomes.
    Retry,
    /// Gatekeeping immediately before dispatch.
    Sending,
    /// Replica ordering and strategy dispatch.
    Execution,
}

impl ModuleGroup {
    pub(crate) const ORDER: [Self; 12] = [
        Self::LeakPrevention,
        Self::GlobalErrorHandling,
        Self::RequestTransformation,
        Self::Priority,
        Self::Logging,
        Self::ResponseTransformation,
        Self::RequestErrorHandling,
        Self::RequestValidation,
        Self::TimeoutValidation,
        Self::Retry,
        Self::Sending,
        Self::Execution,
    ];
}

/// One stage of the request-processing pipeline.
///
/// The contract:
///
/// - call `next` at most once, unless short-circuiting with a synthetic
///   result (the retry module may call it repeatedly);
/// - propagate cancellation promptly;
/// - never mutate the request after `next` returns; responses are the
///   mutable direction on the way out.
pub trait RequestModule: Send + Sync {
    /// Processes the context, usually recursing into the rest of the chain.
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult>;
}

/// The continuation into the remainder of the pipeline.
///
/// Dispatch advances an index over the prebuilt chain rather than nesting
/// closures, so the only allocation per stage is the boxed future itself.
#[derive(Clone, Copy)]
pub struct PipelineNext<'a> {
    chain: &'a [Arc<dyn RequestModule>],
}

impl<'a> PipelineNext<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn RequestModule>]) -> Self {
        Self { chain }
    }

    /// Invokes the remainder of the pipeline.
    pub fn proceed<'b>(&self, context: &'b mut RequestContext) -> BoxFuture<'b, ClusterResult>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((head, rest)) => head.execute(context, PipelineNext { chain: rest }),
            // The built-in execution module terminates every chain; an empty
            // continuation means a module recursed past it.
            None => Box::pin(std::future::ready(
                context.complete(ClusterStatus::UnexpectedException),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_ordered_outermost_first() {
        let order = ModuleGroup::ORDER;
        assert_eq!(order.first(), Some(&ModuleGroup::LeakPrevention));
        assert_eq!(order.last(), Some(&ModuleGroup::Execution));
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(ModuleGroup::Retry < ModuleGroup::Sending);
        assert!(ModuleGroup::Logging < ModuleGroup::RequestValidation);
    }
}
