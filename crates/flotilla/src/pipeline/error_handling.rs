// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;

use crate::context::RequestContext;
use crate::model::{ClusterResult, ClusterStatus};
use crate::pipeline::{PipelineNext, RequestModule};

/// The outermost guard: no failure escapes the top of the pipeline.
///
/// A panic anywhere below is caught and converted into a terminal
/// [`ClusterStatus::UnexpectedException`] result carrying whatever attempt
/// results were accumulated before the failure.
pub(crate) struct GlobalErrorHandlingModule;

impl RequestModule for GlobalErrorHandlingModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(next.proceed(context)).catch_unwind().await;

            match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());

                    tracing::event!(
                        name: "flotilla.unexpected_failure",
                        tracing::Level::ERROR,
                        url = %context.request().uri(),
                        panic = %message,
                    );

                    context.complete(ClusterStatus::UnexpectedException)
                }
            }
        })
    }
}
