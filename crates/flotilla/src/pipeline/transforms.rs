// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::RequestContext;
use crate::model::{ClusterResult, Request, Response};
use crate::pipeline::{PipelineNext, RequestModule};

/// An in-place request rewrite applied before dispatch.
pub trait RequestTransform: Send + Sync {
    /// Mutates the request.
    fn transform(&self, request: &mut Request);
}

impl<F> RequestTransform for F
where
    F: Fn(&mut Request) + Send + Sync,
{
    fn transform(&self, request: &mut Request) {
        self(request);
    }
}

/// An in-place rewrite of the selected response applied on the way out.
pub trait ResponseTransform: Send + Sync {
    /// Mutates the selected response.
    fn transform(&self, response: &mut Response);
}

impl<F> ResponseTransform for F
where
    F: Fn(&mut Response) + Send + Sync,
{
    fn transform(&self, response: &mut Response) {
        self(response);
    }
}

/// Applies the registered request transforms in registration order.
pub(crate) struct RequestTransformationModule {
    transforms: Vec<Arc<dyn RequestTransform>>,
}

impl RequestTransformationModule {
    pub fn new(transforms: Vec<Arc<dyn RequestTransform>>) -> Self {
        Self { transforms }
    }
}

impl RequestModule for RequestTransformationModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            for transform in &self.transforms {
                transform.transform(context.request_mut());
            }
            next.proceed(context).await
        })
    }
}

/// Applies the registered response transforms to the selected response, in
/// registration order.
pub(crate) struct ResponseTransformationModule {
    transforms: Vec<Arc<dyn ResponseTransform>>,
}

impl ResponseTransformationModule {
    pub fn new(transforms: Vec<Arc<dyn ResponseTransform>>) -> Self {
        Self { transforms }
    }
}

impl RequestModule for ResponseTransformationModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            let mut result = next.proceed(context).await;
            for transform in &self.transforms {
                transform.transform(result.response_mut());
            }
            result
        })
    }
}
