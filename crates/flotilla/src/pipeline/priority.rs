// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use futures::future::BoxFuture;
use http::{HeaderName, HeaderValue};

use crate::context::RequestContext;
use crate::model::ClusterResult;
use crate::pipeline::{PipelineNext, RequestModule};

/// The application header carrying the request priority to replicas.
pub(crate) const PRIORITY_HEADER: HeaderName = HeaderName::from_static("request-priority");

/// Stamps the request priority onto an application header so servers can
/// shed sheddable traffic first.
pub(crate) struct PriorityModule;

impl RequestModule for PriorityModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            if let Some(priority) = context.parameters().priority() {
                context
                    .request_mut()
                    .headers_mut()
                    .insert(PRIORITY_HEADER, HeaderValue::from_static(priority.as_str()));
            }
            next.proceed(context).await
        })
    }
}
