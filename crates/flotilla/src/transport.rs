// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::cancellation::CancelToken;
use crate::model::{Request, Response};

/// Optional request features a transport can support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Capability {
    /// Streaming request bodies.
    RequestStreaming,
    /// Composite (multi-buffer) request bodies.
    RequestCompositeBody,
}

/// The concrete HTTP transport used to reach replicas.
///
/// Implementations must be internally thread-safe: a single transport is
/// shared by every concurrent attempt the client makes.
///
/// `send` is total. Transport-level failures never surface as errors; they
/// come back as synthetic responses built with the [`Response`] constructors
/// (`Response::connect_failure()`, `Response::timeout()`, ...), each carrying
/// the matching [`TransportVerdict`][crate::TransportVerdict]. Implementations
/// must honour the cancel token and the timeouts: `connect_timeout` bounds
/// connection establishment, `timeout` bounds the whole attempt.
pub trait Transport: Send + Sync + 'static {
    /// Dispatches one request and resolves with the outcome.
    fn send(
        &self,
        request: Request,
        connect_timeout: Option<Duration>,
        timeout: Duration,
        cancel: CancelToken,
    ) -> BoxFuture<'_, Response>;

    /// Reports whether this transport supports the given capability.
    ///
    /// Requests whose body requires an unsupported capability are rejected
    /// by validation before any replica is contacted.
    fn supports(&self, capability: Capability) -> bool {
        let _ = capability;
        false
    }
}
