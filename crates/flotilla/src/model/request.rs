// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use parking_lot::Mutex;

use crate::transport::Capability;

/// An HTTP request as seen by the cluster client.
///
/// The target URL may be relative; the replica transform rebases it against
/// the selected replica before the transport is invoked. Headers are
/// case-insensitive. At most one body representation is attached.
///
/// Cloning a request is cheap: buffers are reference-counted and a streaming
/// body is shared, not duplicated, which is why a streaming request cannot
/// legally be dispatched to several replicas at once.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    /// Creates a request with no headers and no body.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Creates a GET request for the given target.
    #[must_use]
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Creates a POST request for the given target.
    #[must_use]
    pub fn post(uri: Uri) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Returns this request with the header appended.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns this request with the body replaced.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Returns this request with the target URL replaced.
    #[must_use]
    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target URL; may be relative until rebased against a replica.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The request body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }
}

/// The body representations a request or response can carry.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,

    /// A single in-memory buffer.
    Buffer(Bytes),

    /// A streaming source. Single-use: the stream can be consumed by exactly
    /// one attempt, so strategies that dispatch concurrently are rejected for
    /// requests carrying one.
    Stream(StreamBody),

    /// A composite sequence of buffers sent back to back.
    Composite(Vec<Bytes>),
}

impl Body {
    /// The transport capability this body requires, if any.
    #[must_use]
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Self::Empty | Self::Buffer(_) => None,
            Self::Stream(_) => Some(Capability::RequestStreaming),
            Self::Composite(_) => Some(Capability::RequestCompositeBody),
        }
    }

    /// Returns `true` when the body can only be submitted once.
    #[must_use]
    pub fn is_single_use(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl From<Bytes> for Body {
    fn from(buffer: Bytes) -> Self {
        Self::Buffer(buffer)
    }
}

/// A single-use streaming request body.
///
/// Clones share the underlying stream; the first taker wins. A transport that
/// observes an already-consumed stream reports a content-reuse failure.
#[derive(Clone)]
pub struct StreamBody {
    inner: Arc<Mutex<Option<BoxStream<'static, Bytes>>>>,
}

impl StreamBody {
    /// Wraps a stream of buffers into a single-use body.
    pub fn new<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Bytes> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::pin(stream)))),
        }
    }

    /// Takes the stream out, leaving the body consumed.
    ///
    /// Returns `None` when the stream was already taken.
    #[must_use]
    pub fn take(&self) -> Option<BoxStream<'static, Bytes>> {
        self.inner.lock().take()
    }

    /// Returns `true` once the stream has been taken.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBody")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
