// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use http::HeaderMap;

use super::request::Body;

/// An HTTP response, or a synthetic stand-in for a transport-level outcome.
///
/// Besides the familiar status-code ranges, the code space carries synthetic
/// codes for outcomes the wire never produced: connection failures, attempt
/// timeouts, cancellations. Response criteria and the adaptive health
/// subsystem classify replicas based on both the code and the transport
/// verdict.
#[derive(Debug, Clone)]
pub struct Response {
    code: ResponseCode,
    headers: HeaderMap,
    body: Body,
    verdict: TransportVerdict,
}

impl Response {
    /// Creates a successful-transport response with the given code.
    #[must_use]
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            headers: HeaderMap::new(),
            body: Body::Empty,
            verdict: TransportVerdict::Success,
        }
    }

    /// Creates a synthetic response for a transport-level outcome.
    #[must_use]
    pub fn synthetic(code: ResponseCode, verdict: TransportVerdict) -> Self {
        Self {
            code,
            headers: HeaderMap::new(),
            body: Body::Empty,
            verdict,
        }
    }

    /// The sentinel used when no replica produced a response.
    #[must_use]
    pub fn none() -> Self {
        Self::synthetic(ResponseCode::UNKNOWN, TransportVerdict::UnknownFailure)
    }

    /// A synthetic response for an attempt that exceeded its timeout.
    #[must_use]
    pub fn timeout() -> Self {
        Self::synthetic(ResponseCode::REQUEST_TIMEOUT, TransportVerdict::Timeout)
    }

    /// A synthetic response for a failed connection establishment.
    #[must_use]
    pub fn connect_failure() -> Self {
        Self::synthetic(ResponseCode::CONNECT_FAILURE, TransportVerdict::ConnectFailure)
    }

    /// A synthetic response for a cancelled attempt.
    #[must_use]
    pub fn canceled() -> Self {
        Self::synthetic(ResponseCode::CANCELED, TransportVerdict::Canceled)
    }

    /// A synthetic response for a single-use body that was already consumed.
    #[must_use]
    pub fn stream_reuse_failure() -> Self {
        Self::synthetic(ResponseCode::STREAM_REUSE_FAILURE, TransportVerdict::ContentReuseFailure)
    }

    /// Returns this response with the headers replaced.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Returns this response with the body replaced.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// The response code.
    #[must_use]
    pub fn code(&self) -> ResponseCode {
        self.code
    }

    /// The semantic category of the response code.
    #[must_use]
    pub fn class(&self) -> ResponseClass {
        self.code.class()
    }

    /// The response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The response body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The transport-level outcome of the attempt that produced this response.
    #[must_use]
    pub fn verdict(&self) -> TransportVerdict {
        self.verdict
    }

    /// Returns `true` when the code is in the success range.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.class() == ResponseClass::Success
    }
}

/// A response code: standard HTTP codes plus synthetic transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(u16);

impl ResponseCode {
    /// No response was produced.
    pub const UNKNOWN: Self = Self(0);
    /// 200 OK.
    pub const OK: Self = Self(200);
    /// 404 Not Found.
    pub const NOT_FOUND: Self = Self(404);
    /// 408: the attempt exceeded its timeout.
    pub const REQUEST_TIMEOUT: Self = Self(408);
    /// 429: the replica asked the caller to slow down.
    pub const TOO_MANY_REQUESTS: Self = Self(429);
    /// 500 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    /// 503 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    /// Synthetic: connection establishment failed.
    pub const CONNECT_FAILURE: Self = Self(515);
    /// Synthetic: the request could not be sent.
    pub const SEND_FAILURE: Self = Self(516);
    /// Synthetic: an unclassified transport failure.
    pub const UNKNOWN_FAILURE: Self = Self(520);
    /// Synthetic: the attempt was cancelled before completing.
    pub const CANCELED: Self = Self(521);
    /// Synthetic: a single-use body had already been consumed.
    pub const STREAM_REUSE_FAILURE: Self = Self(522);

    /// Creates a code from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        Self(code)
    }

    /// The numeric value of this code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// The semantic category of this code.
    #[must_use]
    pub const fn class(self) -> ResponseClass {
        match self.0 {
            100..=199 => ResponseClass::Informational,
            200..=299 => ResponseClass::Success,
            300..=399 => ResponseClass::Redirection,
            400..=499 => ResponseClass::ClientFailure,
            515..=524 => ResponseClass::NetworkFailure,
            500..=599 => ResponseClass::ServerFailure,
            _ => ResponseClass::Unknown,
        }
    }
}

impl From<http::StatusCode> for ResponseCode {
    fn from(status: http::StatusCode) -> Self {
        Self(status.as_u16())
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Semantic categories of response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    /// 1xx.
    Informational,
    /// 2xx.
    Success,
    /// 3xx.
    Redirection,
    /// 4xx.
    ClientFailure,
    /// 5xx other than the synthetic network band.
    ServerFailure,
    /// Synthetic codes describing transport-level failures.
    NetworkFailure,
    /// Anything outside the known ranges, including the no-response sentinel.
    Unknown,
}

/// The transport-level outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportVerdict {
    /// The transport produced a response from the wire.
    Success,
    /// The attempt did not complete within its timeout.
    Timeout,
    /// The connection could not be established in time.
    ConnectFailure,
    /// A single-use body had already been consumed.
    ContentReuseFailure,
    /// The attempt was cancelled.
    Canceled,
    /// An unclassified transport failure.
    UnknownFailure,
}
