// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// The result type for fallible configuration operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced while configuring a cluster client.
///
/// Errors of this type are reported at build time, before any request is
/// dispatched. Request-level failures never surface as `Error`; they are
/// carried inside [`ClusterResult`][crate::ClusterResult] instead.
///
/// # Limited introspection
///
/// Other than implementing the [`std::error::Error`] and [`core::fmt::Debug`]
/// traits, this error type currently provides no introspection capabilities.
#[derive(Debug)]
pub struct Error(ErrorKind);

#[derive(Debug)]
enum ErrorKind {
    Configuration(std::borrow::Cow<'static, str>),
    Uri(http::uri::InvalidUri),
}

impl Error {
    const fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub(crate) fn configuration(message: impl Into<std::borrow::Cow<'static, str>>) -> Self {
        Self::from_kind(ErrorKind::Configuration(message.into()))
    }

    pub(crate) const fn uri(error: http::uri::InvalidUri) -> Self {
        Self::from_kind(ErrorKind::Uri(error))
    }

    #[cfg(test)]
    const fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ErrorKind::Configuration(msg) => write!(f, "{msg}"),
            ErrorKind::Uri(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0 {
            ErrorKind::Configuration(_) => None,
            ErrorKind::Uri(err) => Some(err),
        }
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(error: http::uri::InvalidUri) -> Self {
        Self::uri(error)
    }
}
