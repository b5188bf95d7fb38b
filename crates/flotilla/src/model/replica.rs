// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use http::Uri;
use http::uri::{Authority, Scheme};

use crate::error::{Error, Result};

/// One concrete server endpoint belonging to a logical cluster.
///
/// A replica is an absolute HTTP or HTTPS base URL. Equality and hashing are
/// ordinal on the normalized form: the scheme and host are lowercased by URI
/// parsing, default ports are dropped, and a trailing slash on the path is
/// ignored. A replica is immutable for the lifetime of a request.
///
/// # Examples
///
/// ```
/// use flotilla::Replica;
///
/// let a = Replica::parse("http://host-a:80/api/")?;
/// let b = Replica::parse("http://HOST-A/api")?;
/// assert_eq!(a, b);
/// # Ok::<_, flotilla::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Replica {
    uri: Uri,
    normalized: Arc<str>,
}

impl Replica {
    /// Parses an absolute base URL into a replica.
    ///
    /// # Errors
    ///
    /// Returns an error when the input is not a valid URI, has no scheme or
    /// authority, or uses a scheme other than `http`/`https`.
    pub fn parse(input: &str) -> Result<Self> {
        let uri: Uri = input.parse()?;
        Self::from_uri(uri)
    }

    /// Converts an already-parsed URI into a replica.
    ///
    /// # Errors
    ///
    /// Returns an error when the URI is not absolute or uses a scheme other
    /// than `http`/`https`.
    pub fn from_uri(uri: Uri) -> Result<Self> {
        let scheme = uri
            .scheme()
            .ok_or_else(|| Error::configuration("replica URL must be absolute (missing scheme)"))?;
        if *scheme != Scheme::HTTP && *scheme != Scheme::HTTPS {
            return Err(Error::configuration("replica URL scheme must be http or https"));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| Error::configuration("replica URL must be absolute (missing authority)"))?;

        let normalized = normalize(scheme, authority, uri.path());
        Ok(Self {
            uri,
            normalized: normalized.into(),
        })
    }

    /// The parsed base URI of this replica.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The normalized form used for equality and hashing.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

fn normalize(scheme: &Scheme, authority: &Authority, path: &str) -> String {
    let default_port = if *scheme == Scheme::HTTPS { 443 } else { 80 };
    let host = authority.host();

    let mut normalized = String::with_capacity(scheme.as_str().len() + authority.as_str().len() + path.len() + 3);
    normalized.push_str(scheme.as_str());
    normalized.push_str("://");
    normalized.push_str(host);
    if let Some(port) = authority.port_u16()
        && port != default_port
    {
        normalized.push(':');
        normalized.push_str(&port.to_string());
    }

    let path = path.trim_end_matches('/');
    normalized.push_str(path);
    normalized
}

impl PartialEq for Replica {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Replica {}

impl Hash for Replica {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}
