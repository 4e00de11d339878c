//! Request descriptors and bucket key generation.

use std::fmt;
use std::net::IpAddr;

use super::rules::Policy;

/// Principal used when no caller address can be determined.
pub const UNKNOWN_PRINCIPAL: &str = "unknown";

/// Query parameter that selects diff mode.
pub const DIFF_PARAM: &str = "diff";

const DIFF_MARKER: &str = "diff";
const KEY_SEPARATOR: char = '|';

/// The parts of an inbound request the limiter looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Request path, without the query string
    pub path: String,
    /// Whether the request asked for diff mode
    pub diff: bool,
    /// Raw `X-Forwarded-For` value, if the header was present and readable
    pub forwarded_for: Option<String>,
    /// Address of the directly connected peer
    pub peer_addr: Option<IpAddr>,
}

impl RequestDescriptor {
    /// Describe a request for `path` with no mode flag and no address.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the diff flag from a raw query string.
    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.diff = query.map(diff_flag).unwrap_or(false);
        self
    }

    pub fn with_diff(mut self, diff: bool) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    pub fn with_peer_addr(mut self, addr: IpAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// The caller address used for per-principal keys.
    ///
    /// The first entry of `X-Forwarded-For` wins when it is non-blank, then
    /// the peer address, then [`UNKNOWN_PRINCIPAL`]. Unattributable traffic
    /// therefore shares a single bucket instead of failing the request.
    pub fn principal(&self) -> String {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty());

        match (forwarded, self.peer_addr) {
            (Some(first), _) => first.to_string(),
            (None, Some(addr)) => addr.to_string(),
            (None, None) => UNKNOWN_PRINCIPAL.to_string(),
        }
    }
}

/// Read the diff flag from a raw query string.
///
/// Only the first `diff` parameter counts, and only a case-insensitive
/// `true` turns diff mode on. Anything else leaves it off.
pub fn diff_flag(query: &str) -> bool {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == DIFF_PARAM)
        .map(|(_, value)| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// A key that identifies one token bucket.
///
/// The key is the request path, then a diff marker for diff-mode requests,
/// then the caller address when the policy is per-principal, joined by `|`.
/// Distinct routes never collide, diff and normal traffic never share a
/// bucket, and global policies pool every caller into one bucket per route
/// and mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey(String);

impl BucketKey {
    /// Build the key for `request` under `policy`.
    pub fn build(policy: &Policy, request: &RequestDescriptor) -> Self {
        let principal = policy.per_principal().then(|| request.principal());
        Self::from_parts(&request.path, request.diff, principal.as_deref())
    }

    /// Assemble a key from its parts.
    pub fn from_parts(path: &str, diff: bool, principal: Option<&str>) -> Self {
        let mut key = String::with_capacity(path.len() + 24);
        key.push_str(path);
        if diff {
            key.push(KEY_SEPARATOR);
            key.push_str(DIFF_MARKER);
        }
        if let Some(principal) = principal {
            key.push(KEY_SEPARATOR);
            key.push_str(principal);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
