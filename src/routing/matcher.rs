//! Path prefix matching.
//!
//! # Responsibilities
//! - Normalize configured prefixes (leading `/`, no trailing `/`)
//! - Match request paths on path-segment boundaries
//! - Split a matching path into prefix and remainder
//!
//! # Design Decisions
//! - Path matching is case-sensitive and works on the raw (still
//!   percent-encoded) path, so the remainder is forwarded byte for byte
//! - `/profile-cell` matches `/profile-cell` and `/profile-cell/...`, never
//!   `/profile-cellx`
//! - The root prefix `/` matches every path
//! - No regex, so matching stays O(prefix length)

use thiserror::Error;

/// Reasons a configured prefix is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    #[error("prefix is empty")]
    Empty,

    #[error("prefix {0:?} contains a query or fragment")]
    QueryOrFragment(String),

    #[error("prefix {0:?} contains whitespace or control characters")]
    InvalidCharacter(String),

    #[error("prefix {0:?} contains an empty or dot segment")]
    InvalidSegment(String),
}

/// Normalize a configured prefix.
///
/// Adds the leading `/` (prefixes such as `profile-cell/api/v1/profile` are
/// accepted) and drops trailing slashes, keeping `/` for the root.
pub fn normalize_prefix(raw: &str) -> Result<String, PrefixError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PrefixError::Empty);
    }
    if raw.contains(['?', '#']) {
        return Err(PrefixError::QueryOrFragment(raw.to_string()));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(PrefixError::InvalidCharacter(raw.to_string()));
    }

    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(PrefixError::InvalidSegment(raw.to_string()));
    }

    Ok(format!("/{trimmed}"))
}

/// Matches the request path against a normalized prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher from a configured prefix.
    pub fn new(prefix: &str) -> Result<Self, PrefixError> {
        Ok(Self {
            prefix: normalize_prefix(prefix)?,
        })
    }

    /// The normalized prefix.
    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    pub fn is_root(&self) -> bool {
        self.prefix == "/"
    }

    /// Prefix length in bytes; longer means more specific.
    pub fn specificity(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.prefix.len()
        }
    }

    /// Returns the part of `path` after the prefix, or `None` when the path
    /// is not under this prefix.
    ///
    /// The remainder is either empty or starts with `/`.
    pub fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        if self.is_root() {
            return path.starts_with('/').then_some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Returns true if the path lies under this prefix.
    pub fn matches(&self, path: &str) -> bool {
        self.strip(path).is_some()
    }

    /// Returns true if every path under `other` is also under `self`.
    pub fn contains(&self, other: &PathPrefixMatcher) -> bool {
        self.matches(&other.prefix)
    }
}

/// Join a normalized rewrite prefix with a remainder produced by
/// [`PathPrefixMatcher::strip`].
pub fn join_rewrite(rewrite_prefix: &str, remainder: &str) -> String {
    if rewrite_prefix == "/" {
        if remainder.is_empty() {
            "/".to_string()
        } else {
            remainder.to_string()
        }
    } else {
        format!("{rewrite_prefix}{remainder}")
    }
}
