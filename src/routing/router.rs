//! Route lookup and path rewriting.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the route owning a request path (longest prefix wins)
//! - Rewrite the public prefix to the upstream's internal prefix
//! - Return the resolved route or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Routes kept sorted by prefix length, so the first hit is the longest
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Identical prefixes are rejected instead of picking one silently

use std::collections::HashMap;

use axum::http::uri::{InvalidUri, Uri};
use thiserror::Error;
use url::Url;

use crate::config::RouteConfig;
use crate::routing::matcher::{join_rewrite, normalize_prefix, PathPrefixMatcher, PrefixError};

/// Reasons an upstream base URL is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported scheme {0:?} (only http is supported)")]
    UnsupportedScheme(String),

    #[error("missing host")]
    MissingHost,

    #[error("credentials are not allowed in the upstream URL")]
    Credentials,

    #[error("query or fragment is not allowed in the upstream URL")]
    QueryOrFragment,
}

/// Errors raised while compiling the route table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteTableError {
    #[error("no routes configured")]
    Empty,

    #[error("route {name:?}: invalid match prefix: {source}")]
    InvalidMatchPrefix { name: String, source: PrefixError },

    #[error("route {name:?}: invalid rewrite prefix: {source}")]
    InvalidRewritePrefix { name: String, source: PrefixError },

    #[error("route {name:?}: invalid upstream {url:?}: {source}")]
    InvalidUpstream {
        name: String,
        url: String,
        source: UpstreamError,
    },

    #[error("routes {first:?} and {second:?} share the match prefix {prefix:?}")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },
}

/// A parsed upstream base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// `scheme://authority[/base-path]` without a trailing slash.
    base: String,
    /// `host[:port]`, sent as the Host header and used as metrics label.
    authority: String,
}

impl Upstream {
    /// Parse an upstream base URL such as `http://profile-service:8080`.
    pub fn parse(raw: &str) -> Result<Self, UpstreamError> {
        let url = Url::parse(raw.trim())?;
        if url.scheme() != "http" {
            return Err(UpstreamError::UnsupportedScheme(url.scheme().to_string()));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(UpstreamError::Credentials);
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(UpstreamError::QueryOrFragment);
        }
        let host = url.host_str().ok_or(UpstreamError::MissingHost)?;

        // `Url::port` is None for the scheme's default port.
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let base_path = url.path().trim_end_matches('/');

        Ok(Self {
            base: format!("{}://{}{}", url.scheme(), authority, base_path),
            authority,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}

/// A compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    matcher: PathPrefixMatcher,
    rewrite_prefix: String,
    upstream: Upstream,
}

impl Route {
    /// Compile a route from its configuration.
    pub fn from_config(config: &RouteConfig) -> Result<Self, RouteTableError> {
        let matcher = PathPrefixMatcher::new(&config.match_prefix).map_err(|source| {
            RouteTableError::InvalidMatchPrefix {
                name: config.name.clone(),
                source,
            }
        })?;

        // An empty rewrite prefix strips the match prefix entirely.
        let rewrite_prefix = if config.rewrite_prefix.trim().is_empty() {
            "/".to_string()
        } else {
            normalize_prefix(&config.rewrite_prefix).map_err(|source| {
                RouteTableError::InvalidRewritePrefix {
                    name: config.name.clone(),
                    source,
                }
            })?
        };

        let upstream =
            Upstream::parse(&config.upstream).map_err(|source| RouteTableError::InvalidUpstream {
                name: config.name.clone(),
                url: config.upstream.clone(),
                source,
            })?;

        Ok(Self {
            name: config.name.clone(),
            matcher,
            rewrite_prefix,
            upstream,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn match_prefix(&self) -> &str {
        self.matcher.as_str()
    }

    pub fn rewrite_prefix(&self) -> &str {
        &self.rewrite_prefix
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    fn resolve(&self, path: &str) -> Option<ResolvedRoute<'_>> {
        let remainder = self.matcher.strip(path)?;
        Some(ResolvedRoute {
            route: self,
            rewritten_path: join_rewrite(&self.rewrite_prefix, remainder),
        })
    }
}

/// A route selected for a request path, with the path already rewritten.
#[derive(Debug, Clone)]
pub struct ResolvedRoute<'a> {
    pub route: &'a Route,
    pub rewritten_path: String,
}

impl ResolvedRoute<'_> {
    /// Build the upstream request URI, carrying the query string unchanged.
    pub fn upstream_uri(&self, query: Option<&str>) -> Result<Uri, InvalidUri> {
        let mut target = format!("{}{}", self.route.upstream.base, self.rewritten_path);
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        target.parse()
    }
}

/// Immutable table of routes, consulted once per request.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile and check the configured routes.
    pub fn new(configs: &[RouteConfig]) -> Result<Self, RouteTableError> {
        if configs.is_empty() {
            return Err(RouteTableError::Empty);
        }

        let mut routes = configs
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(duplicate) = duplicate_prefixes(&routes).into_iter().next() {
            return Err(duplicate);
        }

        // Longest prefix first; stable sort keeps config order otherwise.
        routes.sort_by(|a, b| b.matcher.specificity().cmp(&a.matcher.specificity()));

        for (i, inner) in routes.iter().enumerate() {
            for outer in &routes[i + 1..] {
                if outer.matcher.contains(&inner.matcher) {
                    tracing::info!(
                        outer = %outer.name,
                        outer_prefix = %outer.match_prefix(),
                        inner = %inner.name,
                        inner_prefix = %inner.match_prefix(),
                        "Nested route prefixes, longest prefix wins"
                    );
                }
            }
        }

        Ok(Self { routes })
    }

    /// Find the route owning `path` and rewrite it.
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute<'_>> {
        self.routes.iter().find_map(|route| route.resolve(path))
    }

    /// All routes, longest prefix first.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// Every pair of routes sharing a normalized match prefix.
pub(crate) fn duplicate_prefixes(routes: &[Route]) -> Vec<RouteTableError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut duplicates = Vec::new();
    for route in routes {
        match seen.get(route.match_prefix()) {
            Some(first) => duplicates.push(RouteTableError::DuplicatePrefix {
                prefix: route.match_prefix().to_string(),
                first: first.to_string(),
                second: route.name.clone(),
            }),
            None => {
                seen.insert(route.match_prefix(), &route.name);
            }
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_routes() -> Vec<RouteConfig> {
        vec![
            RouteConfig::new("profile", "/svc/profiles", "/api/v1/profile", "http://profile:9000"),
            RouteConfig::new("files", "profile-cell/api/v1/files", "/api/v1/files", "http://files:9001/"),
            RouteConfig::new("a", "/a", "/upstream-a", "http://a:80"),
            RouteConfig::new("ab", "/a/b", "/upstream-ab", "http://ab:8080/base/"),
        ]
    }

    #[test]
    fn test_concrete_scenario() {
        let table = RouteTable::new(&test_routes()).unwrap();
        let resolved = table.resolve("/svc/profiles/42").unwrap();
        assert_eq!(resolved.route.name(), "profile");
        assert_eq!(resolved.rewritten_path, "/api/v1/profile/42");
        assert_eq!(
            resolved.upstream_uri(Some("fields=name")).unwrap().to_string(),
            "http://profile:9000/api/v1/profile/42?fields=name"
        );
    }

    #[test]
    fn test_rewrite_preserves_remainder() {
        let table = RouteTable::new(&test_routes()).unwrap();
        for rest in ["", "/", "/x", "/x/y/z", "/%2Fencoded", "/a;b=c"] {
            let path = format!("/svc/profiles{rest}");
            let resolved = table.resolve(&path).unwrap();
            assert_eq!(resolved.rewritten_path, format!("/api/v1/profile{rest}"));
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::new(&test_routes()).unwrap();

        let resolved = table.resolve("/a/b/c").unwrap();
        assert_eq!(resolved.route.name(), "ab");
        assert_eq!(resolved.rewritten_path, "/upstream-ab/c");
        assert_eq!(
            resolved.upstream_uri(None).unwrap().to_string(),
            "http://ab:8080/base/upstream-ab/c"
        );

        let resolved = table.resolve("/a/bc").unwrap();
        assert_eq!(resolved.route.name(), "a");
        assert_eq!(resolved.rewritten_path, "/upstream-a/bc");
    }

    #[test]
    fn test_longest_prefix_independent_of_order() {
        let mut routes = test_routes();
        routes.reverse();
        let table = RouteTable::new(&routes).unwrap();
        assert_eq!(table.resolve("/a/b/c").unwrap().route.name(), "ab");
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::new(&test_routes()).unwrap();
        assert!(table.resolve("/svc/profilesx").is_none());
        assert!(table.resolve("/svc").is_none());
        assert!(table.resolve("/").is_none());
    }

    #[test]
    fn test_root_route_catches_everything_else() {
        let mut routes = test_routes();
        routes.push(RouteConfig::new("root", "/", "/", "http://fallback:80"));
        let table = RouteTable::new(&routes).unwrap();

        let resolved = table.resolve("/unknown/path").unwrap();
        assert_eq!(resolved.route.name(), "root");
        assert_eq!(resolved.rewritten_path, "/unknown/path");
        assert_eq!(table.resolve("/a/b").unwrap().route.name(), "ab");
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let routes = vec![
            RouteConfig::new("one", "/api/", "/x", "http://one:80"),
            RouteConfig::new("two", "api", "/y", "http://two:80"),
        ];
        assert_eq!(
            RouteTable::new(&routes).unwrap_err(),
            RouteTableError::DuplicatePrefix {
                prefix: "/api".into(),
                first: "one".into(),
                second: "two".into(),
            }
        );
    }

    #[test]
    fn test_empty_table_rejected() {
        assert_eq!(RouteTable::new(&[]).unwrap_err(), RouteTableError::Empty);
    }

    #[test]
    fn test_invalid_upstream_rejected() {
        for (url, expected) in [
            ("https://secure:443", UpstreamError::UnsupportedScheme("https".into())),
            ("http://user:pw@host:80", UpstreamError::Credentials),
            ("http://host:80/?x=1", UpstreamError::QueryOrFragment),
        ] {
            let routes = vec![RouteConfig::new("r", "/r", "/", url)];
            match RouteTable::new(&routes).unwrap_err() {
                RouteTableError::InvalidUpstream { source, .. } => assert_eq!(source, expected),
                other => panic!("unexpected error: {other}"),
            }
        }

        let routes = vec![RouteConfig::new("r", "/r", "/", "not a url")];
        assert!(matches!(
            RouteTable::new(&routes),
            Err(RouteTableError::InvalidUpstream { .. })
        ));
    }

    #[test]
    fn test_empty_rewrite_strips_prefix() {
        let routes = vec![RouteConfig::new("strip", "/public", "", "http://svc:80")];
        let table = RouteTable::new(&routes).unwrap();
        assert_eq!(table.resolve("/public/users").unwrap().rewritten_path, "/users");
        assert_eq!(table.resolve("/public").unwrap().rewritten_path, "/");
    }

    #[test]
    fn test_upstream_parse() {
        let upstream = Upstream::parse("http://profile:9000").unwrap();
        assert_eq!(upstream.base(), "http://profile:9000");
        assert_eq!(upstream.authority(), "profile:9000");

        let upstream = Upstream::parse("http://files/").unwrap();
        assert_eq!(upstream.base(), "http://files");
        assert_eq!(upstream.authority(), "files");
    }
}
