//! Configuration loading from disk and the environment.
//!
//! Routes come from three places, later ones overriding earlier ones by name:
//! the optional TOML file, services listed in `GATEWAY_SERVICES`, and, when
//! neither defines any route, the built-in profile-cell catalog whose
//! upstream URLs must be provided as `PROFILE_SERVICE_URL` and
//! `FILES_SERVICE_URL`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::{GatewayConfig, RouteConfig};
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_BIND_ADDRESS: &str = "GATEWAY_BIND_ADDRESS";
pub const ENV_CONNECT_TIMEOUT: &str = "GATEWAY_CONNECT_TIMEOUT_SECS";
pub const ENV_IDLE_TIMEOUT: &str = "GATEWAY_IDLE_TIMEOUT_SECS";
pub const ENV_SHUTDOWN_GRACE: &str = "GATEWAY_SHUTDOWN_GRACE_SECS";
pub const ENV_SERVICES: &str = "GATEWAY_SERVICES";

/// A service the gateway knows how to expose without explicit prefixes.
struct BuiltinService {
    name: &'static str,
    match_prefix: &'static str,
    rewrite_prefix: &'static str,
}

const PROFILE_CELL: [BuiltinService; 2] = [
    BuiltinService {
        name: "profile",
        match_prefix: "/profile-cell/api/v1/profile",
        rewrite_prefix: "/api/v1/profile",
    },
    BuiltinService {
        name: "files",
        match_prefix: "/profile-cell/api/v1/files",
        rewrite_prefix: "/api/v1/files",
    },
];

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing required environment variable {0}")]
    MissingVar(String),

    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidVar {
        var: String,
        value: String,
        reason: String,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, overlay and validate the configuration from the process environment.
pub fn load_config(
    path: Option<&Path>,
    bind_override: Option<&str>,
) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => GatewayConfig::default(),
    };

    apply_env(&mut config, std::env::vars())?;

    if let Some(bind) = bind_override {
        config.listener.bind_address = bind.to_string();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML configuration file.
pub fn read_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply environment overrides to `config`.
///
/// Empty values are treated as unset.
pub fn apply_env<I>(config: &mut GatewayConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let env = Env::new(vars);

    if let Some(bind) = env.get(ENV_BIND_ADDRESS) {
        config.listener.bind_address = bind.to_string();
    }
    if let Some(secs) = env.parse_secs(ENV_CONNECT_TIMEOUT)? {
        config.timeouts.connect_secs = secs;
    }
    if let Some(secs) = env.parse_secs(ENV_IDLE_TIMEOUT)? {
        config.timeouts.idle_secs = secs;
    }
    if let Some(secs) = env.parse_secs(ENV_SHUTDOWN_GRACE)? {
        config.timeouts.shutdown_grace_secs = secs;
    }

    let services = match env.get(ENV_SERVICES) {
        Some(list) => parse_service_list(list)?,
        None if config.routes.is_empty() => {
            PROFILE_CELL.iter().map(|s| s.name.to_string()).collect()
        }
        None => Vec::new(),
    };

    for service in services {
        let route = env.service_route(&service)?;
        match config.routes.iter_mut().find(|r| r.name == route.name) {
            Some(existing) => *existing = route,
            None => config.routes.push(route),
        }
    }

    Ok(())
}

fn parse_service_list(list: &str) -> Result<Vec<String>, ConfigError> {
    let mut services: Vec<String> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidVar {
                var: ENV_SERVICES.to_string(),
                value: list.to_string(),
                reason: format!("invalid service name {name:?}"),
            });
        }
        if !services.iter().any(|s| s == name) {
            services.push(name.to_string());
        }
    }
    Ok(services)
}

/// Environment snapshot.
struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    fn new<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            vars: vars
                .into_iter()
                .filter(|(_, value)| !value.trim().is_empty())
                .collect(),
        }
    }

    fn get(&self, var: &str) -> Option<&str> {
        self.vars.get(var).map(|v| v.trim())
    }

    fn require(&self, var: &str) -> Result<&str, ConfigError> {
        self.get(var)
            .ok_or_else(|| ConfigError::MissingVar(var.to_string()))
    }

    fn parse_secs(&self, var: &str) -> Result<Option<u64>, ConfigError> {
        self.get(var)
            .map(|value| {
                value.parse::<u64>().map_err(|e| ConfigError::InvalidVar {
                    var: var.to_string(),
                    value: value.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Build the route for `service` from `<NAME>_SERVICE_URL`,
    /// `<NAME>_MATCH_PREFIX` and `<NAME>_REWRITE_PREFIX`.
    fn service_route(&self, service: &str) -> Result<RouteConfig, ConfigError> {
        let var_prefix = service.to_ascii_uppercase().replace('-', "_");
        let builtin = PROFILE_CELL.iter().find(|s| s.name == service);

        let upstream = self.require(&format!("{var_prefix}_SERVICE_URL"))?;

        let match_var = format!("{var_prefix}_MATCH_PREFIX");
        let match_prefix = match (self.get(&match_var), builtin) {
            (Some(prefix), _) => prefix,
            (None, Some(builtin)) => builtin.match_prefix,
            (None, None) => return Err(ConfigError::MissingVar(match_var)),
        };

        let rewrite_var = format!("{var_prefix}_REWRITE_PREFIX");
        let rewrite_prefix = match (self.get(&rewrite_var), builtin) {
            (Some(prefix), _) => prefix,
            (None, Some(builtin)) => builtin.rewrite_prefix,
            (None, None) => return Err(ConfigError::MissingVar(rewrite_var)),
        };

        Ok(RouteConfig::new(service, match_prefix, rewrite_prefix, upstream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[listener]
bind_address = "127.0.0.1:9999"

[timeouts]
idle_secs = 10

[[routes]]
name = "profile"
match_prefix = "/svc/profiles"
rewrite_prefix = "/api/v1/profile"
upstream = "http://profile:9000"
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9999");
        assert_eq!(config.timeouts.idle_secs, 10);
        assert_eq!(config.timeouts.connect_secs, 3);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].upstream, "http://profile:9000");
    }

    #[test]
    fn test_builtin_profile_cell_routes() {
        let mut config = GatewayConfig::default();
        apply_env(
            &mut config,
            vars(&[
                ("PROFILE_SERVICE_URL", "http://profile-service:8080"),
                ("FILES_SERVICE_URL", "http://file-service:8080"),
            ]),
        )
        .unwrap();

        assert_eq!(
            config.routes,
            vec![
                RouteConfig::new(
                    "profile",
                    "/profile-cell/api/v1/profile",
                    "/api/v1/profile",
                    "http://profile-service:8080"
                ),
                RouteConfig::new(
                    "files",
                    "/profile-cell/api/v1/files",
                    "/api/v1/files",
                    "http://file-service:8080"
                ),
            ]
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_missing_service_url_is_fatal() {
        let mut config = GatewayConfig::default();
        let err = apply_env(
            &mut config,
            vars(&[("PROFILE_SERVICE_URL", "http://profile-service:8080")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "FILES_SERVICE_URL"));
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut config = GatewayConfig::default();
        let err = apply_env(
            &mut config,
            vars(&[("PROFILE_SERVICE_URL", ""), ("FILES_SERVICE_URL", "http://f:1")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "PROFILE_SERVICE_URL"));
    }

    #[test]
    fn test_custom_services() {
        let mut config = GatewayConfig::default();
        apply_env(
            &mut config,
            vars(&[
                ("GATEWAY_SERVICES", "dashboard, profile"),
                ("DASHBOARD_SERVICE_URL", "http://dashboard:8080"),
                ("DASHBOARD_MATCH_PREFIX", "/profile-cell/graphql"),
                ("DASHBOARD_REWRITE_PREFIX", "/graphql"),
                ("PROFILE_SERVICE_URL", "http://profile:8080"),
                ("PROFILE_REWRITE_PREFIX", "/v2/profile"),
                ("GATEWAY_IDLE_TIMEOUT_SECS", "12"),
                ("GATEWAY_BIND_ADDRESS", "127.0.0.1:7000"),
            ]),
        )
        .unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].name, "dashboard");
        assert_eq!(config.routes[0].match_prefix, "/profile-cell/graphql");
        assert_eq!(config.routes[1].match_prefix, "/profile-cell/api/v1/profile");
        assert_eq!(config.routes[1].rewrite_prefix, "/v2/profile");
        assert_eq!(config.timeouts.idle_secs, 12);
        assert_eq!(config.listener.bind_address, "127.0.0.1:7000");
    }

    #[test]
    fn test_custom_service_requires_prefixes() {
        let mut config = GatewayConfig::default();
        let err = apply_env(
            &mut config,
            vars(&[
                ("GATEWAY_SERVICES", "search"),
                ("SEARCH_SERVICE_URL", "http://search:8080"),
                ("SEARCH_MATCH_PREFIX", "/search"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "SEARCH_REWRITE_PREFIX"));
    }

    #[test]
    fn test_file_routes_skip_builtin_catalog() {
        let mut config = GatewayConfig::default();
        config
            .routes
            .push(RouteConfig::new("api", "/api", "/", "http://api:80"));
        apply_env(&mut config, vars(&[])).unwrap();
        assert_eq!(config.routes.len(), 1);
    }

    #[test]
    fn test_env_overrides_file_route_by_name() {
        let mut config = GatewayConfig::default();
        config.routes.push(RouteConfig::new(
            "profile",
            "/old",
            "/old",
            "http://old:80",
        ));
        apply_env(
            &mut config,
            vars(&[
                ("GATEWAY_SERVICES", "profile"),
                ("PROFILE_SERVICE_URL", "http://new:80"),
            ]),
        )
        .unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].upstream, "http://new:80");
        assert_eq!(config.routes[0].match_prefix, "/profile-cell/api/v1/profile");
    }

    #[test]
    fn test_invalid_values() {
        let mut config = GatewayConfig::default();
        let err = apply_env(&mut config, vars(&[("GATEWAY_CONNECT_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var, .. } if var == ENV_CONNECT_TIMEOUT));

        let err = apply_env(&mut config, vars(&[("GATEWAY_SERVICES", "ok,not ok")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var, .. } if var == ENV_SERVICES));
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_file(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
