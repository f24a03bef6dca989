//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check route definitions compile (prefixes, upstream URLs)
//! - Validate value ranges (timeouts > 0, bind address parses)
//! - Detect conflicting routes (duplicate names or prefixes)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::routing::router::{duplicate_prefixes, Route, RouteTableError};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no routes configured")]
    NoRoutes,

    #[error("route #{index} has an empty name")]
    EmptyRouteName { index: usize },

    #[error("route name {0:?} is used more than once")]
    DuplicateRouteName(String),

    #[error(transparent)]
    Route(#[from] RouteTableError),

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Check a loaded configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.idle_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("idle_secs"));
    }

    if config.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }

    let mut names = HashSet::new();
    let mut compiled = Vec::with_capacity(config.routes.len());
    for (index, route) in config.routes.iter().enumerate() {
        if route.name.trim().is_empty() {
            errors.push(ValidationError::EmptyRouteName { index });
        } else if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRouteName(route.name.clone()));
        }

        match Route::from_config(route) {
            Ok(route) => compiled.push(route),
            Err(e) => errors.push(e.into()),
        }
    }
    errors.extend(duplicate_prefixes(&compiled).into_iter().map(ValidationError::from));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
