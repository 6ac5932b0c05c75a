//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacity ≥ 1, timeouts > 0)
//! - Reject header names that cannot go on the wire
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listener.max_connections must be at least 1")]
    NoConnections,

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("tls.{field} is empty")]
    EmptyTlsPath { field: &'static str },

    #[error("invalid default header name {0:?}")]
    HeaderName(String),

    #[error("default header {0:?} has a value containing a line break")]
    HeaderValue(String),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }

    let positive = [
        ("execution.tick_ms", config.execution.tick_ms),
        ("timeouts.accept_ms", config.timeouts.accept_ms),
        ("timeouts.idle_ms", config.timeouts.idle_ms),
        ("timeouts.drain_pause_ms", config.timeouts.drain_pause_ms),
        ("startup.retry_attempts", u64::from(config.startup.retry_attempts)),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if config.http.max_request_bytes == 0 {
        errors.push(ValidationError::Zero {
            field: "http.max_request_bytes",
        });
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath { field: "cert_path" });
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath { field: "key_path" });
        }
        if tls.session_tickets && tls.ticket_lifetime_secs == 0 {
            errors.push(ValidationError::Zero {
                field: "tls.ticket_lifetime_secs",
            });
        }
    }

    for header in &config.default_headers {
        if !is_token(&header.name) {
            errors.push(ValidationError::HeaderName(header.name.clone()));
        }
        if header.value.contains(['\r', '\n']) {
            errors.push(ValidationError::HeaderValue(header.name.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// RFC 9110 token characters.
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}
