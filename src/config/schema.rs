//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening endpoint and connection capacity.
    pub listener: ListenerConfig,

    /// Concurrency strategy and tick length.
    pub execution: ExecutionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Start retry policy.
    pub startup: StartupConfig,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Built-in responder settings.
    pub http: HttpConfig,

    /// Headers added to every response.
    pub default_headers: Vec<HeaderConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// TCP port; 0 picks a free port.
    pub port: u16,

    /// IPv4 address to bind (e.g., "0.0.0.0").
    pub bind_address: Ipv4Addr,

    /// Maximum concurrent connections. Also the listen backlog.
    pub max_connections: u8,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 443,
            bind_address: Ipv4Addr::UNSPECIFIED,
            max_connections: 4,
        }
    }
}

/// How connections are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// The manager steps every connection from its own tick.
    #[default]
    Cooperative,
    /// Each connection runs to completion on its own task.
    TaskPerConnection,
}

/// Execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: ConcurrencyMode,

    /// Budget passed to every manager tick, in milliseconds.
    pub tick_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ConcurrencyMode::Cooperative,
            tick_ms: 100,
        }
    }
}

/// Timeout configuration for connection handling and shutdown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Accept (including TLS handshake) timeout in milliseconds.
    pub accept_ms: u64,

    /// Idle connection timeout in milliseconds.
    pub idle_ms: u64,

    /// Shutdown drain deadline in milliseconds. Absent means wait forever.
    pub drain_ms: Option<u64>,

    /// Pause between shutdown sweeps in milliseconds.
    pub drain_pause_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            accept_ms: 5_000,
            idle_ms: 10_000,
            drain_ms: Some(5_000),
            drain_pause_ms: 1,
        }
    }
}

/// Retry policy for a failed start.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Total start attempts (1 = no retry).
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// Enable ticket-based session resumption.
    #[serde(default = "default_session_tickets")]
    pub session_tickets: bool,

    /// Ticket key lifetime in seconds.
    #[serde(default = "default_ticket_lifetime")]
    pub ticket_lifetime_secs: u32,
}

fn default_session_tickets() -> bool {
    true
}

fn default_ticket_lifetime() -> u32 {
    86_400
}

/// Built-in responder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Body of every `200 OK`.
    pub response_body: String,

    /// Largest accepted request head in bytes.
    pub max_request_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            response_body: "OK\n".to_string(),
            max_request_bytes: 4096,
        }
    }
}

/// One default response header.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeaderConfig {
    pub name: String,
    pub value: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
