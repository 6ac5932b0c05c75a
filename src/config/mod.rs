//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → CLI overrides applied by the binary, then validated again
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the listener cannot be reconfigured live
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ConcurrencyMode, ExecutionConfig, HeaderConfig, HttpConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, ServerConfig, StartupConfig, TimeoutConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
