//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → sections handed to executors, servers and clients at setup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ClientConfig, ClientTlsConfig, ExecutorConfig, ForwardProxyConfig, IoConfig, LogFormat,
    ObservabilityConfig, Protocol, RetryConfig, RuntimeConfig, ServerConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
