//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thread counts, capacities, timeouts)
//! - Check addresses parse where they must
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RuntimeConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate `config`, collecting every error found.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.io.threads == 0 {
        errors.push(ValidationError::new("io.threads", "must be at least 1"));
    }
    if config.executor.threads == 0 {
        errors.push(ValidationError::new("executor.threads", "must be at least 1"));
    }
    if config.executor.queue_capacity == 0 {
        errors.push(ValidationError::new("executor.queue_capacity", "must be at least 1"));
    }
    if config.io.thread_name_prefix == config.executor.thread_name_prefix {
        errors.push(ValidationError::new(
            "executor.thread_name_prefix",
            "must differ from io.thread_name_prefix",
        ));
    }

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("{:?} is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be at least 1"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be positive"));
    }

    if config.client.address.is_empty() {
        errors.push(ValidationError::new("client.address", "must not be empty"));
    }
    if config.client.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("client.connect_timeout_ms", "must be positive"));
    }
    if config.client.max_streams_per_connection == Some(0) {
        errors.push(ValidationError::new(
            "client.max_streams_per_connection",
            "must be at least 1",
        ));
    }
    if let Some(proxy) = &config.client.proxy {
        if proxy.address.is_empty() {
            errors.push(ValidationError::new("client.proxy.address", "must not be empty"));
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&config.retries.budget_ratio) {
        errors.push(ValidationError::new("retries.budget_ratio", "must be within 0.0..=1.0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
