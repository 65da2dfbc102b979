//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the endpoint address parses
//! - Validate value ranges (timeouts > 0, chunk size bounded)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;

use crate::config::schema::ClientConfig;
use crate::net::connector::Endpoint;

/// Largest accepted relay chunk size.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("endpoint.address '{address}' is invalid: {reason}")]
    InvalidEndpoint { address: String, reason: String },

    #[error("endpoint.api_version must not be empty or contain '/'")]
    InvalidApiVersion,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("relay.chunk_size must be between 1 and {max}, got {0}", max = MAX_CHUNK_SIZE)]
    ChunkSizeOutOfRange(usize),
}

/// Check `config`, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = Endpoint::parse(&config.endpoint.address) {
        errors.push(ValidationError::InvalidEndpoint {
            address: config.endpoint.address.clone(),
            reason: e.to_string(),
        });
    }

    if let Some(version) = &config.endpoint.api_version {
        if version.is_empty() || version.contains('/') {
            errors.push(ValidationError::InvalidApiVersion);
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.handshake_wait_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("handshake_wait_ms"));
    }

    let chunk_size = config.relay.chunk_size;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        errors.push(ValidationError::ChunkSizeOutOfRange(chunk_size));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
