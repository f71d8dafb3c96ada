//! # Nimbus Common
//!
//! Error types, logging setup and configuration shared by the Nimbus Offline
//! crates.
//!
//! ## Features
//!
//! - Unified error type for configuration and I/O failures
//! - Logging configuration and setup
//! - JSON configuration with environment overrides

use thiserror::Error;

pub mod config;
pub mod logging;

pub use config::{CacheConfig, NetworkConfig, NimbusConfig, PagesConfig};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for Nimbus.
#[derive(Error, Debug)]
pub enum NimbusError {
    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl NimbusError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            NimbusError::Config(_) => "config",
            NimbusError::Io(_) => "io",
            NimbusError::Json(_) => "json",
            NimbusError::Url(_) => "url",
        }
    }
}

/// Result type alias for Nimbus operations.
pub type Result<T> = std::result::Result<T, NimbusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(NimbusError::config("bad").category(), "config");

        let url = NimbusError::from(url::Url::parse("not a url").unwrap_err());
        assert_eq!(url.category(), "url");

        let io = NimbusError::from(std::io::Error::other("disk"));
        assert_eq!(io.category(), "io");
    }

    #[test]
    fn test_error_display() {
        let err = NimbusError::config("fallback page missing");
        assert_eq!(err.to_string(), "Config error: fallback page missing");
    }
}
