//! Configuration Error Types
//!
//! Error handling for configuration loading and validation, with specific,
//! actionable messages for each failure scenario.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path:?}")]
    ConfigFileNotFound { path: PathBuf },

    /// Layered sources could not be merged or deserialized
    #[error("Failed to load configuration from {source_name}: {error}")]
    LoadError { source_name: String, error: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Configuration validation errors
    #[error("Configuration validation failed: {error}")]
    ValidationError { error: String },
}

impl ConfigurationError {
    /// Create a missing required field error
    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    /// Create a load error for a named source
    pub fn load_error<S: Into<String>, E: std::fmt::Display>(source_name: S, error: E) -> Self {
        Self::LoadError {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation_error<E: std::fmt::Display>(error: E) -> Self {
        Self::ValidationError {
            error: error.to_string(),
        }
    }
}

impl From<::config::ConfigError> for ConfigurationError {
    fn from(error: ::config::ConfigError) -> Self {
        Self::load_error("layered sources", error)
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
