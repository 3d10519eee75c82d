use thiserror::Error;

/// Errors raised while validating an already-read configuration value, as opposed to
/// [`crate::env::MissingEnvVarError`] which covers the variable being absent entirely.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A configuration value was present but not valid for its field.
    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason the value was rejected.
        message: String,
    },
}