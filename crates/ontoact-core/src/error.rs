use thiserror::Error;

/// Top-level error type shared by the ontoact crates.
///
/// Subsystem crates define their own error types and wrap this one where a
/// storage or configuration failure crosses a crate boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OntoactError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<toml::de::Error> for OntoactError {
    fn from(err: toml::de::Error) -> Self {
        OntoactError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for OntoactError {
    fn from(err: toml::ser::Error) -> Self {
        OntoactError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for OntoactError {
    fn from(err: serde_json::Error) -> Self {
        OntoactError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for ontoact operations.
pub type Result<T> = std::result::Result<T, OntoactError>;
