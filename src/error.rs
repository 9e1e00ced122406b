//! Error types for stash operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the registry and the debounced store
#[derive(Debug, Error)]
pub enum StashError {
    /// The binding name was never registered
    #[error("Unknown binding: '{0}'")]
    UnknownBinding(String),

    /// Writing the backing file failed; the in-memory value is untouched
    #[error("Failed to write {}: {source}", path.display())]
    PersistenceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file exists but does not start with a well-formed document
    #[error("Failed to parse {}: {source}", path.display())]
    Deserialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A typed handle could not convert to or from the stored value
    #[error("Value of '{name}' does not match the handle type: {source}")]
    Conversion {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The tokio scheduler was requested outside of a runtime
    #[error("No tokio runtime available for the idle scheduler")]
    NoRuntime,
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, StashError>;
