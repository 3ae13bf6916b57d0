//! Unified error types for the Corral workspace.
//!
//! The variants follow the runtime's failure taxonomy: validation and
//! not-found errors never touch resources, resource errors abort an
//! operation after releasing what it acquired, and process errors abort
//! before anything was committed.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// A user-supplied argument or value is invalid.
    #[error("invalid argument: {message}")]
    Validation {
        /// Description of what was rejected.
        message: String,
    },

    /// A container, network, or image does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A host resource could not be acquired or configured
    /// (cgroup write, address pool exhaustion, device creation).
    #[error("resource error: {message}")]
    Resource {
        /// Description of the failed resource operation.
        message: String,
    },

    /// Namespace or process creation failed.
    #[error("process error: {message}")]
    Process {
        /// Description of the process failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// A persisted document was written by a newer schema.
    #[error("unsupported {kind} schema version {found} (max supported {supported})")]
    UnsupportedSchema {
        /// Kind of document.
        kind: &'static str,
        /// Version found on disk.
        found: u32,
        /// Highest version this build understands.
        supported: u32,
    },
}

impl CorralError {
    /// Shorthand for a [`CorralError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`CorralError::Resource`].
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Shorthand for a [`CorralError::Process`].
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    /// Returns whether this is a [`CorralError::NotFound`].
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;
