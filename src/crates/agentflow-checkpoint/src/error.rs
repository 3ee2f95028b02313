//! Error types for checkpoint operations.

use thiserror::Error;

/// Convenience result type using [`CheckpointError`].
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by checkpoint encoding, decoding and storage.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested id.
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// A checkpoint value could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure in a storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A typed value in the checkpoint references a type this process
    /// has not registered. Fatal for pending-request payloads: a caller
    /// cannot respond to a request it cannot reconstruct.
    #[error("Unresolvable type '{type_name}' in checkpoint: {context}")]
    UnresolvableType {
        /// Fully qualified name stored in the checkpoint.
        type_name: String,
        /// Where the reference was encountered.
        context: String,
    },

    /// A marker's declared shape disagrees with the registered type.
    /// The value is never instantiated in this case.
    #[error("Type '{type_name}' shape mismatch: stored as {stored}, registered as {registered}")]
    ShapeMismatch {
        /// Fully qualified name stored in the checkpoint.
        type_name: String,
        /// Shape recorded by the writer.
        stored: String,
        /// Shape known to this process.
        registered: String,
    },

    /// Storage-backend specific failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CheckpointError {
    /// Create an unresolvable-type error with context.
    pub fn unresolvable(type_name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnresolvableType {
            type_name: type_name.into(),
            context: context.into(),
        }
    }
}
