/*!
Error types for the Custodian core.
*/

use std::io;
use thiserror::Error;

/// Result type used throughout the Custodian core.
pub type Result<T> = std::result::Result<T, CustodianError>;

/// Errors that can occur while resolving, snapshotting, archiving or copying
/// protected entities.
#[derive(Error, Debug)]
pub enum CustodianError {
    /// Identifier string does not follow `type:id[:snapshot]`
    #[error("Malformed protected entity identifier '{input}': {reason}")]
    MalformedIdentifier { input: String, reason: String },

    /// No type manager registered for the identifier's type tag
    #[error("Unknown protected entity type: {0}")]
    UnknownEntityType(String),

    /// Backend has no resource for a well-formed identifier
    #[error("Protected entity not found: {id}")]
    EntityNotFound { id: String },

    /// Backend cannot honour the requested operation or option
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Operation is not meaningful for the entity it was invoked on
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A data transport could not be built (e.g. presigning failed)
    #[error("Failed to construct transport for {id}: {reason}")]
    TransportConstruction { id: String, reason: String },

    /// Archive serialization of one entity failed at the named stage
    #[error("Failed to serialize {stage} for {id}: {source}")]
    Serialization {
        id: String,
        stage: String,
        #[source]
        source: Box<CustodianError>,
    },

    /// Consumer observed an incomplete stream
    #[error("Stream truncated after {bytes_transferred} bytes: {source}")]
    StreamTruncated {
        bytes_transferred: u64,
        #[source]
        source: Box<CustodianError>,
    },

    /// Operation was cancelled through its context
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O errors during file or stream operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Archive container errors
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend specific failures
    #[error("Backend error: {0}")]
    Backend(String),
}

impl CustodianError {
    /// Create a new malformed identifier error
    pub fn malformed<S1: Into<String>, S2: Into<String>>(input: S1, reason: S2) -> Self {
        Self::MalformedIdentifier {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a new not-found error for the given identifier
    pub fn not_found<S: ToString>(id: S) -> Self {
        Self::EntityNotFound { id: id.to_string() }
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a new invalid operation error
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Wrap `source` as a serialization failure of `stage` for entity `id`.
    ///
    /// Cancellation is passed through untouched so callers can always tell it
    /// apart from a data error.
    pub fn serialization<S1: ToString, S2: Into<String>>(id: S1, stage: S2, source: Self) -> Self {
        if source.is_cancelled() {
            return source;
        }
        Self::Serialization {
            id: id.to_string(),
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// True if this error, or any error it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Serialization { source, .. } | Self::StreamTruncated { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Innermost entity id named by a chain of serialization failures.
    pub fn failed_entity(&self) -> Option<&str> {
        match self {
            Self::Serialization { id, source, .. } => {
                source.failed_entity().or(Some(id.as_str()))
            }
            Self::StreamTruncated { source, .. } => source.failed_entity(),
            _ => None,
        }
    }

    /// Box this error into an `io::Error` so it can cross a `Read`/`Write`
    /// boundary and be recovered with [`CustodianError::from_stream_io`].
    pub fn into_stream_io(self) -> io::Error {
        match self {
            Self::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }

    /// Recover an error that crossed a stream boundary.
    pub fn from_stream_io(error: io::Error) -> Self {
        if error
            .get_ref()
            .map(|inner| inner.is::<CustodianError>())
            .unwrap_or(false)
        {
            if let Some(inner) = error.into_inner() {
                if let Ok(custodian) = inner.downcast::<CustodianError>() {
                    return *custodian;
                }
            }
            return Self::backend("stream error could not be recovered");
        }
        Self::Io(error)
    }
}
