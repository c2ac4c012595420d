//! Error types for uploads, deletions and the document model

use thiserror::Error;

use crate::document::NodeKey;
use crate::upload::TransportStatus;

/// Outcome of an upload that did not complete.
#[derive(Error, Debug)]
pub enum UploadError {
    /// No upload adapter is configured. Never shown to the user.
    #[error("no upload adapter configured")]
    ConfigurationAbsent,

    /// Files were selected while the session was not listening to the
    /// document, so their uploads could never start.
    #[error("upload session is not started")]
    SessionInactive,

    /// The placeholder left the document while the upload was in flight.
    #[error("upload cancelled")]
    Cancelled,

    #[error("deletion denied: {0}")]
    DeletionDenied(String),

    /// The transport rejected without reporting `error` or `aborted`.
    #[error("unexpected transport failure in status {status:?}: {message}")]
    Unexpected {
        status: TransportStatus,
        message: String,
    },

    #[error("document error: {0}")]
    Document(#[from] DocumentError),
}

/// Failures reported by upload and delete transports.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server answered but refused the request.
    #[error("{0}")]
    Rejected(String),

    #[error("request aborted")]
    Aborted,

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl TransportError {
    pub fn is_abort(&self) -> bool {
        matches!(self, TransportError::Aborted)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeKey),

    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid file type pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeletionError {
    #[error("a deletion is already pending for this file")]
    AlreadyPending,

    #[error("file placeholder no longer exists")]
    NotFound,

    #[error("file has not finished uploading")]
    NotCompleted,

    #[error("{0}")]
    Denied(String),

    #[error("deletion cancelled")]
    Cancelled,
}

impl From<DeletionError> for UploadError {
    fn from(err: DeletionError) -> Self {
        match err {
            DeletionError::Cancelled => UploadError::Cancelled,
            other => UploadError::DeletionDenied(other.to_string()),
        }
    }
}

/// Raised when a node cannot be re-rendered. Always swallowed by callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("node missing from document: {0:?}")]
    NodeMissing(NodeKey),
}
