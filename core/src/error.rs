//! Error types for ksync
//!
//! Every error is fatal to the session that raised it: there is no
//! mid-command recovery, a fresh session is needed to retry.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for ksync
#[derive(Error, Debug)]
pub enum SyncError {
    // ============ Protocol Errors ============
    #[error("Command out of sequence: {0}")]
    ProtocolSequence(String),

    #[error("Unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u32),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    // ============ Snapshot Errors ============
    #[error("Invalid snapshot token: {0}")]
    InvalidSnapshotToken(String),

    #[error("No active snapshot")]
    NoActiveSnapshot,

    // ============ Storage Errors ============
    #[error("Storage error: {0}")]
    StorageError(String),

    // ============ Wire Errors ============
    #[error("Message serialization failed: {0}")]
    SerializationError(String),

    #[error("Message deserialization failed: {0}")]
    DeserializationError(String),

    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Remote endpoint failed with {kind}: {message}")]
    RemoteError { kind: ErrorKind, message: String },

    #[error("I/O error: {0}")]
    IoError(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============ General Errors ============
    #[error("Aborted by another worker")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error category reported to the other endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ProtocolSequence,
    TableNotFound,
    InvalidRange,
    InvalidSnapshotToken,
    NoActiveSnapshot,
    Storage,
    Wire,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ProtocolSequence => "ProtocolSequenceError",
            ErrorKind::TableNotFound => "TableNotFound",
            ErrorKind::InvalidRange => "InvalidRange",
            ErrorKind::InvalidSnapshotToken => "InvalidSnapshotToken",
            ErrorKind::NoActiveSnapshot => "NoActiveSnapshot",
            ErrorKind::Storage => "StorageError",
            ErrorKind::Wire => "WireError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

impl SyncError {
    /// Category used when reporting this error to the peer
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ProtocolSequence(_)
            | SyncError::UnsupportedProtocolVersion(_)
            | SyncError::UnexpectedResponse(_) => ErrorKind::ProtocolSequence,
            SyncError::TableNotFound(_) => ErrorKind::TableNotFound,
            SyncError::InvalidRange(_) => ErrorKind::InvalidRange,
            SyncError::InvalidSnapshotToken(_) => ErrorKind::InvalidSnapshotToken,
            SyncError::NoActiveSnapshot => ErrorKind::NoActiveSnapshot,
            SyncError::StorageError(_) => ErrorKind::Storage,
            SyncError::SerializationError(_)
            | SyncError::DeserializationError(_)
            | SyncError::FrameTooLarge { .. }
            | SyncError::IoError(_) => ErrorKind::Wire,
            SyncError::RemoteError { kind, .. } => *kind,
            SyncError::ConfigError(_) => ErrorKind::Config,
            SyncError::Aborted | SyncError::Internal(_) | SyncError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for SyncError {
    fn from(err: bincode::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationError(err.to_string())
    }
}
