//! Protocol messages for ksync

use ksync_core::{
    ErrorKind, Hash, HashAlgorithm, Key, Row, Schema, SnapshotToken, SyncError, SyncResult,
};
use serde::{Deserialize, Serialize};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest protocol version still accepted
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Requests sent to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Negotiate the protocol version
    Protocol(u32),

    /// Choose the range digest algorithm
    HashAlgorithm(HashAlgorithm),

    /// Read with per-statement isolation
    WithoutSnapshot,

    /// Start and publish a consistent snapshot
    ExportSnapshot,

    /// Join a snapshot exported by another worker
    ImportSnapshot(SnapshotToken),

    /// Release the hold on this worker's exported snapshot
    UnholdSnapshot,

    /// Describe the tables
    Schema,

    /// Select the table subsequent range commands apply to
    Open(String),

    /// Claim a digest for the rows in `(prev_key, last_key]`
    Hash {
        prev_key: Key,
        last_key: Key,
        hash: Hash,
    },

    /// Ask for the rows in `(prev_key, last_key]`
    Rows { prev_key: Key, last_key: Key },

    /// End the session
    Quit,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Protocol(_) => "PROTOCOL",
            Command::HashAlgorithm(_) => "HASH_ALGORITHM",
            Command::WithoutSnapshot => "WITHOUT_SNAPSHOT",
            Command::ExportSnapshot => "EXPORT_SNAPSHOT",
            Command::ImportSnapshot(_) => "IMPORT_SNAPSHOT",
            Command::UnholdSnapshot => "UNHOLD_SNAPSHOT",
            Command::Schema => "SCHEMA",
            Command::Open(_) => "OPEN",
            Command::Hash { .. } => "HASH",
            Command::Rows { .. } => "ROWS",
            Command::Quit => "QUIT",
        }
    }

    /// Whether the command needs an open table
    pub fn is_table_scoped(&self) -> bool {
        matches!(self, Command::Hash { .. } | Command::Rows { .. })
    }
}

/// Messages sent back by an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Success with no payload
    Ok,

    /// Agreed protocol version
    Protocol(u32),

    /// Agreed digest algorithm
    HashAlgorithm(HashAlgorithm),

    Schema(Schema),

    Snapshot(SnapshotToken),

    /// Challenge: the sender's digest of the rows in `(prev_key, last_key]`
    Hash {
        prev_key: Key,
        last_key: Key,
        hash: Hash,
    },

    /// The complete contents of `(prev_key, last_key]` on the sender. An
    /// unbounded `last_key` with no rows means nothing exists past `prev_key`.
    Rows {
        prev_key: Key,
        last_key: Key,
        rows: Vec<Row>,
    },
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::Ok => "OK",
            Response::Protocol(_) => "PROTOCOL",
            Response::HashAlgorithm(_) => "HASH_ALGORITHM",
            Response::Schema(_) => "SCHEMA",
            Response::Snapshot(_) => "SNAPSHOT",
            Response::Hash { .. } => "HASH",
            Response::Rows { .. } => "ROWS",
        }
    }

    /// A `ROWS` response that closes the comparison at `prev_key`
    pub fn end_of_table(prev_key: Key) -> Self {
        Response::Rows {
            prev_key,
            last_key: Key::unbounded(),
            rows: Vec::new(),
        }
    }

    pub fn is_end_of_table(&self) -> bool {
        matches!(self, Response::Rows { last_key, .. } if last_key.is_unbounded())
    }
}

/// The unit written on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Command(Command),
    Ok,
    Protocol(u32),
    HashAlgorithm(HashAlgorithm),
    Schema(Schema),
    Snapshot(SnapshotToken),
    Hash {
        prev_key: Key,
        last_key: Key,
        hash: Hash,
    },
    /// Opens a row stream
    RowsHeader { prev_key: Key, last_key: Key },
    Row(Row),
    /// Closes a row stream
    EndOfRows,
    /// The sender hit a fatal error and is closing the session
    Error { kind: ErrorKind, message: String },
}

impl Frame {
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SyncError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SyncError::DeserializationError(e.to_string()))
    }

    pub fn error(err: &SyncError) -> Self {
        Frame::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Frame::Command(command) => command.name(),
            Frame::Ok => "ok",
            Frame::Protocol(_) => "protocol",
            Frame::HashAlgorithm(_) => "hash_algorithm",
            Frame::Schema(_) => "schema",
            Frame::Snapshot(_) => "snapshot",
            Frame::Hash { .. } => "hash",
            Frame::RowsHeader { .. } => "rows_header",
            Frame::Row(_) => "row",
            Frame::EndOfRows => "end_of_rows",
            Frame::Error { .. } => "error",
        }
    }
}

/// Pick the protocol version both sides speak
pub fn negotiate_version(requested: u32) -> SyncResult<u32> {
    if requested < MIN_PROTOCOL_VERSION {
        return Err(SyncError::UnsupportedProtocolVersion(requested));
    }
    Ok(requested.min(PROTOCOL_VERSION))
}
