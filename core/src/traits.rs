//! Core traits defining the database driver interface
//!
//! The driver layer (executing reads against a concrete engine) sits behind
//! these traits. Everything above them is engine-agnostic.

use crate::types::*;
use std::sync::Arc;

/// Result type for ksync operations
pub type SyncResult<T> = Result<T, crate::error::SyncError>;

/// A read-only, key-ordered view of the database.
///
/// All reads through one view observe the same data for as long as the view
/// lives, unless the view was created with per-statement isolation.
pub trait TableSource: Send {
    /// Table definitions visible in this view
    fn schema(&self) -> SyncResult<Schema>;

    /// Look up one table definition
    fn table(&self, name: &str) -> SyncResult<TableDef> {
        self.schema()?
            .tables
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| crate::error::SyncError::TableNotFound(name.to_string()))
    }

    /// Visit the rows of `table` whose keys lie in `(prev_key, last_key]`,
    /// ascending by key, stopping after `limit` rows when given. Unbounded
    /// keys leave that side of the range open.
    fn scan_rows(
        &self,
        table: &TableDef,
        prev_key: &Key,
        last_key: &Key,
        limit: Option<usize>,
        visitor: &mut dyn FnMut(&Row) -> SyncResult<()>,
    ) -> SyncResult<()>;
}

/// A database shared by many sessions, able to hand out views and to share
/// one consistent view between sessions through an exported token
pub trait Database: Send + Sync {
    type View: TableSource;

    /// A view with per-statement isolation: each read sees the latest commit
    fn statement_view(&self) -> SyncResult<Self::View>;

    /// Start a transaction with a fixed consistent view
    fn begin_consistent_view(&self) -> SyncResult<Self::View>;

    /// Publish `view` so other sessions can import it while it is held
    fn export_snapshot(&self, view: &Self::View) -> SyncResult<SnapshotToken>;

    /// Bind a new view to a previously exported, still held snapshot
    fn import_snapshot(&self, token: &SnapshotToken) -> SyncResult<Self::View>;

    /// Stop holding an exported snapshot; later imports of `token` fail
    fn release_snapshot(&self, token: &SnapshotToken) -> SyncResult<()>;
}

impl<D: Database> Database for Arc<D> {
    type View = D::View;

    fn statement_view(&self) -> SyncResult<Self::View> {
        (**self).statement_view()
    }

    fn begin_consistent_view(&self) -> SyncResult<Self::View> {
        (**self).begin_consistent_view()
    }

    fn export_snapshot(&self, view: &Self::View) -> SyncResult<SnapshotToken> {
        (**self).export_snapshot(view)
    }

    fn import_snapshot(&self, token: &SnapshotToken) -> SyncResult<Self::View> {
        (**self).import_snapshot(token)
    }

    fn release_snapshot(&self, token: &SnapshotToken) -> SyncResult<()> {
        (**self).release_snapshot(token)
    }
}
