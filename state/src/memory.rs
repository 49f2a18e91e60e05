//! In-memory database for testing and the demo endpoint
//!
//! Every committed batch produces a new immutable [`DatabaseVersion`]. A
//! consistent view pins one version; a per-statement view reads whichever
//! version is current at each call. Exported snapshots are pinned versions
//! registered under a random token until released.

use dashmap::DashMap;
use ksync_core::{
    Database, Key, Row, Schema, SnapshotToken, SyncError, SyncResult, TableDef, TableSource,
};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

use crate::store::{DatabaseVersion, RowChange, TableData};

struct Shared {
    current: RwLock<Arc<DatabaseVersion>>,
    exports: DashMap<SnapshotToken, Arc<DatabaseVersion>>,
}

/// In-memory, multi-version database. Cloning yields another handle to the
/// same database.
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                current: RwLock::new(Arc::new(DatabaseVersion::default())),
                exports: DashMap::new(),
            }),
        }
    }

    /// Latest committed version number
    pub fn version(&self) -> u64 {
        self.shared.current.read().version
    }

    fn commit<F>(&self, f: F) -> SyncResult<u64>
    where
        F: FnOnce(&DatabaseVersion) -> SyncResult<DatabaseVersion>,
    {
        let mut current = self.shared.current.write();
        let next = f(&current)?;
        let version = next.version;
        *current = Arc::new(next);
        Ok(version)
    }

    /// Create an empty table
    pub fn create_table(&self, def: TableDef) -> SyncResult<u64> {
        def.validate()?;
        self.commit(|current| {
            if current.tables.contains_key(&def.name) {
                return Err(SyncError::StorageError(format!(
                    "table {} already exists",
                    def.name
                )));
            }
            let mut next = current.clone();
            next.version += 1;
            next.tables
                .insert(def.name.clone(), Arc::new(TableData::new(def)));
            Ok(next)
        })
    }

    /// Apply a batch of changes atomically
    pub fn apply_batch(&self, changes: Vec<RowChange>) -> SyncResult<u64> {
        let count = changes.len();
        let version = self.commit(|current| current.apply(changes))?;
        debug!("Committed {} row changes as version {}", count, version);
        Ok(version)
    }

    pub fn upsert(&self, table: &str, row: Row) -> SyncResult<u64> {
        self.apply_batch(vec![RowChange::Upsert {
            table: table.to_string(),
            row,
        }])
    }

    pub fn delete(&self, table: &str, key: Key) -> SyncResult<u64> {
        self.apply_batch(vec![RowChange::Delete {
            table: table.to_string(),
            key,
        }])
    }

    /// Number of snapshots currently exported and held
    pub fn held_snapshots(&self) -> usize {
        self.shared.exports.len()
    }

    fn generate_token(version: u64) -> SnapshotToken {
        let nonce: [u8; 8] = rand::thread_rng().gen();
        SnapshotToken::new(format!("{:08X}-{}", version, hex::encode(nonce)))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

enum ViewMode {
    Statement(Arc<Shared>),
    Pinned(Arc<DatabaseVersion>),
}

/// A view onto a [`MemoryDatabase`]
pub struct MemoryView {
    mode: ViewMode,
}

impl MemoryView {
    fn version(&self) -> Arc<DatabaseVersion> {
        match &self.mode {
            ViewMode::Statement(shared) => shared.current.read().clone(),
            ViewMode::Pinned(version) => version.clone(),
        }
    }

    /// Version this view reads, or `None` for a per-statement view
    pub fn pinned_version(&self) -> Option<u64> {
        match &self.mode {
            ViewMode::Statement(_) => None,
            ViewMode::Pinned(version) => Some(version.version),
        }
    }
}

impl TableSource for MemoryView {
    fn schema(&self) -> SyncResult<Schema> {
        let version = self.version();
        Ok(Schema::new(
            version.tables.values().map(|t| t.def().clone()).collect(),
        ))
    }

    fn table(&self, name: &str) -> SyncResult<TableDef> {
        Ok(self.version().table(name)?.def().clone())
    }

    fn scan_rows(
        &self,
        table: &TableDef,
        prev_key: &Key,
        last_key: &Key,
        limit: Option<usize>,
        visitor: &mut dyn FnMut(&Row) -> SyncResult<()>,
    ) -> SyncResult<()> {
        table.check_key(prev_key)?;
        table.check_key(last_key)?;
        let version = self.version();
        let data = version.table(&table.name)?;
        let limit = limit.unwrap_or(usize::MAX);
        for row in data.range(prev_key, last_key).take(limit) {
            visitor(row)?;
        }
        Ok(())
    }
}

impl Database for MemoryDatabase {
    type View = MemoryView;

    fn statement_view(&self) -> SyncResult<MemoryView> {
        Ok(MemoryView {
            mode: ViewMode::Statement(self.shared.clone()),
        })
    }

    fn begin_consistent_view(&self) -> SyncResult<MemoryView> {
        Ok(MemoryView {
            mode: ViewMode::Pinned(self.shared.current.read().clone()),
        })
    }

    fn export_snapshot(&self, view: &MemoryView) -> SyncResult<SnapshotToken> {
        let version = match &view.mode {
            ViewMode::Pinned(version) => version.clone(),
            ViewMode::Statement(_) => {
                return Err(SyncError::StorageError(
                    "cannot export a per-statement view".into(),
                ))
            }
        };
        let token = Self::generate_token(version.version);
        debug!("Exported snapshot {} at version {}", token, version.version);
        self.shared.exports.insert(token.clone(), version);
        Ok(token)
    }

    fn import_snapshot(&self, token: &SnapshotToken) -> SyncResult<MemoryView> {
        let version = self
            .shared
            .exports
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SyncError::InvalidSnapshotToken(token.to_string()))?;
        Ok(MemoryView {
            mode: ViewMode::Pinned(version),
        })
    }

    fn release_snapshot(&self, token: &SnapshotToken) -> SyncResult<()> {
        self.shared
            .exports
            .remove(token)
            .map(|_| ())
            .ok_or_else(|| SyncError::InvalidSnapshotToken(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_core::{ColumnDef, ColumnType};

    fn create_test_db() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table(
            TableDef::new(
                "footbl",
                vec![
                    ColumnDef::new("col1", ColumnType::Integer),
                    ColumnDef::new("col3", ColumnType::Text),
                ],
                &["col1"],
            )
            .unwrap(),
        )
        .unwrap();
        db
    }

    fn collect(view: &MemoryView) -> Vec<Row> {
        let table = view.table("footbl").unwrap();
        let mut rows = Vec::new();
        view.scan_rows(&table, &Key::unbounded(), &Key::unbounded(), None, &mut |r| {
            rows.push(r.clone());
            Ok(())
        })
        .unwrap();
        rows
    }

    #[test]
    fn test_statement_view_sees_new_commits() {
        let db = create_test_db();
        let view = db.statement_view().unwrap();
        assert!(collect(&view).is_empty());

        db.upsert("footbl", Row::from_optional(&[Some("1"), Some("a")])).unwrap();
        assert_eq!(collect(&view).len(), 1);
        assert_eq!(view.pinned_version(), None);
    }

    #[test]
    fn test_consistent_view_is_isolated() {
        let db = create_test_db();
        db.upsert("footbl", Row::from_optional(&[Some("1"), Some("a")])).unwrap();
        let view = db.begin_consistent_view().unwrap();

        db.upsert("footbl", Row::from_optional(&[Some("2"), Some("b")])).unwrap();
        db.delete("footbl", Key::from_texts(&["1"])).unwrap();

        assert_eq!(collect(&view), vec![Row::from_optional(&[Some("1"), Some("a")])]);
    }

    #[test]
    fn test_export_import_release() {
        let db = create_test_db();
        db.upsert("footbl", Row::from_optional(&[Some("1"), Some("a")])).unwrap();

        let view = db.begin_consistent_view().unwrap();
        let token = db.export_snapshot(&view).unwrap();
        assert_eq!(db.held_snapshots(), 1);

        db.upsert("footbl", Row::from_optional(&[Some("2"), Some("b")])).unwrap();

        let imported = db.import_snapshot(&token).unwrap();
        assert_eq!(collect(&imported), collect(&view));
        assert_eq!(imported.pinned_version(), view.pinned_version());

        db.release_snapshot(&token).unwrap();
        assert!(matches!(
            db.import_snapshot(&token),
            Err(SyncError::InvalidSnapshotToken(_))
        ));
        // the exporter's own view is unaffected by the release
        assert_eq!(collect(&view).len(), 1);
    }

    #[test]
    fn test_cannot_export_statement_view() {
        let db = create_test_db();
        let view = db.statement_view().unwrap();
        assert!(db.export_snapshot(&view).is_err());
    }

    #[test]
    fn test_unknown_table() {
        let db = create_test_db();
        let view = db.statement_view().unwrap();
        assert!(matches!(view.table("nope"), Err(SyncError::TableNotFound(_))));
        assert!(db.create_table(view.table("footbl").unwrap()).is_err());
    }
}
