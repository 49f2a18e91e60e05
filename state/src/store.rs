//! Versioned table storage for the in-memory database

use ksync_core::{Key, KeyComparator, Row, SyncError, SyncResult, TableDef};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Row change applied as part of a batch
#[derive(Debug, Clone)]
pub enum RowChange {
    /// Insert the row, replacing any row with the same key
    Upsert { table: String, row: Row },
    /// Delete the row with this key, if present
    Delete { table: String, key: Key },
}

impl RowChange {
    pub fn table(&self) -> &str {
        match self {
            RowChange::Upsert { table, .. } | RowChange::Delete { table, .. } => table,
        }
    }
}

/// Rows of one table, kept sorted by key
#[derive(Debug, Clone)]
pub struct TableData {
    def: TableDef,
    comparator: KeyComparator,
    entries: Vec<(Key, Row)>,
}

impl TableData {
    pub fn new(def: TableDef) -> Self {
        let comparator = KeyComparator::for_table(&def);
        Self {
            def,
            comparator,
            entries: Vec::new(),
        }
    }

    pub fn def(&self) -> &TableDef {
        &self.def
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn search(&self, key: &Key) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(k, _)| self.comparator.compare(k, key))
    }

    /// Insert or replace by key
    pub fn upsert(&mut self, row: Row) -> SyncResult<()> {
        self.def.check_row(&row)?;
        let key = self.def.key_of(&row);
        match self.search(&key) {
            Ok(i) => self.entries[i].1 = row,
            Err(i) => self.entries.insert(i, (key, row)),
        }
        Ok(())
    }

    /// Remove by key; returns whether a row was removed
    pub fn delete(&mut self, key: &Key) -> SyncResult<bool> {
        self.def.check_key(key)?;
        match self.search(key) {
            Ok(i) => {
                self.entries.remove(i);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Rows with keys in `(prev_key, last_key]`, in key order
    pub fn range(&self, prev_key: &Key, last_key: &Key) -> impl Iterator<Item = &Row> {
        let start = if prev_key.is_unbounded() {
            0
        } else {
            self.entries
                .partition_point(|(k, _)| self.comparator.compare(k, prev_key) != Ordering::Greater)
        };
        let end = if last_key.is_unbounded() {
            self.entries.len()
        } else {
            self.entries
                .partition_point(|(k, _)| self.comparator.compare(k, last_key) != Ordering::Greater)
        };
        self.entries[start..end.max(start)].iter().map(|(_, row)| row)
    }
}

/// One committed, immutable state of every table
#[derive(Debug, Clone, Default)]
pub struct DatabaseVersion {
    pub version: u64,
    pub tables: BTreeMap<String, Arc<TableData>>,
}

impl DatabaseVersion {
    pub fn table(&self, name: &str) -> SyncResult<&Arc<TableData>> {
        self.tables
            .get(name)
            .ok_or_else(|| SyncError::TableNotFound(name.to_string()))
    }

    /// Produce the next version with `changes` applied, leaving `self` intact
    pub fn apply(&self, changes: Vec<RowChange>) -> SyncResult<DatabaseVersion> {
        let mut tables = self.tables.clone();
        for change in changes {
            let table = tables
                .get_mut(change.table())
                .ok_or_else(|| SyncError::TableNotFound(change.table().to_string()))?;
            let table = Arc::make_mut(table);
            match change {
                RowChange::Upsert { row, .. } => table.upsert(row)?,
                RowChange::Delete { key, .. } => {
                    table.delete(&key)?;
                }
            }
        }
        Ok(DatabaseVersion {
            version: self.version + 1,
            tables,
        })
    }
}
