//! JSON datasets for seeding a [`MemoryDatabase`]
//!
//! ```json
//! {"tables": [{
//!     "name": "footbl",
//!     "columns": [{"name": "col1", "column_type": "integer"},
//!                 {"name": "col3", "column_type": "text"}],
//!     "primary_key": ["col1"],
//!     "rows": [["2", "test"], ["4", null]]
//! }]}
//! ```

use ksync_core::{ColumnDef, Row, SyncError, SyncResult, TableDef, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::memory::MemoryDatabase;
use crate::store::RowChange;

/// One table of a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDataset {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Key column names, in key order
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Option<String>>>,
}

/// A set of tables and their rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub tables: Vec<TableDataset>,
}

impl Dataset {
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::DeserializationError(e.to_string()))
    }

    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::ConfigError(format!("cannot read dataset {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Create every table and load its rows into a fresh database
    pub fn into_database(self) -> SyncResult<MemoryDatabase> {
        let db = MemoryDatabase::new();
        for table in self.tables {
            let keys: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
            let def = TableDef::new(table.name.clone(), table.columns.clone(), &keys)?;
            db.create_table(def)?;

            let changes = table
                .rows
                .into_iter()
                .map(|values| RowChange::Upsert {
                    table: table.name.clone(),
                    row: Row::new(
                        values
                            .into_iter()
                            .map(|v| v.map(Value::Text).unwrap_or(Value::Null))
                            .collect(),
                    ),
                })
                .collect::<Vec<_>>();
            if !changes.is_empty() {
                db.apply_batch(changes)?;
            }
        }
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_core::{Database, Key, TableSource};
    use std::io::Write;

    const FOOTBL: &str = r#"{"tables": [{
        "name": "footbl",
        "columns": [{"name": "col1", "column_type": "integer"},
                    {"name": "another_col", "column_type": "integer"},
                    {"name": "col3", "column_type": "text"}],
        "primary_key": ["col1"],
        "rows": [["100", "0", "last"], ["2", "10", "test"], ["5", null, null]]
    }]}"#;

    #[test]
    fn test_load_dataset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FOOTBL.as_bytes()).unwrap();

        let db = Dataset::load(file.path()).unwrap().into_database().unwrap();
        let view = db.statement_view().unwrap();
        let table = view.table("footbl").unwrap();
        assert_eq!(table.primary_key_columns, vec![0]);

        let mut firsts = Vec::new();
        view.scan_rows(&table, &Key::unbounded(), &Key::unbounded(), None, &mut |row| {
            firsts.push(row.values()[0].clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(firsts, vec![Value::from("2"), Value::from("5"), Value::from("100")]);
    }

    #[test]
    fn test_rejects_bad_key() {
        let json = FOOTBL.replace(r#""primary_key": ["col1"]"#, r#""primary_key": ["nope"]"#);
        let dataset = Dataset::from_json(&json).unwrap();
        assert!(matches!(dataset.into_database(), Err(SyncError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(Dataset::from_json("{\"tables\": 3}").is_err());
    }
}
