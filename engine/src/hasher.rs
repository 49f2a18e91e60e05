//! Range hashing over a key-ordered row source

use ksync_core::{Hash, HashAlgorithm, Key, Row, SyncResult, TableDef, TableSource};
use ksync_crypto::RowHasher;

/// Digest of the rows in one key range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeHash {
    pub hash: Hash,
    pub row_count: usize,
    /// Key of the last row visited, unbounded when the range was empty
    pub last_key: Key,
}

/// Hash the rows of `table` in `(prev_key, last_key]`, stopping after
/// `row_limit` rows when given.
///
/// The returned `last_key` is the key of the last row actually visited,
/// which is earlier than the requested bound whenever the table (or the
/// limit) runs out first.
pub fn hash_range<S: TableSource + ?Sized>(
    source: &S,
    table: &TableDef,
    algorithm: HashAlgorithm,
    prev_key: &Key,
    last_key: &Key,
    row_limit: Option<usize>,
) -> SyncResult<RangeHash> {
    let mut hasher = RowHasher::new(algorithm);
    let mut last_row: Option<Row> = None;
    source.scan_rows(table, prev_key, last_key, row_limit, &mut |row| {
        hasher.add_row(row);
        last_row = Some(row.clone());
        Ok(())
    })?;

    let row_count = hasher.row_count();
    Ok(RangeHash {
        hash: hasher.finalize(),
        row_count,
        last_key: last_row
            .map(|row| table.key_of(&row))
            .unwrap_or_else(Key::unbounded),
    })
}

/// Collect the rows of `table` in `(prev_key, last_key]`
pub fn retrieve_rows<S: TableSource + ?Sized>(
    source: &S,
    table: &TableDef,
    prev_key: &Key,
    last_key: &Key,
    row_limit: Option<usize>,
) -> SyncResult<Vec<Row>> {
    let mut rows = Vec::new();
    source.scan_rows(table, prev_key, last_key, row_limit, &mut |row| {
        rows.push(row.clone());
        Ok(())
    })?;
    Ok(rows)
}
