//! Responder side of the hash-range comparison
//!
//! Each `HASH` request is answered from the request alone:
//!
//! - digest matches: propose the next range, twice as many rows as were just
//!   confirmed, or signal the end of the table if nothing is left;
//! - digest differs over several rows: propose the first half of the range;
//! - digest differs over at most one row: send the row itself, then propose
//!   the single row after it so the comparison keeps moving.

use ksync_core::{
    Hash, HashAlgorithm, Key, KeyComparator, SyncError, SyncResult, TableDef, TableSource,
};
use ksync_protocol::Response;
use std::cmp::Ordering;
use tracing::debug;

use crate::hasher::{hash_range, retrieve_rows};

/// An opened table: its definition plus the ordering of its keys
#[derive(Debug, Clone)]
pub struct TableHandle {
    def: TableDef,
    comparator: KeyComparator,
}

impl TableHandle {
    /// Fails if `def` names key columns it doesn't have, which can happen
    /// for definitions that arrived over the wire
    pub fn new(def: TableDef) -> SyncResult<Self> {
        def.validate()?;
        let comparator = KeyComparator::for_table(&def);
        Ok(Self { def, comparator })
    }

    pub fn def(&self) -> &TableDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn comparator(&self) -> &KeyComparator {
        &self.comparator
    }

    /// Reject malformed keys and ranges with `prev_key >= last_key`
    pub fn check_range(&self, prev_key: &Key, last_key: &Key) -> SyncResult<()> {
        self.def.check_key(prev_key)?;
        self.def.check_key(last_key)?;
        if !prev_key.is_unbounded()
            && !last_key.is_unbounded()
            && self.comparator.compare(prev_key, last_key) != Ordering::Less
        {
            return Err(SyncError::InvalidRange(format!(
                "{:?} is not before {:?} in {}",
                prev_key, last_key, self.def.name
            )));
        }
        Ok(())
    }
}

/// The responses to one request. A follow-up is only produced after a
/// single row has been sent; both are written as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub first: Response,
    pub follow_up: Option<Response>,
}

impl Reply {
    pub fn single(response: Response) -> Self {
        Self {
            first: response,
            follow_up: None,
        }
    }

    pub fn into_responses(self) -> Vec<Response> {
        let mut responses = vec![self.first];
        responses.extend(self.follow_up);
        responses
    }
}

/// Stateless responder for `HASH` and `ROWS` requests
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine {
    algorithm: HashAlgorithm,
}

impl DiffEngine {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn set_algorithm(&mut self, algorithm: HashAlgorithm) {
        self.algorithm = algorithm;
    }

    /// Answer a claimed digest for `(prev_key, last_key]`
    pub fn handle_hash<S: TableSource + ?Sized>(
        &self,
        source: &S,
        table: &TableHandle,
        prev_key: &Key,
        last_key: &Key,
        claimed: &Hash,
    ) -> SyncResult<Reply> {
        table.check_range(prev_key, last_key)?;
        let def = table.def();
        let range = hash_range(source, def, self.algorithm, prev_key, last_key, None)?;

        if range.hash == *claimed {
            // the next range starts where the confirmed one ended, which is
            // the requested bound unless it was open-ended
            let boundary = if !last_key.is_unbounded() {
                last_key.clone()
            } else if range.row_count > 0 {
                range.last_key
            } else {
                prev_key.clone()
            };
            let rows_to_hash = range.row_count.max(1).saturating_mul(2);
            debug!(
                "{}: {} rows match up to {:?}, proposing {} more",
                def.name, range.row_count, boundary, rows_to_hash
            );
            return Ok(Reply::single(
                self.challenge_after(source, def, &boundary, rows_to_hash)?,
            ));
        }

        if range.row_count > 1 {
            let half = (range.row_count + 1) / 2;
            let halved = hash_range(source, def, self.algorithm, prev_key, last_key, Some(half))?;
            debug!(
                "{}: {} rows differ after {:?}, halving to {}",
                def.name, range.row_count, prev_key, half
            );
            return Ok(Reply::single(Response::Hash {
                prev_key: prev_key.clone(),
                last_key: halved.last_key,
                hash: halved.hash,
            }));
        }

        // at most one row differs; send the first row after prev_key even if
        // it lies past last_key, so the comparison always advances
        let row = retrieve_rows(source, def, prev_key, &Key::unbounded(), Some(1))?
            .into_iter()
            .next();
        match row {
            None => {
                debug!("{}: nothing after {:?}", def.name, prev_key);
                Ok(Reply::single(Response::end_of_table(prev_key.clone())))
            }
            Some(row) => {
                let row_key = def.key_of(&row);
                debug!("{}: sending row {:?}", def.name, row_key);
                let follow_up = self.challenge_after(source, def, &row_key, 1)?;
                Ok(Reply {
                    first: Response::Rows {
                        prev_key: prev_key.clone(),
                        last_key: row_key,
                        rows: vec![row],
                    },
                    follow_up: Some(follow_up),
                })
            }
        }
    }

    /// Answer an explicit request for every row in `(prev_key, last_key]`
    pub fn handle_rows<S: TableSource + ?Sized>(
        &self,
        source: &S,
        table: &TableHandle,
        prev_key: &Key,
        last_key: &Key,
    ) -> SyncResult<Response> {
        table.check_range(prev_key, last_key)?;
        let rows = retrieve_rows(source, table.def(), prev_key, last_key, None)?;
        debug!("{}: sending {} requested rows", table.name(), rows.len());
        Ok(Response::Rows {
            prev_key: prev_key.clone(),
            last_key: last_key.clone(),
            rows,
        })
    }

    /// Challenge for the next `rows` rows after `boundary`, or the
    /// end-of-table signal when there are none
    fn challenge_after<S: TableSource + ?Sized>(
        &self,
        source: &S,
        table: &TableDef,
        boundary: &Key,
        rows: usize,
    ) -> SyncResult<Response> {
        let next = hash_range(source, table, self.algorithm, boundary, &Key::unbounded(), Some(rows))?;
        if next.row_count == 0 {
            return Ok(Response::end_of_table(boundary.clone()));
        }
        Ok(Response::Hash {
            prev_key: boundary.clone(),
            last_key: next.last_key,
            hash: next.hash,
        })
    }
}
