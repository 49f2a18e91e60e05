//! Requesting side of the hash-range comparison
//!
//! The [`Reconciler`] walks a local copy of a table against a remote
//! endpoint, answering its challenges the same way the remote answers ours,
//! and collects the rows that must change locally to match it.

use async_trait::async_trait;
use ksync_core::{
    Hash, HashAlgorithm, Key, Row, SyncError, SyncResult, TableSource,
};
use ksync_protocol::{Command, Response};
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::diff::TableHandle;
use crate::hasher::{hash_range, retrieve_rows};

/// A remote endpoint that answers commands
#[async_trait]
pub trait Peer: Send {
    /// Send one command and collect every response it produces. A `HASH`
    /// answered with a single row also carries the follow-up response.
    async fn request(&mut self, command: Command) -> SyncResult<Vec<Response>>;
}

/// Rows to change locally so the table matches the peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    pub upserts: Vec<Row>,
    pub deletes: Vec<Key>,
    pub commands_sent: usize,
    pub rows_received: usize,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Compares one local table against a [`Peer`]
pub struct Reconciler<'a, S: TableSource + ?Sized> {
    source: &'a S,
    table: TableHandle,
    algorithm: HashAlgorithm,
}

impl<'a, S: TableSource + ?Sized> Reconciler<'a, S> {
    pub fn new(source: &'a S, table: TableHandle, algorithm: HashAlgorithm) -> Self {
        Self {
            source,
            table,
            algorithm,
        }
    }

    pub fn table(&self) -> &TableHandle {
        &self.table
    }

    /// Follow the comparison to the end of the table
    pub async fn run<P: Peer + ?Sized>(&self, peer: &mut P) -> SyncResult<TableDiff> {
        let mut diff = TableDiff::default();

        match self.send_one(peer, Command::HashAlgorithm(self.algorithm), &mut diff).await? {
            Response::HashAlgorithm(algorithm) if algorithm == self.algorithm => {}
            other => return Err(self.unexpected(&other)),
        }
        match self.send_one(peer, Command::Open(self.table.name().to_string()), &mut diff).await? {
            Response::Ok => {}
            other => return Err(self.unexpected(&other)),
        }

        let mut next = Some(self.challenge_after(&Key::unbounded(), 1)?);
        while let Some(command) = next.take() {
            let responses = self.send(peer, command, &mut diff).await?;
            next = self.process(responses, &mut diff)?;
        }

        info!(
            "{}: {} upserts, {} deletes after {} commands",
            self.table.name(),
            diff.upserts.len(),
            diff.deletes.len(),
            diff.commands_sent
        );
        Ok(diff)
    }

    async fn send<P: Peer + ?Sized>(
        &self,
        peer: &mut P,
        command: Command,
        diff: &mut TableDiff,
    ) -> SyncResult<Vec<Response>> {
        debug!("{}: sending {}", self.table.name(), command.name());
        diff.commands_sent += 1;
        let responses = peer.request(command).await?;
        if responses.is_empty() {
            return Err(SyncError::UnexpectedResponse(format!(
                "no response while comparing {}",
                self.table.name()
            )));
        }
        Ok(responses)
    }

    async fn send_one<P: Peer + ?Sized>(
        &self,
        peer: &mut P,
        command: Command,
        diff: &mut TableDiff,
    ) -> SyncResult<Response> {
        let mut responses = self.send(peer, command, diff).await?;
        if responses.len() > 1 {
            return Err(self.unexpected(&responses[1]));
        }
        Ok(responses.remove(0))
    }

    /// Handle the responses to one command, returning the next command to
    /// send or `None` once the peer has reached the end of its table
    fn process(
        &self,
        responses: Vec<Response>,
        diff: &mut TableDiff,
    ) -> SyncResult<Option<Command>> {
        let mut next = None;
        let mut responses = responses.into_iter().peekable();
        while let Some(response) = responses.next() {
            let is_last = responses.peek().is_none();
            next = match response {
                Response::Hash {
                    prev_key,
                    last_key,
                    hash,
                } => self.answer_hash(&prev_key, &last_key, &hash)?,
                Response::Rows {
                    prev_key,
                    last_key,
                    rows,
                } => {
                    self.apply_rows(&prev_key, &last_key, rows, diff)?;
                    if last_key.is_unbounded() {
                        return Ok(None);
                    }
                    if is_last {
                        Some(self.challenge_after(&last_key, 1)?)
                    } else {
                        None
                    }
                }
                other => return Err(self.unexpected(&other)),
            };
        }
        Ok(next)
    }

    /// Answer a challenge from the peer with our own digest
    fn answer_hash(
        &self,
        prev_key: &Key,
        last_key: &Key,
        claimed: &Hash,
    ) -> SyncResult<Option<Command>> {
        self.table.check_range(prev_key, last_key)?;
        let def = self.table.def();
        let range = hash_range(self.source, def, self.algorithm, prev_key, last_key, None)?;

        if range.hash == *claimed {
            if last_key.is_unbounded() {
                return Ok(None);
            }
            let rows = range.row_count.max(1).saturating_mul(2);
            return self.challenge_after(last_key, rows).map(Some);
        }

        if range.row_count > 1 {
            let halved = hash_range(
                self.source,
                def,
                self.algorithm,
                prev_key,
                last_key,
                Some((range.row_count + 1) / 2),
            )?;
            return Ok(Some(Command::Hash {
                prev_key: prev_key.clone(),
                last_key: halved.last_key,
                hash: halved.hash,
            }));
        }

        Ok(Some(Command::Rows {
            prev_key: prev_key.clone(),
            last_key: last_key.clone(),
        }))
    }

    /// Our digest of the next `rows` rows after `boundary`, or a request for
    /// everything the peer has past it when we have nothing left
    fn challenge_after(&self, boundary: &Key, rows: usize) -> SyncResult<Command> {
        let next = hash_range(
            self.source,
            self.table.def(),
            self.algorithm,
            boundary,
            &Key::unbounded(),
            Some(rows),
        )?;
        if next.row_count == 0 {
            return Ok(Command::Rows {
                prev_key: boundary.clone(),
                last_key: Key::unbounded(),
            });
        }
        Ok(Command::Hash {
            prev_key: boundary.clone(),
            last_key: next.last_key,
            hash: next.hash,
        })
    }

    /// Merge the peer's complete contents of `(prev_key, last_key]` against
    /// ours
    fn apply_rows(
        &self,
        prev_key: &Key,
        last_key: &Key,
        remote: Vec<Row>,
        diff: &mut TableDiff,
    ) -> SyncResult<()> {
        let def = self.table.def();
        let comparator = self.table.comparator();
        for row in &remote {
            def.check_row(row)?;
            if !comparator.in_range(&def.key_of(row), prev_key, last_key) {
                return Err(SyncError::UnexpectedResponse(format!(
                    "row {:?} outside {:?}..{:?} in {}",
                    def.key_of(row),
                    prev_key,
                    last_key,
                    def.name
                )));
            }
        }
        diff.rows_received += remote.len();

        let local = retrieve_rows(self.source, def, prev_key, last_key, None)?;
        let mut local = local.into_iter().peekable();
        let mut remote = remote.into_iter().peekable();
        loop {
            let order = match (local.peek(), remote.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(ours), Some(theirs)) => {
                    comparator.compare(&def.key_of(ours), &def.key_of(theirs))
                }
            };
            match order {
                Ordering::Less => {
                    if let Some(row) = local.next() {
                        diff.deletes.push(def.key_of(&row));
                    }
                }
                Ordering::Greater => diff.upserts.extend(remote.next()),
                Ordering::Equal => {
                    if let (Some(ours), Some(theirs)) = (local.next(), remote.next()) {
                        if ours != theirs {
                            diff.upserts.push(theirs);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn unexpected(&self, response: &Response) -> SyncError {
        SyncError::UnexpectedResponse(format!(
            "{} while comparing {}",
            response.name(),
            self.table.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffEngine;
    use ksync_core::{ColumnDef, ColumnType, Database, TableDef};
    use ksync_state::{MemoryDatabase, MemoryView};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Answers commands in-process from a pinned view
    struct LocalPeer {
        view: MemoryView,
        engine: DiffEngine,
        table: Option<TableHandle>,
        commands: Vec<&'static str>,
    }

    impl LocalPeer {
        fn new(db: &MemoryDatabase) -> Self {
            Self {
                view: db.begin_consistent_view().unwrap(),
                engine: DiffEngine::default(),
                table: None,
                commands: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Peer for LocalPeer {
        async fn request(&mut self, command: Command) -> SyncResult<Vec<Response>> {
            self.commands.push(command.name());
            match command {
                Command::HashAlgorithm(algorithm) => {
                    self.engine.set_algorithm(algorithm);
                    Ok(vec![Response::HashAlgorithm(algorithm)])
                }
                Command::Open(name) => {
                    self.table = Some(TableHandle::new(self.view.table(&name)?)?);
                    Ok(vec![Response::Ok])
                }
                Command::Hash {
                    prev_key,
                    last_key,
                    hash,
                } => {
                    let table = self.table.as_ref().unwrap();
                    let reply =
                        self.engine
                            .handle_hash(&self.view, table, &prev_key, &last_key, &hash)?;
                    Ok(reply.into_responses())
                }
                Command::Rows { prev_key, last_key } => {
                    let table = self.table.as_ref().unwrap();
                    Ok(vec![self
                        .engine
                        .handle_rows(&self.view, table, &prev_key, &last_key)?])
                }
                other => panic!("unexpected command {}", other.name()),
            }
        }
    }

    fn footbl_def() -> TableDef {
        TableDef::new(
            "footbl",
            vec![
                ColumnDef::new("col1", ColumnType::Integer),
                ColumnDef::new("another_col", ColumnType::Integer),
                ColumnDef::new("col3", ColumnType::Text),
            ],
            &["col1"],
        )
        .unwrap()
    }

    fn row(col1: u32, another: Option<&str>, col3: Option<&str>) -> Row {
        let col1 = col1.to_string();
        Row::from_optional(&[Some(col1.as_str()), another, col3])
    }

    fn database(def: &TableDef, rows: &[Row]) -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table(def.clone()).unwrap();
        for row in rows {
            db.upsert(&def.name, row.clone()).unwrap();
        }
        db
    }

    fn contents(db: &MemoryDatabase, def: &TableDef) -> Vec<Row> {
        let view = db.statement_view().unwrap();
        retrieve_rows(&view, def, &Key::unbounded(), &Key::unbounded(), None).unwrap()
    }

    /// Reconcile `to` against `from`, apply the diff, and check the copies match
    async fn sync(from: &MemoryDatabase, to: &MemoryDatabase, def: &TableDef) -> TableDiff {
        let mut peer = LocalPeer::new(from);
        let view = to.begin_consistent_view().unwrap();
        let reconciler = Reconciler::new(&view, TableHandle::new(def.clone()).unwrap(), HashAlgorithm::Blake3);
        let diff = reconciler.run(&mut peer).await.unwrap();

        for key in &diff.deletes {
            to.delete(&def.name, key.clone()).unwrap();
        }
        for row in &diff.upserts {
            to.upsert(&def.name, row.clone()).unwrap();
        }
        assert_eq!(contents(to, def), contents(from, def));
        assert_eq!(peer.commands[..2], ["HASH_ALGORITHM", "OPEN"]);
        diff
    }

    fn footbl_rows() -> Vec<Row> {
        vec![
            row(2, Some("10"), Some("test")),
            row(4, None, Some("foo")),
            row(5, None, None),
            row(8, Some("-1"), Some("longer str")),
            row(100, Some("0"), Some("last")),
        ]
    }

    #[tokio::test]
    async fn test_identical_tables() {
        let def = footbl_def();
        let from = database(&def, &footbl_rows());
        let to = database(&def, &footbl_rows());

        let diff = sync(&from, &to, &def).await;
        assert!(diff.is_empty());
        assert_eq!(diff.rows_received, 0);
    }

    #[tokio::test]
    async fn test_changed_missing_and_extra_rows() {
        let def = footbl_def();
        let from = database(&def, &footbl_rows());

        let mut ours = footbl_rows();
        ours[1] = row(4, Some("7"), Some("foo"));
        ours.remove(3);
        ours.push(row(3, None, Some("extra")));
        ours.push(row(200, None, None));
        let to = database(&def, &ours);

        let diff = sync(&from, &to, &def).await;
        assert_eq!(
            diff.upserts,
            vec![row(4, None, Some("foo")), row(8, Some("-1"), Some("longer str"))]
        );
        assert_eq!(
            diff.deletes,
            vec![Key::from_texts(&["3"]), Key::from_texts(&["200"])]
        );
    }

    #[tokio::test]
    async fn test_empty_sides() {
        let def = footbl_def();
        let full = database(&def, &footbl_rows());

        let diff = sync(&full, &database(&def, &[]), &def).await;
        assert_eq!(diff.upserts, footbl_rows());
        assert_eq!(diff.commands_sent, 3);

        let diff = sync(&database(&def, &[]), &full, &def).await;
        assert_eq!(diff.deletes.len(), 5);
    }

    #[tokio::test]
    async fn test_null_differs_from_empty_string() {
        let def = footbl_def();
        let from = database(&def, &[row(1, None, Some(""))]);
        let to = database(&def, &[row(1, None, None)]);

        let diff = sync(&from, &to, &def).await;
        assert_eq!(diff.upserts, vec![row(1, None, Some(""))]);
    }

    #[tokio::test]
    async fn test_random_tables_converge() {
        let def = footbl_def();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let mut theirs = Vec::new();
            let mut ours = Vec::new();
            for col1 in 0..rng.gen_range(0..120u32) {
                let base = row(col1, Some("1"), Some("same"));
                match rng.gen_range(0..10) {
                    0 => theirs.push(base),
                    1 => ours.push(base),
                    2 => {
                        theirs.push(base);
                        ours.push(row(col1, None, Some("changed")));
                    }
                    _ => {
                        theirs.push(base.clone());
                        ours.push(base);
                    }
                }
            }
            let from = database(&def, &theirs);
            let to = database(&def, &ours);
            sync(&from, &to, &def).await;
        }
    }

    #[tokio::test]
    async fn test_rejects_rows_outside_range() {
        struct LyingPeer;

        #[async_trait]
        impl Peer for LyingPeer {
            async fn request(&mut self, command: Command) -> SyncResult<Vec<Response>> {
                Ok(vec![match command {
                    Command::HashAlgorithm(algorithm) => Response::HashAlgorithm(algorithm),
                    Command::Open(_) => Response::Ok,
                    _ => Response::Rows {
                        prev_key: Key::unbounded(),
                        last_key: Key::from_texts(&["3"]),
                        rows: vec![row(9, None, None)],
                    },
                }])
            }
        }

        let def = footbl_def();
        let db = database(&def, &footbl_rows());
        let view = db.statement_view().unwrap();
        let reconciler = Reconciler::new(&view, TableHandle::new(def).unwrap(), HashAlgorithm::Blake3);
        assert!(matches!(
            reconciler.run(&mut LyingPeer).await,
            Err(SyncError::UnexpectedResponse(_))
        ));
    }
}
