//! Per-connection command dispatch

use async_trait::async_trait;
use ksync_core::{Database, EndpointConfig, HashAlgorithm, SyncError, SyncResult, TableSource};
use ksync_engine::{DiffEngine, Peer, TableHandle};
use ksync_protocol::{negotiate_version, Command, Response};
use ksync_state::{SnapshotManager, SnapshotMode};
use tracing::{debug, info, warn};

/// One "from" endpoint session: a snapshot binding, an optional open table
/// and the digest algorithm in use.
///
/// Sessions are driven by one caller at a time and share nothing but the
/// database. The first error closes the session for good.
pub struct Session<D: Database> {
    name: String,
    snapshots: SnapshotManager<D>,
    engine: DiffEngine,
    table: Option<TableHandle>,
    protocol_version: Option<u32>,
    closed: bool,
}

impl<D: Database> Session<D> {
    pub fn new(name: impl Into<String>, db: D, algorithm: HashAlgorithm) -> Self {
        Self {
            name: name.into(),
            snapshots: SnapshotManager::new(db),
            engine: DiffEngine::new(algorithm),
            table: None,
            protocol_version: None,
            closed: false,
        }
    }

    pub fn from_config(config: &EndpointConfig, db: D) -> Self {
        Self::new(config.name.clone(), db, config.hash_algorithm)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn snapshot_mode(&self) -> &SnapshotMode {
        self.snapshots.mode()
    }

    pub fn protocol_version(&self) -> Option<u32> {
        self.protocol_version
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.engine.algorithm()
    }

    pub fn open_table(&self) -> Option<&TableHandle> {
        self.table.as_ref()
    }

    /// Run one command. Every response it produces is returned together so
    /// the caller can write them as a unit.
    pub fn handle(&mut self, command: Command) -> SyncResult<Vec<Response>> {
        if self.closed {
            return Err(SyncError::ProtocolSequence(format!(
                "{} received after session {} closed",
                command.name(),
                self.name
            )));
        }

        let name = command.name();
        debug!("{}: {}", self.name, name);
        match self.dispatch(command) {
            Ok(responses) => Ok(responses),
            Err(e) => {
                warn!("{}: {} failed, closing session: {}", self.name, name, e);
                self.closed = true;
                Err(e)
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> SyncResult<Vec<Response>> {
        if command.is_table_scoped() && self.table.is_none() {
            return Err(SyncError::ProtocolSequence(format!(
                "{} before OPEN",
                command.name()
            )));
        }

        let response = match command {
            Command::Protocol(requested) => {
                if self.protocol_version.is_some() {
                    return Err(SyncError::ProtocolSequence(
                        "protocol version already negotiated".into(),
                    ));
                }
                let version = negotiate_version(requested)?;
                self.protocol_version = Some(version);
                info!("{}: speaking protocol version {}", self.name, version);
                Response::Protocol(version)
            }

            Command::HashAlgorithm(algorithm) => {
                self.engine.set_algorithm(algorithm);
                Response::HashAlgorithm(algorithm)
            }

            Command::WithoutSnapshot => {
                self.snapshots.without_snapshot()?;
                Response::Ok
            }

            Command::ExportSnapshot => Response::Snapshot(self.snapshots.export_snapshot()?),

            Command::ImportSnapshot(token) => {
                self.snapshots.import_snapshot(&token)?;
                Response::Ok
            }

            Command::UnholdSnapshot => {
                self.snapshots.unhold_snapshot()?;
                Response::Ok
            }

            Command::Schema => Response::Schema(self.snapshots.view()?.schema()?),

            Command::Open(table) => {
                let def = self.snapshots.view()?.table(&table)?;
                debug!("{}: opened {}", self.name, def.name);
                self.table = Some(TableHandle::new(def)?);
                Response::Ok
            }

            Command::Hash {
                prev_key,
                last_key,
                hash,
            } => {
                let table = self.table.as_ref().ok_or_else(no_table)?;
                let view = self.snapshots.view()?;
                return Ok(self
                    .engine
                    .handle_hash(view, table, &prev_key, &last_key, &hash)?
                    .into_responses());
            }

            Command::Rows { prev_key, last_key } => {
                let table = self.table.as_ref().ok_or_else(no_table)?;
                let view = self.snapshots.view()?;
                self.engine.handle_rows(view, table, &prev_key, &last_key)?
            }

            Command::Quit => {
                info!("{}: quit", self.name);
                self.closed = true;
                Response::Ok
            }
        };
        Ok(vec![response])
    }
}

fn no_table() -> SyncError {
    SyncError::ProtocolSequence("no table is open".into())
}

/// Lets a "to" side compare against a session in the same process
#[async_trait]
impl<D: Database> Peer for Session<D> {
    async fn request(&mut self, command: Command) -> SyncResult<Vec<Response>> {
        self.handle(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_core::{ColumnDef, ColumnType, Hash, Key, Row, TableDef};
    use ksync_state::MemoryDatabase;

    fn database() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        let def = TableDef::new(
            "footbl",
            vec![
                ColumnDef::new("col1", ColumnType::Integer),
                ColumnDef::new("col3", ColumnType::Text),
            ],
            &["col1"],
        )
        .unwrap();
        db.create_table(def).unwrap();
        for (col1, col3) in [("2", "test"), ("4", "foo"), ("5", "bar")] {
            db.upsert("footbl", Row::from_optional(&[Some(col1), Some(col3)]))
                .unwrap();
        }
        db
    }

    fn session(db: &MemoryDatabase) -> Session<MemoryDatabase> {
        Session::new("test", db.clone(), HashAlgorithm::Blake3)
    }

    #[test]
    fn test_protocol_negotiation() {
        let mut session = session(&database());
        assert_eq!(
            session.handle(Command::Protocol(3)).unwrap(),
            vec![Response::Protocol(1)]
        );
        assert_eq!(session.protocol_version(), Some(1));

        assert!(matches!(
            session.handle(Command::Protocol(1)),
            Err(SyncError::ProtocolSequence(_))
        ));
        assert!(session.is_closed());
    }

    #[test]
    fn test_hash_before_open_is_rejected() {
        let mut session = session(&database());
        let result = session.handle(Command::Hash {
            prev_key: Key::unbounded(),
            last_key: Key::from_texts(&["2"]),
            hash: Hash::ZERO,
        });
        assert!(matches!(result, Err(SyncError::ProtocolSequence(_))));

        // the session stays closed
        assert!(matches!(
            session.handle(Command::Schema),
            Err(SyncError::ProtocolSequence(_))
        ));
    }

    #[test]
    fn test_open_unknown_table() {
        let mut session = session(&database());
        assert!(matches!(
            session.handle(Command::Open("nosuchtbl".into())),
            Err(SyncError::TableNotFound(_))
        ));
        assert!(session.is_closed());
    }

    #[test]
    fn test_schema_and_open_bind_implicit_snapshot() {
        let mut session = session(&database());
        match session.handle(Command::Schema).unwrap().as_slice() {
            [Response::Schema(schema)] => assert!(schema.table("footbl").is_some()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.snapshot_mode(), &SnapshotMode::Implicit);

        assert_eq!(
            session.handle(Command::Open("footbl".into())).unwrap(),
            vec![Response::Ok]
        );
        assert_eq!(session.open_table().map(|t| t.name()), Some("footbl"));

        // too late to choose a snapshot now
        assert!(matches!(
            session.handle(Command::ExportSnapshot),
            Err(SyncError::ProtocolSequence(_))
        ));
    }

    #[test]
    fn test_single_row_reply_has_follow_up() {
        let mut session = session(&database());
        session.handle(Command::Open("footbl".into())).unwrap();

        let responses = session
            .handle(Command::Hash {
                prev_key: Key::from_texts(&["2"]),
                last_key: Key::from_texts(&["4"]),
                hash: Hash::ZERO,
            })
            .unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0],
            Response::Rows {
                prev_key: Key::from_texts(&["2"]),
                last_key: Key::from_texts(&["4"]),
                rows: vec![Row::from_optional(&[Some("4"), Some("foo")])],
            }
        );
        assert!(matches!(responses[1], Response::Hash { .. }));
    }

    #[test]
    fn test_hash_algorithm_switch() {
        let mut session = session(&database());
        assert_eq!(
            session
                .handle(Command::HashAlgorithm(HashAlgorithm::Sha256))
                .unwrap(),
            vec![Response::HashAlgorithm(HashAlgorithm::Sha256)]
        );
        assert_eq!(session.hash_algorithm(), HashAlgorithm::Sha256);
    }

    #[test]
    fn test_export_import_unhold() {
        let db = database();
        let mut exporter = session(&db);
        let token = match exporter.handle(Command::ExportSnapshot).unwrap().as_slice() {
            [Response::Snapshot(token)] => token.clone(),
            other => panic!("unexpected {:?}", other),
        };

        db.upsert("footbl", Row::from_optional(&[Some("3"), Some("late")]))
            .unwrap();

        let mut importer = session(&db);
        importer
            .handle(Command::ImportSnapshot(token.clone()))
            .unwrap();
        assert_eq!(
            exporter.handle(Command::UnholdSnapshot).unwrap(),
            vec![Response::Ok]
        );

        // both see the table as it was at export time
        for s in [&mut exporter, &mut importer] {
            s.handle(Command::Open("footbl".into())).unwrap();
            let rows = match s
                .handle(Command::Rows {
                    prev_key: Key::unbounded(),
                    last_key: Key::unbounded(),
                })
                .unwrap()
                .remove(0)
            {
                Response::Rows { rows, .. } => rows,
                other => panic!("unexpected {:?}", other),
            };
            assert_eq!(rows.len(), 3);
        }

        let mut late = session(&db);
        assert!(matches!(
            late.handle(Command::ImportSnapshot(token)),
            Err(SyncError::InvalidSnapshotToken(_))
        ));
    }

    #[test]
    fn test_unhold_without_export() {
        let mut session = session(&database());
        session.handle(Command::WithoutSnapshot).unwrap();
        assert!(matches!(
            session.handle(Command::UnholdSnapshot),
            Err(SyncError::NoActiveSnapshot)
        ));
    }

    #[test]
    fn test_quit_closes_session() {
        let mut session = session(&database());
        assert_eq!(session.handle(Command::Quit).unwrap(), vec![Response::Ok]);
        assert!(session.is_closed());
        assert!(session.handle(Command::Schema).is_err());
    }
}
