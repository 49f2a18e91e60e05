//! Session snapshot binding
//!
//! Each session reads through exactly one view, chosen once:
//!
//! ```text
//! Unset ──WITHOUT_SNAPSHOT──▶ WithoutSnapshot
//!   │ ──EXPORT_SNAPSHOT───▶ Exported { held: true } ──UNHOLD_SNAPSHOT──▶ Exported { held: false }
//!   │ ──IMPORT_SNAPSHOT───▶ Imported
//!   └ ──first read───────▶ Implicit
//! ```
//!
//! Any other transition is a sequence error.

use ksync_core::{Database, SnapshotToken, SyncError, SyncResult};
use tracing::{debug, info, warn};

/// How the session's view was bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotMode {
    Unset,
    WithoutSnapshot,
    /// Bound to a private consistent view by the first read
    Implicit,
    Exported { token: SnapshotToken, held: bool },
    Imported { token: SnapshotToken },
}

impl SnapshotMode {
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotMode::Unset => "unset",
            SnapshotMode::WithoutSnapshot => "without_snapshot",
            SnapshotMode::Implicit => "implicit",
            SnapshotMode::Exported { .. } => "exported",
            SnapshotMode::Imported { .. } => "imported",
        }
    }
}

/// Owns a session's database view and its snapshot lifecycle
pub struct SnapshotManager<D: Database> {
    db: D,
    mode: SnapshotMode,
    view: Option<D::View>,
}

impl<D: Database> SnapshotManager<D> {
    pub fn new(db: D) -> Self {
        Self {
            db,
            mode: SnapshotMode::Unset,
            view: None,
        }
    }

    pub fn mode(&self) -> &SnapshotMode {
        &self.mode
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    fn require_unset(&self, command: &str) -> SyncResult<()> {
        if self.mode != SnapshotMode::Unset {
            return Err(SyncError::ProtocolSequence(format!(
                "{} is not allowed once the session is {}",
                command,
                self.mode.name()
            )));
        }
        Ok(())
    }

    /// Read with per-statement isolation for the rest of the session
    pub fn without_snapshot(&mut self) -> SyncResult<()> {
        self.require_unset("WITHOUT_SNAPSHOT")?;
        self.view = Some(self.db.statement_view()?);
        self.mode = SnapshotMode::WithoutSnapshot;
        debug!("Session reading without snapshot");
        Ok(())
    }

    /// Start a consistent view and hold it open for other sessions to import
    pub fn export_snapshot(&mut self) -> SyncResult<SnapshotToken> {
        self.require_unset("EXPORT_SNAPSHOT")?;
        let view = self.db.begin_consistent_view()?;
        let token = self.db.export_snapshot(&view)?;
        self.view = Some(view);
        self.mode = SnapshotMode::Exported {
            token: token.clone(),
            held: true,
        };
        info!("Exported snapshot {}", token);
        Ok(token)
    }

    /// Bind this session to a snapshot another session exported
    pub fn import_snapshot(&mut self, token: &SnapshotToken) -> SyncResult<()> {
        self.require_unset("IMPORT_SNAPSHOT")?;
        self.view = Some(self.db.import_snapshot(token)?);
        self.mode = SnapshotMode::Imported {
            token: token.clone(),
        };
        info!("Imported snapshot {}", token);
        Ok(())
    }

    /// Release the hold on an exported snapshot. The exporter keeps reading
    /// the same view afterwards.
    pub fn unhold_snapshot(&mut self) -> SyncResult<()> {
        match &mut self.mode {
            SnapshotMode::Exported { token, held } if *held => {
                self.db.release_snapshot(token)?;
                *held = false;
                info!("Released hold on snapshot {}", token);
                Ok(())
            }
            _ => Err(SyncError::NoActiveSnapshot),
        }
    }

    /// The view every read of this session goes through. The first read of
    /// a session with no snapshot choice binds a private consistent view.
    pub fn view(&mut self) -> SyncResult<&D::View> {
        if self.view.is_none() {
            self.view = Some(self.db.begin_consistent_view()?);
            self.mode = SnapshotMode::Implicit;
            debug!("Session bound to an implicit consistent view");
        }
        self.view
            .as_ref()
            .ok_or_else(|| SyncError::Internal("view not bound".into()))
    }
}

impl<D: Database> Drop for SnapshotManager<D> {
    fn drop(&mut self) {
        if let SnapshotMode::Exported { token, held: true } = &self.mode {
            if let Err(e) = self.db.release_snapshot(token) {
                warn!("Failed to release snapshot {} on session end: {}", token, e);
            }
        }
    }
}
