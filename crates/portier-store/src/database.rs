//! The client database file.
//!
//! Opening a [`Database`] always brings the schema up to date first, so the
//! typed views ([`ConversationStore`], [`TokenLedger`]) never see an old
//! layout.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::conversations::ConversationStore;
use crate::error::{Result, StoreError};
use crate::ledger::TokenLedger;
use crate::migrations;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default client database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/portier/portier.db`
    /// - macOS:   `~/Library/Application Support/com.portier.portier/portier.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\portier\portier\data\portier.db`
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Location used by [`Database::new`].
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "portier", "portier").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("portier.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        // Every committed write must survive a crash of the client process.
        conn.pragma_update(None, "synchronous", "FULL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Throwaway database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    pub fn conversations(&self) -> ConversationStore<'_> {
        ConversationStore::new(self)
    }

    pub fn ledger(&self) -> TokenLedger<'_> {
        TokenLedger::new(self)
    }
}
