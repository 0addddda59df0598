//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] behind a mutex and
//! guarantees that migrations are run before any other operation. It is meant
//! to be created once by the process bootstrap and shared as an
//! `Arc<Database>` with every store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database described by `config`.
    ///
    /// Without an explicit `db_path` the file is placed in the
    /// platform-appropriate data directory:
    /// - Linux:   `~/.local/share/postbox/postbox.db`
    /// - macOS:   `~/Library/Application Support/org.postbox.postbox/postbox.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\postbox\postbox\data\postbox.db`
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let db_path = match &config.db_path {
            Some(path) => path.clone(),
            None => {
                let project_dirs =
                    ProjectDirs::from("org", "postbox", "postbox").ok_or(StoreError::NoDataDir)?;
                let data_dir = project_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("postbox.db")
            }
        };

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path, config.busy_timeout)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(conn, busy_timeout)
    }

    /// Private in-memory database, mostly useful in tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(conn, StoreConfig::default().busy_timeout)
    }

    fn prepare(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock and return the underlying connection.
    ///
    /// Never hold the guard across a call into another store; the mutex is
    /// not reentrant.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        let conn = self.conn().ok()?;
        conn.path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}
