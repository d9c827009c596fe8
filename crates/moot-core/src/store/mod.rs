//! `SQLite`-backed persistence for the engine.
//!
//! The database is the only source of truth. Every mutation runs inside
//! [`Store::write`], which opens a `BEGIN IMMEDIATE` transaction: the write
//! lock is taken before the first read, so the caller's "lock root entity,
//! validate, write, commit" sequence is serialized against every other
//! writer, including writers in other processes sharing the same file. A
//! writer that cannot obtain the lock within the configured timeout fails
//! with [`EngineError::LockTimeout`].
//!
//! WAL mode keeps readers from blocking on in-flight writes.

pub(crate) mod repo;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Handle to the engine database.
///
/// Cloning shares the underlying connection. Separate [`Store::open`] calls on
/// the same path behave like separate server instances.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens or creates the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize_connection(&conn, config)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn in_memory(config: &EngineConfig) -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn, config)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection, config: &EngineConfig) -> Result<(), EngineError> {
        conn.busy_timeout(config.lock_timeout())?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Runs `f` inside an immediate write transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls the whole operation
    /// back.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        // A poisoned mutex only means another thread panicked mid-call; its
        // transaction was rolled back when dropped.
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Runs read-only queries inside one deferred transaction.
    ///
    /// Every statement `f` issues sees the same WAL snapshot, taken at its
    /// first read; writers committing meanwhile are not observed.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
