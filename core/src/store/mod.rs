//! SQLite document store.
//!
//! RULE: Only the store talks to the database.
//! The sink hands it finished JSON documents; it never executes SQL itself.

use crate::error::EtlResult;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

mod documents;

pub use documents::{FlagDocument, GroupDocument, RecordDocument, RunDocument};

/// Durability requested for writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConcern {
    /// Committed to the WAL, fsync left to SQLite's checkpointing.
    #[default]
    Acknowledged,
    /// Every commit is fsynced before returning.
    Journaled,
}

pub struct DocumentStore {
    conn: Connection,
    path: Option<String>, // None for :memory:
}

impl DocumentStore {
    pub fn open(path: &str) -> EtlResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        match conn.query_row("PRAGMA journal_mode=WAL;", [], |row| row.get::<_, String>(0)) {
            Ok(mode) => log::debug!("{path} journal mode: {mode}"),
            Err(e) => log::warn!("WAL journal mode unavailable for {path}: {e}"),
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EtlResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EtlResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_documents.sql"))?;
        Ok(())
    }

    pub fn set_write_concern(&self, concern: WriteConcern) -> EtlResult<()> {
        let pragma = match concern {
            WriteConcern::Acknowledged => "PRAGMA synchronous=NORMAL;",
            WriteConcern::Journaled => "PRAGMA synchronous=FULL;",
        };
        self.conn.execute_batch(pragma)?;
        log::debug!("write concern set to {concern:?}");
        Ok(())
    }

    /// Current `synchronous` level as reported by SQLite (1 = NORMAL, 2 = FULL).
    pub fn synchronous_level(&self) -> EtlResult<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA synchronous;", [], |row| row.get(0))?)
    }

    pub fn journal_mode(&self) -> EtlResult<String> {
        Ok(self
            .conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))?)
    }
}
