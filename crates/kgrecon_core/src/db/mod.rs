//! SQLite store bootstrap and schema checks.
//!
//! # Responsibility
//! - Open and configure the single-file reconciliation store.
//! - Apply schema migrations in deterministic order.
//! - Confirm every reconciliation table exists before a stage runs.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No stage reads or writes graph data before migrations succeed.
//! - Every returned connection enforces foreign keys, so relationship and
//!   resolution rows can never point at a missing canonical entity.

use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Tables the pipeline stages read and write.
pub const STORE_TABLES: &[&str] = &[
    "canonical_entities",
    "entity_resolution_log",
    "relationships",
    "relationship_sources",
    "entity_merges",
    "conflicts",
    "review_queue",
    "pipeline_runs",
];

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A migration script failed; the store stays at the previous version.
    Migration {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    MissingTable(&'static str),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Migration {
                version,
                name,
                source,
            } => write!(f, "migration {version:04}_{name} failed: {source}"),
            Self::MissingTable(table) => write!(f, "store is missing table `{table}`"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Migration { source, .. } => Some(source),
            Self::UnsupportedSchemaVersion { .. } | Self::MissingTable(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Fails with the first entry of [`STORE_TABLES`] absent from `conn`.
pub fn verify_schema(conn: &Connection) -> DbResult<()> {
    let mut stmt = conn.prepare(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
    )?;
    for table in STORE_TABLES {
        let exists: bool = stmt.query_row([*table], |row| row.get(0))?;
        if !exists {
            return Err(DbError::MissingTable(*table));
        }
    }
    Ok(())
}
