//! Append-only resolution log.
//!
//! # Invariants
//! - Rows are only ever inserted; the sole mutations are merge repointing of
//!   `canonical_id` and tombstoning on noise deletion.

use super::{parse_enum, parse_timestamp, RepoResult};
use crate::model::entity::EntityType;
use crate::model::resolution::{MatchMethod, ResolutionRecord};
use rusqlite::{params, Connection, Row};

const RESOLUTION_SELECT_SQL: &str = "SELECT
    id,
    source_system,
    source_local_id,
    source_name_as_written,
    entity_type,
    canonical_id,
    tombstoned_id,
    method,
    confidence,
    details,
    created_at
FROM entity_resolution_log";

/// Repository interface for the resolution audit log.
pub trait ResolutionLog {
    fn append(&self, record: &ResolutionRecord) -> RepoResult<i64>;
    fn repoint(&self, from_entity: &str, to_entity: &str) -> RepoResult<u32>;
    fn tombstone(&self, entity_id: &str) -> RepoResult<u32>;
    fn list_for_entity(&self, entity_id: &str) -> RepoResult<Vec<ResolutionRecord>>;
    fn list_all(&self) -> RepoResult<Vec<ResolutionRecord>>;
    fn count_records(&self) -> RepoResult<u64>;
}

/// SQLite-backed resolution log.
pub struct SqliteResolutionLog<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteResolutionLog<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> RepoResult<Vec<ResolutionRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_resolution_row(row)?);
        }
        Ok(records)
    }
}

impl ResolutionLog for SqliteResolutionLog<'_> {
    fn append(&self, record: &ResolutionRecord) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO entity_resolution_log (
                source_system,
                source_local_id,
                source_name_as_written,
                entity_type,
                canonical_id,
                tombstoned_id,
                method,
                confidence,
                details,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                record.source_system.as_str(),
                record.source_local_id.as_deref(),
                record.source_name_as_written.as_str(),
                record.entity_type.as_str(),
                record.canonical_id.as_deref(),
                record.tombstoned_id.as_deref(),
                record.method.as_str(),
                record.confidence,
                serde_json::to_string(&record.details)?,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn repoint(&self, from_entity: &str, to_entity: &str) -> RepoResult<u32> {
        let changed = self.conn.execute(
            "UPDATE entity_resolution_log SET canonical_id = ?1 WHERE canonical_id = ?2;",
            params![to_entity, from_entity],
        )?;
        Ok(changed as u32)
    }

    fn tombstone(&self, entity_id: &str) -> RepoResult<u32> {
        let changed = self.conn.execute(
            "UPDATE entity_resolution_log
             SET canonical_id = NULL, tombstoned_id = ?1
             WHERE canonical_id = ?1;",
            [entity_id],
        )?;
        Ok(changed as u32)
    }

    fn list_for_entity(&self, entity_id: &str) -> RepoResult<Vec<ResolutionRecord>> {
        self.query(
            &format!("{RESOLUTION_SELECT_SQL} WHERE canonical_id = ?1 ORDER BY id ASC;"),
            [entity_id],
        )
    }

    fn list_all(&self) -> RepoResult<Vec<ResolutionRecord>> {
        self.query(&format!("{RESOLUTION_SELECT_SQL} ORDER BY id ASC;"), [])
    }

    fn count_records(&self) -> RepoResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM entity_resolution_log;", [], |row| {
                row.get::<_, u64>(0)
            })?;
        Ok(count)
    }
}

fn parse_resolution_row(row: &Row<'_>) -> RepoResult<ResolutionRecord> {
    let type_text: String = row.get("entity_type")?;
    let method_text: String = row.get("method")?;
    let details_text: String = row.get("details")?;
    let created_at: String = row.get("created_at")?;
    Ok(ResolutionRecord {
        id: Some(row.get("id")?),
        source_system: row.get("source_system")?,
        source_local_id: row.get("source_local_id")?,
        source_name_as_written: row.get("source_name_as_written")?,
        entity_type: parse_enum(&type_text, "entity_resolution_log.entity_type", EntityType::parse)?,
        canonical_id: row.get("canonical_id")?,
        tombstoned_id: row.get("tombstoned_id")?,
        method: parse_enum(&method_text, "entity_resolution_log.method", MatchMethod::parse)?,
        confidence: row.get("confidence")?,
        details: serde_json::from_str(&details_text)?,
        created_at: parse_timestamp(&created_at, "entity_resolution_log.created_at")?,
    })
}
