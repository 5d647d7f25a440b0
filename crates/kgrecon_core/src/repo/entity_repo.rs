//! Canonical entity repository.
//!
//! # Responsibility
//! - Persist and load `CanonicalEntity` rows with JSON alias/metadata columns.
//! - Mint stable, never-reused type-prefixed ids.
//! - Answer degree queries the merge engine ranks survivors by.
//!
//! # Invariants
//! - Ids are never reused, including ids of deleted or absorbed entities.
//! - `aliases` is stored without the display name.

use super::{
    bool_to_int, int_to_bool, now_text, parse_enum, parse_timestamp, RepoError, RepoResult,
};
use crate::model::entity::{CanonicalEntity, EntityType};
use rusqlite::{params, Connection, OptionalExtension, Row};

const ENTITY_SELECT_SQL: &str = "SELECT
    id,
    entity_type,
    display_name,
    aliases,
    metadata,
    exclude_from_analysis,
    exclude_reason,
    first_seen,
    last_updated
FROM canonical_entities";

/// Repository interface for canonical entities.
pub trait EntityRepository {
    fn insert_entity(&self, entity: &CanonicalEntity) -> RepoResult<()>;
    fn update_entity(&self, entity: &CanonicalEntity) -> RepoResult<()>;
    fn get_entity(&self, id: &str) -> RepoResult<Option<CanonicalEntity>>;
    fn list_entities(&self, entity_type: Option<EntityType>) -> RepoResult<Vec<CanonicalEntity>>;
    fn delete_entity(&self, id: &str) -> RepoResult<()>;
    fn set_exclusion(&self, id: &str, reason: &str) -> RepoResult<()>;
    fn degree(&self, id: &str) -> RepoResult<u32>;
    fn next_id(&self, entity_type: EntityType) -> RepoResult<String>;
    fn count_entities(&self) -> RepoResult<u64>;
}

/// SQLite-backed canonical entity repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn insert_entity(&self, entity: &CanonicalEntity) -> RepoResult<()> {
        validate_entity(entity)?;
        self.conn.execute(
            "INSERT INTO canonical_entities (
                id,
                entity_type,
                display_name,
                aliases,
                metadata,
                exclude_from_analysis,
                exclude_reason,
                first_seen,
                last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                entity.id.as_str(),
                entity.entity_type.as_str(),
                entity.display_name.as_str(),
                serde_json::to_string(&entity.aliases)?,
                serde_json::to_string(&entity.metadata)?,
                bool_to_int(entity.exclude_from_analysis),
                entity.exclude_reason.as_deref(),
                entity.first_seen.to_rfc3339(),
                entity.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update_entity(&self, entity: &CanonicalEntity) -> RepoResult<()> {
        validate_entity(entity)?;
        let changed = self.conn.execute(
            "UPDATE canonical_entities
             SET
                entity_type = ?1,
                display_name = ?2,
                aliases = ?3,
                metadata = ?4,
                exclude_from_analysis = ?5,
                exclude_reason = ?6,
                last_updated = ?7
             WHERE id = ?8;",
            params![
                entity.entity_type.as_str(),
                entity.display_name.as_str(),
                serde_json::to_string(&entity.aliases)?,
                serde_json::to_string(&entity.metadata)?,
                bool_to_int(entity.exclude_from_analysis),
                entity.exclude_reason.as_deref(),
                now_text(),
                entity.id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("entity {}", entity.id)));
        }
        Ok(())
    }

    fn get_entity(&self, id: &str) -> RepoResult<Option<CanonicalEntity>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ENTITY_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_entity_row(row)?));
        }
        Ok(None)
    }

    fn list_entities(&self, entity_type: Option<EntityType>) -> RepoResult<Vec<CanonicalEntity>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENTITY_SELECT_SQL}
             WHERE (?1 IS NULL OR entity_type = ?1)
             ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([entity_type.map(EntityType::as_str)])?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(parse_entity_row(row)?);
        }
        Ok(entities)
    }

    fn delete_entity(&self, id: &str) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM canonical_entities WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    fn set_exclusion(&self, id: &str, reason: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE canonical_entities
             SET exclude_from_analysis = 1, exclude_reason = ?1, last_updated = ?2
             WHERE id = ?3;",
            params![reason, now_text(), id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("entity {id}")));
        }
        Ok(())
    }

    fn degree(&self, id: &str) -> RepoResult<u32> {
        let degree = self.conn.query_row(
            "SELECT COUNT(*) FROM relationships
             WHERE source_entity_id = ?1 OR target_entity_id = ?1;",
            [id],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(degree)
    }

    fn next_id(&self, entity_type: EntityType) -> RepoResult<String> {
        let prefix = entity_type.id_prefix();
        let pattern = format!("{prefix}-%");
        let offset = prefix.len() as i64 + 2;
        // Absorbed and tombstoned ids count too, so no id is ever reissued.
        let max: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(CAST(substr(known_id, ?2) AS INTEGER)) FROM (
                    SELECT id AS known_id FROM canonical_entities
                    UNION ALL SELECT tombstoned_id FROM entity_resolution_log
                        WHERE tombstoned_id IS NOT NULL
                    UNION ALL SELECT absorbed_id FROM entity_merges
                 ) WHERE known_id LIKE ?1;",
                params![pattern, offset],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(format_entity_id(entity_type, max.unwrap_or(0) + 1))
    }

    fn count_entities(&self) -> RepoResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM canonical_entities;", [], |row| {
                row.get::<_, u64>(0)
            })?;
        Ok(count)
    }
}

/// Renders `PER-00042` style ids.
pub fn format_entity_id(entity_type: EntityType, sequence: i64) -> String {
    format!("{}-{sequence:05}", entity_type.id_prefix())
}

fn validate_entity(entity: &CanonicalEntity) -> RepoResult<()> {
    if entity.display_name.trim().is_empty() {
        return Err(RepoError::InvalidData(format!(
            "entity {} has an empty display name",
            entity.id
        )));
    }
    let folded = entity.display_name.to_lowercase();
    if entity
        .aliases
        .iter()
        .any(|alias| alias.to_lowercase() == folded)
    {
        return Err(RepoError::InvalidData(format!(
            "entity {} lists its display name as an alias",
            entity.id
        )));
    }
    Ok(())
}

fn parse_entity_row(row: &Row<'_>) -> RepoResult<CanonicalEntity> {
    let type_text: String = row.get("entity_type")?;
    let aliases_text: String = row.get("aliases")?;
    let metadata_text: String = row.get("metadata")?;
    let first_seen: String = row.get("first_seen")?;
    let last_updated: String = row.get("last_updated")?;

    Ok(CanonicalEntity {
        id: row.get("id")?,
        entity_type: parse_enum(&type_text, "canonical_entities.entity_type", EntityType::parse)?,
        display_name: row.get("display_name")?,
        aliases: serde_json::from_str(&aliases_text)?,
        metadata: serde_json::from_str(&metadata_text)?,
        exclude_from_analysis: int_to_bool(
            row.get("exclude_from_analysis")?,
            "canonical_entities.exclude_from_analysis",
        )?,
        exclude_reason: row.get("exclude_reason")?,
        first_seen: parse_timestamp(&first_seen, "canonical_entities.first_seen")?,
        last_updated: parse_timestamp(&last_updated, "canonical_entities.last_updated")?,
    })
}
