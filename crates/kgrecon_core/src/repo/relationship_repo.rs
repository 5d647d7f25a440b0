//! Relationship and provenance repository.
//!
//! # Responsibility
//! - Look up, create and mutate typed edges keyed by unordered pair + type.
//! - Append and move `RelationshipSource` provenance rows.
//! - Derive edge attributes from the most confident asserting source.
//!
//! # Invariants
//! - `pair_lo`/`pair_hi` always mirror the endpoints in sorted order.
//! - Self-loops and duplicate (pair, type) rows are rejected by the schema.

use super::{bool_to_int, int_to_bool, now_text, parse_enum, RepoError, RepoResult};
use crate::model::relationship::{pair_key, EvidenceClass, Relationship, RelationshipSource};
use rusqlite::{params, Connection, OptionalExtension, Row};

const RELATIONSHIP_SELECT_SQL: &str = "SELECT
    id,
    source_entity_id,
    target_entity_id,
    relationship_type,
    subtype,
    date_start,
    date_end,
    weight,
    confidence_score,
    weakly_corroborated
FROM relationships";

const SOURCE_SELECT_SQL: &str = "SELECT
    id,
    relationship_id,
    source_system,
    evidence_class,
    source_confidence,
    evidence_detail,
    asserted_type,
    asserted_date_start,
    asserted_date_end,
    asserted_weight,
    document_refs
FROM relationship_sources";

/// Input for a new edge.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelationship<'a> {
    pub source_entity_id: &'a str,
    pub target_entity_id: &'a str,
    pub relationship_type: &'a str,
    pub subtype: Option<&'a str>,
}

/// Input for one provenance row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSource<'a> {
    pub source_system: &'a str,
    pub evidence_class: EvidenceClass,
    pub source_confidence: f64,
    pub evidence_detail: Option<&'a str>,
    pub asserted_type: &'a str,
    pub asserted_date_start: Option<&'a str>,
    pub asserted_date_end: Option<&'a str>,
    pub asserted_weight: Option<f64>,
    pub document_refs: &'a [String],
}

/// Repository interface for relationships and their sources.
pub trait RelationshipRepository {
    fn find_relationship(&self, a: &str, b: &str, relationship_type: &str) -> RepoResult<Option<i64>>;
    fn insert_relationship(&self, new: &NewRelationship<'_>) -> RepoResult<i64>;
    fn add_source(&self, relationship_id: i64, source: &NewSource<'_>) -> RepoResult<i64>;
    fn get_relationship(&self, id: i64) -> RepoResult<Option<Relationship>>;
    fn list_relationships(&self) -> RepoResult<Vec<Relationship>>;
    fn list_for_entity(&self, entity_id: &str) -> RepoResult<Vec<Relationship>>;
    fn list_sources(&self, relationship_id: i64) -> RepoResult<Vec<RelationshipSource>>;
    fn list_all_sources(&self) -> RepoResult<Vec<RelationshipSource>>;
    fn delete_relationship(&self, id: i64) -> RepoResult<()>;
    fn move_sources(&self, from_relationship: i64, to_relationship: i64) -> RepoResult<u32>;
    fn repoint_endpoint(&self, id: i64, from_entity: &str, to_entity: &str) -> RepoResult<()>;
    fn refresh_attributes(&self, id: i64) -> RepoResult<()>;
    fn set_score(&self, id: i64, confidence_score: f64, weakly_corroborated: bool) -> RepoResult<()>;
    fn neighbor_ids(&self, entity_id: &str) -> RepoResult<Vec<String>>;
    fn count_relationships(&self) -> RepoResult<u64>;
}

/// SQLite-backed relationship repository.
pub struct SqliteRelationshipRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRelationshipRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_relationships(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> RepoResult<Vec<Relationship>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut relationships = Vec::new();
        while let Some(row) = rows.next()? {
            relationships.push(parse_relationship_row(row)?);
        }
        Ok(relationships)
    }

    fn query_sources(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> RepoResult<Vec<RelationshipSource>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut sources = Vec::new();
        while let Some(row) = rows.next()? {
            sources.push(parse_source_row(row)?);
        }
        Ok(sources)
    }
}

impl RelationshipRepository for SqliteRelationshipRepository<'_> {
    fn find_relationship(&self, a: &str, b: &str, relationship_type: &str) -> RepoResult<Option<i64>> {
        let (lo, hi) = pair_key(a, b);
        let id = self
            .conn
            .query_row(
                "SELECT id FROM relationships
                 WHERE pair_lo = ?1 AND pair_hi = ?2 AND relationship_type = ?3;",
                params![lo, hi, relationship_type],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id)
    }

    fn insert_relationship(&self, new: &NewRelationship<'_>) -> RepoResult<i64> {
        if new.source_entity_id == new.target_entity_id {
            return Err(RepoError::InvalidData(format!(
                "self-loop relationship on {}",
                new.source_entity_id
            )));
        }
        let (lo, hi) = pair_key(new.source_entity_id, new.target_entity_id);
        let now = now_text();
        self.conn.execute(
            "INSERT INTO relationships (
                source_entity_id,
                target_entity_id,
                pair_lo,
                pair_hi,
                relationship_type,
                subtype,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7);",
            params![
                new.source_entity_id,
                new.target_entity_id,
                lo,
                hi,
                new.relationship_type,
                new.subtype,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn add_source(&self, relationship_id: i64, source: &NewSource<'_>) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO relationship_sources (
                relationship_id,
                source_system,
                evidence_class,
                source_confidence,
                evidence_detail,
                asserted_type,
                asserted_date_start,
                asserted_date_end,
                asserted_weight,
                document_refs,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                relationship_id,
                source.source_system,
                source.evidence_class.as_str(),
                source.source_confidence,
                source.evidence_detail,
                source.asserted_type,
                source.asserted_date_start,
                source.asserted_date_end,
                source.asserted_weight,
                serde_json::to_string(source.document_refs)?,
                now_text(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_relationship(&self, id: i64) -> RepoResult<Option<Relationship>> {
        let mut found = self.query_relationships(
            &format!("{RELATIONSHIP_SELECT_SQL} WHERE id = ?1;"),
            [id],
        )?;
        Ok(found.pop())
    }

    fn list_relationships(&self) -> RepoResult<Vec<Relationship>> {
        self.query_relationships(&format!("{RELATIONSHIP_SELECT_SQL} ORDER BY id ASC;"), [])
    }

    fn list_for_entity(&self, entity_id: &str) -> RepoResult<Vec<Relationship>> {
        self.query_relationships(
            &format!(
                "{RELATIONSHIP_SELECT_SQL}
                 WHERE source_entity_id = ?1 OR target_entity_id = ?1
                 ORDER BY id ASC;"
            ),
            [entity_id],
        )
    }

    fn list_sources(&self, relationship_id: i64) -> RepoResult<Vec<RelationshipSource>> {
        self.query_sources(
            &format!("{SOURCE_SELECT_SQL} WHERE relationship_id = ?1 ORDER BY id ASC;"),
            [relationship_id],
        )
    }

    fn list_all_sources(&self) -> RepoResult<Vec<RelationshipSource>> {
        self.query_sources(
            &format!("{SOURCE_SELECT_SQL} ORDER BY relationship_id ASC, id ASC;"),
            [],
        )
    }

    fn delete_relationship(&self, id: i64) -> RepoResult<()> {
        self.conn
            .execute("DELETE FROM relationship_sources WHERE relationship_id = ?1;", [id])?;
        let changed = self
            .conn
            .execute("DELETE FROM relationships WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("relationship {id}")));
        }
        Ok(())
    }

    fn move_sources(&self, from_relationship: i64, to_relationship: i64) -> RepoResult<u32> {
        let moved = self.conn.execute(
            "UPDATE relationship_sources SET relationship_id = ?1 WHERE relationship_id = ?2;",
            params![to_relationship, from_relationship],
        )?;
        Ok(moved as u32)
    }

    fn repoint_endpoint(&self, id: i64, from_entity: &str, to_entity: &str) -> RepoResult<()> {
        let relationship = self
            .get_relationship(id)?
            .ok_or_else(|| RepoError::NotFound(format!("relationship {id}")))?;
        let source = if relationship.source_entity_id == from_entity {
            to_entity.to_string()
        } else {
            relationship.source_entity_id
        };
        let target = if relationship.target_entity_id == from_entity {
            to_entity.to_string()
        } else {
            relationship.target_entity_id
        };
        let (lo, hi) = pair_key(&source, &target);
        self.conn.execute(
            "UPDATE relationships
             SET source_entity_id = ?1, target_entity_id = ?2, pair_lo = ?3, pair_hi = ?4,
                 updated_at = ?5
             WHERE id = ?6;",
            params![source, target, lo, hi, now_text(), id],
        )?;
        Ok(())
    }

    fn refresh_attributes(&self, id: i64) -> RepoResult<()> {
        let sources = self.list_sources(id)?;
        let best = |pick: fn(&RelationshipSource) -> bool| {
            sources
                .iter()
                .filter(|source| pick(source))
                .fold(None::<&RelationshipSource>, |best, source| match best {
                    Some(current) if current.source_confidence >= source.source_confidence => {
                        Some(current)
                    }
                    _ => Some(source),
                })
        };
        let date_source = best(|source| source.asserted_date_start.is_some());
        let end_source = best(|source| source.asserted_date_end.is_some());
        let weight_source = best(|source| source.asserted_weight.is_some());

        self.conn.execute(
            "UPDATE relationships
             SET date_start = ?1, date_end = ?2, weight = ?3, updated_at = ?4
             WHERE id = ?5;",
            params![
                date_source.and_then(|source| source.asserted_date_start.as_deref()),
                end_source.and_then(|source| source.asserted_date_end.as_deref()),
                weight_source.and_then(|source| source.asserted_weight),
                now_text(),
                id,
            ],
        )?;
        Ok(())
    }

    fn set_score(&self, id: i64, confidence_score: f64, weakly_corroborated: bool) -> RepoResult<()> {
        self.conn.execute(
            "UPDATE relationships SET confidence_score = ?1, weakly_corroborated = ?2 WHERE id = ?3;",
            params![confidence_score, bool_to_int(weakly_corroborated), id],
        )?;
        Ok(())
    }

    fn neighbor_ids(&self, entity_id: &str) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_entity_id FROM relationships WHERE source_entity_id = ?1
             UNION
             SELECT source_entity_id FROM relationships WHERE target_entity_id = ?1
             ORDER BY 1;",
        )?;
        let neighbors = stmt
            .query_map([entity_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(neighbors)
    }

    fn count_relationships(&self) -> RepoResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM relationships;", [], |row| {
                row.get::<_, u64>(0)
            })?;
        Ok(count)
    }
}

fn parse_relationship_row(row: &Row<'_>) -> RepoResult<Relationship> {
    Ok(Relationship {
        id: row.get("id")?,
        source_entity_id: row.get("source_entity_id")?,
        target_entity_id: row.get("target_entity_id")?,
        relationship_type: row.get("relationship_type")?,
        subtype: row.get("subtype")?,
        date_start: row.get("date_start")?,
        date_end: row.get("date_end")?,
        weight: row.get("weight")?,
        confidence_score: row.get("confidence_score")?,
        weakly_corroborated: int_to_bool(
            row.get("weakly_corroborated")?,
            "relationships.weakly_corroborated",
        )?,
    })
}

fn parse_source_row(row: &Row<'_>) -> RepoResult<RelationshipSource> {
    let class_text: String = row.get("evidence_class")?;
    let refs_text: String = row.get("document_refs")?;
    Ok(RelationshipSource {
        id: row.get("id")?,
        relationship_id: row.get("relationship_id")?,
        source_system: row.get("source_system")?,
        evidence_class: parse_enum(
            &class_text,
            "relationship_sources.evidence_class",
            EvidenceClass::parse,
        )?,
        source_confidence: row.get("source_confidence")?,
        evidence_detail: row.get("evidence_detail")?,
        asserted_type: row.get("asserted_type")?,
        asserted_date_start: row.get("asserted_date_start")?,
        asserted_date_end: row.get("asserted_date_end")?,
        asserted_weight: row.get("asserted_weight")?,
        document_refs: serde_json::from_str(&refs_text)?,
    })
}
