//! Manual adjudication of queued decisions.
//!
//! Reviewers act here on what the engine refused to decide: conflict rows,
//! and names the resolver could not place confidently.

use crate::model::audit::ConflictStatus;
use crate::model::resolution::{MatchDetails, MatchMethod, ResolutionRecord};
use crate::repo::audit_repo::{AuditRepository, SqliteAuditRepository};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::resolution_repo::{ResolutionLog, SqliteResolutionLog};
use crate::repo::{RepoError, RepoResult};
use chrono::Utc;
use log::info;
use rusqlite::Connection;

/// A reviewer's decision that `name_as_written` from `source_system` refers
/// to `canonical_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualResolution<'a> {
    pub source_system: &'a str,
    pub source_local_id: Option<&'a str>,
    pub name_as_written: &'a str,
    pub canonical_id: &'a str,
    pub notes: Option<&'a str>,
    /// Review item closed by this decision, if any.
    pub review_id: Option<i64>,
}

/// Moves a conflict out of (or back into) the unresolved state.
pub fn resolve_conflict(
    conn: &Connection,
    conflict_id: i64,
    status: ConflictStatus,
    notes: Option<&str>,
) -> RepoResult<()> {
    SqliteAuditRepository::new(conn).set_conflict_status(conflict_id, status, notes)?;
    info!(
        "event=conflict_adjudicated module=adjudication status=ok conflict_id={conflict_id} decision={}",
        status.as_str()
    );
    Ok(())
}

/// Records a manual resolution: appends a `manual` resolution record and
/// keeps the written name as an alias of the chosen entity.
pub fn manual_resolution(conn: &Connection, decision: &ManualResolution<'_>) -> RepoResult<i64> {
    let name = decision.name_as_written.trim();
    if name.is_empty() {
        return Err(RepoError::InvalidData(
            "manual resolution requires a non-empty name".to_string(),
        ));
    }
    let entities = SqliteEntityRepository::new(conn);
    let mut entity = entities
        .get_entity(decision.canonical_id)?
        .ok_or_else(|| RepoError::NotFound(format!("entity {}", decision.canonical_id)))?;
    if entity.add_alias(name) {
        entities.update_entity(&entity)?;
    }

    let record_id = SqliteResolutionLog::new(conn).append(&ResolutionRecord {
        id: None,
        source_system: decision.source_system.to_string(),
        source_local_id: decision.source_local_id.map(str::to_string),
        source_name_as_written: name.to_string(),
        entity_type: entity.entity_type,
        canonical_id: Some(entity.id.clone()),
        tombstoned_id: None,
        method: MatchMethod::Manual,
        confidence: 1.0,
        details: MatchDetails {
            note: decision.notes.map(str::to_string),
            ..MatchDetails::default()
        },
        created_at: Utc::now(),
    })?;
    if let Some(review_id) = decision.review_id {
        SqliteAuditRepository::new(conn).close_review(review_id)?;
    }
    info!(
        "event=manual_resolution module=adjudication status=ok canonical_id={} record_id={record_id} review_id={:?}",
        entity.id, decision.review_id
    );
    Ok(record_id)
}
