//! Merge audit, conflict, review-queue and run-ledger persistence.
//!
//! # Responsibility
//! - Append merge engine decisions to `entity_merges`.
//! - Record conflicts and review items idempotently.
//! - Track stage executions in `pipeline_runs`.
//!
//! # Invariants
//! - Merge records are never updated or deleted.
//! - Conflict status changes only through `set_conflict_status`.
//! - Open review items and unresolved conflicts only name live entities and
//!   relationships; the merge engine moves or retires them before deleting.

use super::{now_text, parse_enum, parse_timestamp, RepoError, RepoResult};
use crate::model::audit::{
    Conflict, ConflictStatus, MergeRecord, PipelineRun, ReviewItem, ReviewKind, RunStatus,
    Severity, SubjectKind,
};
use rusqlite::{params, Connection, Row};

/// Repository interface for merge, conflict and review audit rows.
pub trait AuditRepository {
    fn insert_merge(&self, record: &MergeRecord) -> RepoResult<i64>;
    fn list_merges(&self) -> RepoResult<Vec<MergeRecord>>;
    /// Returns `false` when an identical conflict was already recorded.
    fn insert_conflict(&self, conflict: &Conflict) -> RepoResult<bool>;
    fn list_conflicts(&self, status: Option<ConflictStatus>) -> RepoResult<Vec<Conflict>>;
    fn set_conflict_status(&self, id: i64, status: ConflictStatus, notes: Option<&str>) -> RepoResult<()>;
    /// Returns `false` when the same item is already queued.
    fn enqueue_review(&self, item: &ReviewItem) -> RepoResult<bool>;
    fn list_reviews(&self, kind: Option<ReviewKind>) -> RepoResult<Vec<ReviewItem>>;
    fn close_review(&self, id: i64) -> RepoResult<()>;
    /// Moves open review items and conflicts naming `from_entity` onto
    /// `to_entity`. Reviews that would pair the entity with itself are closed.
    fn repoint_entity_refs(&self, from_entity: &str, to_entity: &str) -> RepoResult<RefsMoved>;
    /// Moves conflicts about relationship `from_relationship` onto `to_relationship`.
    fn repoint_relationship_conflicts(&self, from_relationship: i64, to_relationship: i64) -> RepoResult<u32>;
    /// Closes open reviews naming `entity_id` and drops unresolved conflicts
    /// about it or about the given deleted relationships.
    fn retire_refs(&self, entity_id: Option<&str>, relationship_ids: &[i64]) -> RepoResult<RefsMoved>;
}

/// Review and conflict rows touched while repointing or retiring an id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefsMoved {
    pub reviews_repointed: u32,
    pub reviews_closed: u32,
    pub conflicts_repointed: u32,
    pub conflicts_dropped: u32,
}

/// Repository interface for the stage execution ledger.
pub trait RunLedger {
    fn start_stage(&self, run_id: &str, stage: &str) -> RepoResult<i64>;
    fn finish_stage(
        &self,
        id: i64,
        status: RunStatus,
        records_processed: u64,
        notes: Option<&str>,
    ) -> RepoResult<()>;
    fn list_runs(&self, run_id: Option<&str>) -> RepoResult<Vec<PipelineRun>>;
}

/// SQLite-backed audit repository.
pub struct SqliteAuditRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl AuditRepository for SqliteAuditRepository<'_> {
    fn insert_merge(&self, record: &MergeRecord) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO entity_merges (
                batch_id,
                survivor_id,
                absorbed_id,
                absorbed_name,
                reason,
                match_key,
                relationships_repointed,
                relationships_consolidated,
                relationships_dropped,
                resolutions_repointed,
                survivor_degree_before,
                survivor_degree_after,
                merged_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                record.batch_id.as_str(),
                record.survivor_id.as_str(),
                record.absorbed_id.as_str(),
                record.absorbed_name.as_str(),
                record.reason.as_str(),
                record.match_key.as_deref(),
                record.relationships_repointed,
                record.relationships_consolidated,
                record.relationships_dropped,
                record.resolutions_repointed,
                record.survivor_degree_before,
                record.survivor_degree_after,
                record.merged_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_merges(&self) -> RepoResult<Vec<MergeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT batch_id, survivor_id, absorbed_id, absorbed_name, reason, match_key,
                    relationships_repointed, relationships_consolidated, relationships_dropped,
                    resolutions_repointed, survivor_degree_before, survivor_degree_after,
                    merged_at
             FROM entity_merges ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut merges = Vec::new();
        while let Some(row) = rows.next()? {
            merges.push(parse_merge_row(row)?);
        }
        Ok(merges)
    }

    fn insert_conflict(&self, conflict: &Conflict) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO conflicts (
                subject_kind,
                subject_id,
                field_name,
                source_a,
                value_a,
                source_b,
                value_b,
                severity,
                status,
                resolution_notes,
                detected_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                conflict.subject_kind.as_str(),
                conflict.subject_id.as_str(),
                conflict.field_name.as_str(),
                conflict.source_a.as_str(),
                conflict.value_a.as_str(),
                conflict.source_b.as_str(),
                conflict.value_b.as_str(),
                conflict.severity.as_str(),
                conflict.status.as_str(),
                conflict.resolution_notes.as_deref(),
                now_text(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn list_conflicts(&self, status: Option<ConflictStatus>) -> RepoResult<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject_kind, subject_id, field_name, source_a, value_a, source_b,
                    value_b, severity, status, resolution_notes
             FROM conflicts
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([status.map(ConflictStatus::as_str)])?;
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next()? {
            conflicts.push(parse_conflict_row(row)?);
        }
        Ok(conflicts)
    }

    fn set_conflict_status(&self, id: i64, status: ConflictStatus, notes: Option<&str>) -> RepoResult<()> {
        let resolved_at = (status != ConflictStatus::Unresolved).then(now_text);
        let changed = self.conn.execute(
            "UPDATE conflicts SET status = ?1, resolution_notes = ?2, resolved_at = ?3
             WHERE id = ?4;",
            params![status.as_str(), notes, resolved_at, id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("conflict {id}")));
        }
        Ok(())
    }

    fn enqueue_review(&self, item: &ReviewItem) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO review_queue (
                kind,
                subject_name,
                entity_a,
                entity_b,
                score,
                runner_up_score,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                item.kind.as_str(),
                item.subject_name.as_str(),
                item.entity_a.as_str(),
                item.entity_b.as_str(),
                item.score,
                item.runner_up_score,
                now_text(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn list_reviews(&self, kind: Option<ReviewKind>) -> RepoResult<Vec<ReviewItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, subject_name, entity_a, entity_b, score, runner_up_score
             FROM review_queue
             WHERE status = 'open' AND (?1 IS NULL OR kind = ?1)
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([kind.map(ReviewKind::as_str)])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let kind_text: String = row.get("kind")?;
            items.push(ReviewItem {
                id: Some(row.get("id")?),
                kind: parse_enum(&kind_text, "review_queue.kind", ReviewKind::parse)?,
                subject_name: row.get("subject_name")?,
                entity_a: row.get("entity_a")?,
                entity_b: row.get("entity_b")?,
                score: row.get("score")?,
                runner_up_score: row.get("runner_up_score")?,
            });
        }
        Ok(items)
    }

    fn close_review(&self, id: i64) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("UPDATE review_queue SET status = 'closed' WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("review item {id}")));
        }
        Ok(())
    }

    fn repoint_entity_refs(&self, from_entity: &str, to_entity: &str) -> RepoResult<RefsMoved> {
        let mut moved = RefsMoved {
            reviews_closed: self.conn.execute(
                "UPDATE review_queue SET status = 'closed'
                 WHERE status = 'open'
                   AND ((entity_a = ?1 AND entity_b = ?2) OR (entity_a = ?2 AND entity_b = ?1));",
                params![from_entity, to_entity],
            )? as u32,
            ..RefsMoved::default()
        };
        for sql in [
            "UPDATE OR IGNORE review_queue SET entity_a = ?2 WHERE status = 'open' AND entity_a = ?1;",
            "UPDATE OR IGNORE review_queue SET entity_b = ?2 WHERE status = 'open' AND entity_b = ?1;",
        ] {
            moved.reviews_repointed += self.conn.execute(sql, params![from_entity, to_entity])? as u32;
        }
        // Rows left behind duplicate an item already queued for the survivor.
        moved.reviews_closed += self.conn.execute(
            "UPDATE review_queue SET status = 'closed'
             WHERE status = 'open' AND (entity_a = ?1 OR entity_b = ?1);",
            [from_entity],
        )? as u32;

        moved.conflicts_repointed = self.conn.execute(
            "UPDATE OR IGNORE conflicts SET subject_id = ?2
             WHERE subject_kind = 'entity' AND subject_id = ?1;",
            params![from_entity, to_entity],
        )? as u32;
        moved.conflicts_dropped = self.conn.execute(
            "DELETE FROM conflicts
             WHERE subject_kind = 'entity' AND subject_id = ?1 AND status = 'unresolved';",
            [from_entity],
        )? as u32;
        Ok(moved)
    }

    fn repoint_relationship_conflicts(&self, from_relationship: i64, to_relationship: i64) -> RepoResult<u32> {
        let (from, to) = (from_relationship.to_string(), to_relationship.to_string());
        let repointed = self.conn.execute(
            "UPDATE OR IGNORE conflicts SET subject_id = ?2
             WHERE subject_kind = 'relationship' AND subject_id = ?1;",
            params![from, to],
        )?;
        self.conn.execute(
            "DELETE FROM conflicts
             WHERE subject_kind = 'relationship' AND subject_id = ?1 AND status = 'unresolved';",
            [from],
        )?;
        Ok(repointed as u32)
    }

    fn retire_refs(&self, entity_id: Option<&str>, relationship_ids: &[i64]) -> RepoResult<RefsMoved> {
        let mut moved = RefsMoved::default();
        if let Some(entity_id) = entity_id {
            moved.reviews_closed = self.conn.execute(
                "UPDATE review_queue SET status = 'closed'
                 WHERE status = 'open' AND (entity_a = ?1 OR entity_b = ?1);",
                [entity_id],
            )? as u32;
            moved.conflicts_dropped = self.conn.execute(
                "DELETE FROM conflicts
                 WHERE subject_kind = 'entity' AND subject_id = ?1 AND status = 'unresolved';",
                [entity_id],
            )? as u32;
        }
        for relationship_id in relationship_ids {
            moved.conflicts_dropped += self.conn.execute(
                "DELETE FROM conflicts
                 WHERE subject_kind = 'relationship' AND subject_id = ?1 AND status = 'unresolved';",
                [relationship_id.to_string()],
            )? as u32;
        }
        Ok(moved)
    }
}

/// SQLite-backed `pipeline_runs` ledger.
pub struct SqliteRunLedger<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRunLedger<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RunLedger for SqliteRunLedger<'_> {
    fn start_stage(&self, run_id: &str, stage: &str) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO pipeline_runs (run_id, stage, status, started_at)
             VALUES (?1, ?2, 'running', ?3);",
            params![run_id, stage, now_text()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_stage(
        &self,
        id: i64,
        status: RunStatus,
        records_processed: u64,
        notes: Option<&str>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE pipeline_runs
             SET status = ?1, finished_at = ?2, records_processed = ?3, notes = ?4
             WHERE id = ?5;",
            params![status.as_str(), now_text(), records_processed, notes, id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(format!("pipeline run {id}")));
        }
        Ok(())
    }

    fn list_runs(&self, run_id: Option<&str>) -> RepoResult<Vec<PipelineRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, status, started_at, finished_at, records_processed, notes
             FROM pipeline_runs
             WHERE (?1 IS NULL OR run_id = ?1)
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([run_id])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            let status_text: String = row.get("status")?;
            runs.push(PipelineRun {
                id: row.get("id")?,
                run_id: row.get("run_id")?,
                stage: row.get("stage")?,
                status: parse_enum(&status_text, "pipeline_runs.status", RunStatus::parse)?,
                started_at: row.get("started_at")?,
                finished_at: row.get("finished_at")?,
                records_processed: row.get("records_processed")?,
                notes: row.get("notes")?,
            });
        }
        Ok(runs)
    }
}

fn parse_merge_row(row: &Row<'_>) -> RepoResult<MergeRecord> {
    let merged_at: String = row.get("merged_at")?;
    Ok(MergeRecord {
        batch_id: row.get("batch_id")?,
        survivor_id: row.get("survivor_id")?,
        absorbed_id: row.get("absorbed_id")?,
        absorbed_name: row.get("absorbed_name")?,
        reason: row.get("reason")?,
        match_key: row.get("match_key")?,
        relationships_repointed: row.get("relationships_repointed")?,
        relationships_consolidated: row.get("relationships_consolidated")?,
        relationships_dropped: row.get("relationships_dropped")?,
        resolutions_repointed: row.get("resolutions_repointed")?,
        survivor_degree_before: row.get("survivor_degree_before")?,
        survivor_degree_after: row.get("survivor_degree_after")?,
        merged_at: parse_timestamp(&merged_at, "entity_merges.merged_at")?,
    })
}

fn parse_conflict_row(row: &Row<'_>) -> RepoResult<Conflict> {
    let kind_text: String = row.get("subject_kind")?;
    let severity_text: String = row.get("severity")?;
    let status_text: String = row.get("status")?;
    Ok(Conflict {
        id: Some(row.get("id")?),
        subject_kind: parse_enum(&kind_text, "conflicts.subject_kind", SubjectKind::parse)?,
        subject_id: row.get("subject_id")?,
        field_name: row.get("field_name")?,
        source_a: row.get("source_a")?,
        value_a: row.get("value_a")?,
        source_b: row.get("source_b")?,
        value_b: row.get("value_b")?,
        severity: parse_enum(&severity_text, "conflicts.severity", Severity::parse)?,
        status: parse_enum(&status_text, "conflicts.status", ConflictStatus::parse)?,
        resolution_notes: row.get("resolution_notes")?,
    })
}
