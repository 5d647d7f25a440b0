//! Staged pipeline runner.
//!
//! # Responsibility
//! - Run the stages of a [`RunPlan`] in order against one store handle.
//! - Record each stage in the `pipeline_runs` ledger.
//! - Hand analytical output to a [`RecordSink`].
//!
//! # Invariants
//! - Each stage runs in one immediate transaction: it commits fully or
//!   leaves the store untouched, and its ledger row says which.
//! - A missing source never fails the run; its ingest row completes with a
//!   coverage note.
//! - The merge stage fails when the post-merge integrity report is unsound.

use crate::analysis::corroboration::{CorroborationScorer, ScoringReport};
use crate::analysis::priority::{collect_signals, rank};
use crate::analysis::{analyze_graph, GraphAnalysis};
use crate::config::ReconcileConfig;
use crate::model::audit::RunStatus;
use crate::repo::audit_repo::{AuditRepository, RunLedger, SqliteAuditRepository, SqliteRunLedger};
use crate::repo::integrity::{check_integrity, IntegrityReport};
use crate::repo::RepoError;
use crate::service::aggregator::{IngestReport, RelationshipAggregator, SourceBatch};
use crate::service::conflicts::{ConflictDetector, ConflictReport};
use crate::service::merge::{MergeEngine, MergeError, MergeReport};
use crate::service::resolver::ResolveError;
use crate::sink::{OutputRecord, RecordSink, SinkError};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
pub enum PipelineError {
    Repo(RepoError),
    Resolve(ResolveError),
    Merge(MergeError),
    Integrity(IntegrityReport),
    Sink(SinkError),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Resolve(err) => write!(f, "{err}"),
            Self::Merge(err) => write!(f, "{err}"),
            Self::Integrity(report) => write!(
                f,
                "integrity check failed: orphaned={} self_loops={} duplicate_pairs={} dangling_resolutions={} unsourced={} stale_reviews={} stale_conflicts={}",
                report.orphaned_relationships,
                report.self_loops,
                report.duplicate_pairs,
                report.dangling_resolutions,
                report.unsourced_relationships,
                report.stale_reviews,
                report.stale_conflicts
            ),
            Self::Sink(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Resolve(err) => Some(err),
            Self::Merge(err) => Some(err),
            Self::Integrity(_) => None,
            Self::Sink(err) => Some(err),
        }
    }
}

impl From<RepoError> for PipelineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

impl From<ResolveError> for PipelineError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

impl From<MergeError> for PipelineError {
    fn from(value: MergeError) -> Self {
        Self::Merge(value)
    }
}

impl From<SinkError> for PipelineError {
    fn from(value: SinkError) -> Self {
        Self::Sink(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Merge,
    Conflicts,
    Scoring,
    Analysis,
    Ranking,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Merge => "merge",
            Self::Conflicts => "conflicts",
            Self::Scoring => "scoring",
            Self::Analysis => "analysis",
            Self::Ranking => "ranking",
        }
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPlan {
    Full,
    CleanupAndAnalysis,
    AnalysisOnly,
}

impl RunPlan {
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Self::Full => &[
                Stage::Ingest,
                Stage::Merge,
                Stage::Conflicts,
                Stage::Scoring,
                Stage::Analysis,
                Stage::Ranking,
            ],
            Self::CleanupAndAnalysis => &[
                Stage::Merge,
                Stage::Conflicts,
                Stage::Scoring,
                Stage::Analysis,
                Stage::Ranking,
            ],
            Self::AnalysisOnly => &[Stage::Scoring, Stage::Analysis, Stage::Ranking],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "full" => Some(Self::Full),
            "cleanup_and_analysis" | "cleanup" => Some(Self::CleanupAndAnalysis),
            "analysis_only" | "analysis" => Some(Self::AnalysisOnly),
            _ => None,
        }
    }
}

/// One source handed to the ingest stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceInput {
    Available(SourceBatch),
    /// The source could not be fetched or read.
    Missing { source_system: String, reason: String },
}

impl SourceInput {
    pub fn source_system(&self) -> &str {
        match self {
            Self::Available(batch) => &batch.source_system,
            Self::Missing { source_system, .. } => source_system,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub ingest: Vec<(String, IngestReport)>,
    pub missing_sources: Vec<String>,
    pub merge: Option<MergeReport>,
    pub integrity: Option<IntegrityReport>,
    pub conflicts: Option<ConflictReport>,
    pub scoring: Option<ScoringReport>,
    pub communities: Option<usize>,
    pub gaps: Option<usize>,
    pub bridges: Option<usize>,
    pub ranked: Option<usize>,
    pub open_reviews: usize,
}

/// What a stage body hands back to the runner.
struct StageOutcome {
    records_processed: u64,
    notes: Option<String>,
    output: Vec<OutputRecord>,
}

impl StageOutcome {
    fn new(records_processed: u64, notes: impl Into<String>) -> Self {
        Self {
            records_processed,
            notes: Some(notes.into()),
            output: Vec::new(),
        }
    }
}

pub struct Pipeline<'a> {
    conn: &'a mut Connection,
    config: &'a ReconcileConfig,
    run_id: String,
    analysis: Option<GraphAnalysis>,
}

impl<'a> Pipeline<'a> {
    pub fn new(conn: &'a mut Connection, config: &'a ReconcileConfig) -> Self {
        Self {
            conn,
            config,
            run_id: Uuid::new_v4().to_string(),
            analysis: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Runs every stage of `plan`. Stops at the first failing stage.
    pub fn run(
        &mut self,
        plan: RunPlan,
        sources: &[SourceInput],
        sink: &mut dyn RecordSink,
    ) -> Result<PipelineSummary, PipelineError> {
        let mut summary = PipelineSummary {
            run_id: self.run_id.clone(),
            ..PipelineSummary::default()
        };
        info!(
            "event=pipeline_start module=pipeline status=ok run_id={} plan={:?} sources={}",
            self.run_id,
            plan,
            sources.len()
        );
        for stage in plan.stages() {
            match stage {
                Stage::Ingest => {
                    for source in sources {
                        self.ingest_source(source, &mut summary)?;
                    }
                }
                other => self.run_stage(*other, &mut summary, sink)?,
            }
        }

        let reviews = SqliteAuditRepository::new(self.conn).list_reviews(None)?;
        summary.open_reviews = reviews.len();
        for item in reviews {
            sink.emit(OutputRecord::ReviewItem(item))?;
        }
        sink.flush()?;
        info!(
            "event=pipeline_finish module=pipeline status=ok run_id={} open_reviews={}",
            self.run_id, summary.open_reviews
        );
        Ok(summary)
    }

    /// Ingests one source in its own stage transaction.
    pub fn ingest_source(
        &mut self,
        source: &SourceInput,
        summary: &mut PipelineSummary,
    ) -> Result<(), PipelineError> {
        let stage_name = format!("{}:{}", Stage::Ingest.as_str(), source.source_system());
        let batch = match source {
            SourceInput::Available(batch) => batch,
            SourceInput::Missing {
                source_system,
                reason,
            } => {
                let ledger = SqliteRunLedger::new(self.conn);
                let row = ledger.start_stage(&self.run_id, &stage_name)?;
                let note = format!("source unavailable, coverage reduced: {reason}");
                ledger.finish_stage(row, RunStatus::Completed, 0, Some(&note))?;
                warn!(
                    "event=source_missing module=pipeline status=warn run_id={} source={source_system} reason={reason}",
                    self.run_id
                );
                summary.missing_sources.push(source_system.clone());
                return Ok(());
            }
        };

        let config = self.config;
        let mut report = None;
        self.execute(&stage_name, |tx| {
            let mut aggregator = RelationshipAggregator::new(tx, config)?;
            aggregator.ingest_batch(batch)?;
            let ingest = aggregator.into_report();
            let outcome = StageOutcome::new(
                ingest.records_processed(),
                format!(
                    "entities={} skipped={} relationships_created={} corroborated={}",
                    ingest.entities_resolved,
                    ingest.entities_skipped,
                    ingest.relationships_created,
                    ingest.relationships_corroborated
                ),
            );
            report = Some(ingest);
            Ok(outcome)
        })?;
        if let Some(report) = report {
            summary.ingest.push((batch.source_system.clone(), report));
        }
        Ok(())
    }

    /// Runs one non-ingest stage and emits its output.
    pub fn run_stage(
        &mut self,
        stage: Stage,
        summary: &mut PipelineSummary,
        sink: &mut dyn RecordSink,
    ) -> Result<(), PipelineError> {
        let config = self.config;
        let output = match stage {
            Stage::Ingest => Vec::new(),
            Stage::Merge => self.execute(stage.as_str(), |tx| {
                let report = MergeEngine::new(tx, config.merge.clone()).run()?;
                let integrity = check_integrity(tx)?;
                if !integrity.is_sound() {
                    error!(
                        "event=integrity_check module=pipeline status=error orphaned={} self_loops={} duplicate_pairs={} dangling_resolutions={} unsourced={} stale_reviews={} stale_conflicts={}",
                        integrity.orphaned_relationships,
                        integrity.self_loops,
                        integrity.duplicate_pairs,
                        integrity.dangling_resolutions,
                        integrity.unsourced_relationships,
                        integrity.stale_reviews,
                        integrity.stale_conflicts
                    );
                    return Err(PipelineError::Integrity(integrity));
                }
                let notes = format!(
                    "batch_id={} merges={} noise_deleted={} noise_flagged={} renamed={} reviews_queued={} exact_name_duplicates={}",
                    report.batch_id,
                    report.merges,
                    report.noise_deleted,
                    report.noise_flagged,
                    report.renamed,
                    report.reviews_queued,
                    integrity.exact_name_duplicates
                );
                let outcome = StageOutcome::new(report.records_processed(), notes);
                summary.merge = Some(report);
                summary.integrity = Some(integrity);
                Ok(outcome)
            })?,
            Stage::Conflicts => self.execute(stage.as_str(), |tx| {
                let report = ConflictDetector::new(tx).run()?;
                let outcome = StageOutcome::new(
                    report.inserted,
                    format!("detected={} inserted={}", report.detected, report.inserted),
                );
                summary.conflicts = Some(report);
                Ok(outcome)
            })?,
            Stage::Scoring => self.execute(stage.as_str(), |tx| {
                let (report, scored) = CorroborationScorer::new(tx, &config.scoring).run()?;
                let mut outcome = StageOutcome::new(
                    report.scored,
                    format!(
                        "scored={} weak={} skipped_excluded={}",
                        report.scored, report.weak, report.skipped_excluded
                    ),
                );
                outcome.output = scored.into_iter().map(OutputRecord::ScoredRelationship).collect();
                summary.scoring = Some(report);
                Ok(outcome)
            })?,
            Stage::Analysis => {
                let mut analysis = None;
                let output = self.execute(stage.as_str(), |tx| {
                    let result = analyze_graph(tx, &config.analysis)?;
                    let mut outcome = StageOutcome::new(
                        result.graph.node_count() as u64,
                        format!(
                            "communities={} modularity={:.4} gaps={} bridges={}",
                            result.partition.communities,
                            result.partition.modularity,
                            result.gaps.len(),
                            result.bridges.len()
                        ),
                    );
                    outcome.output = result
                        .gaps
                        .iter()
                        .cloned()
                        .map(OutputRecord::StructuralGap)
                        .chain(result.bridges.iter().cloned().map(OutputRecord::CommunityBridge))
                        .collect();
                    summary.communities = Some(result.partition.communities);
                    summary.gaps = Some(result.gaps.len());
                    summary.bridges = Some(result.bridges.len());
                    analysis = Some(result);
                    Ok(outcome)
                })?;
                self.analysis = analysis;
                output
            }
            Stage::Ranking => {
                let cached = self.analysis.take();
                self.execute(stage.as_str(), |tx| {
                    let analysis = match cached {
                        Some(analysis) => analysis,
                        None => analyze_graph(tx, &config.analysis)?,
                    };
                    let signals = collect_signals(tx, &analysis.graph, &analysis.gaps, &analysis.bridges)?;
                    let ranked = rank(&signals);
                    let mut outcome = StageOutcome::new(ranked.len() as u64, format!("ranked={}", ranked.len()));
                    if let Some(top) = ranked.first() {
                        outcome.notes = Some(format!("ranked={} top={}", ranked.len(), top.entity_id));
                    }
                    summary.ranked = Some(ranked.len());
                    outcome.output = ranked.into_iter().map(OutputRecord::Priority).collect();
                    Ok(outcome)
                })?
            }
        };
        for record in output {
            sink.emit(record)?;
        }
        Ok(())
    }

    /// Runs `body` in an immediate transaction bracketed by ledger rows.
    fn execute<F>(&mut self, stage: &str, body: F) -> Result<Vec<OutputRecord>, PipelineError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<StageOutcome, PipelineError>,
    {
        let started_at = Instant::now();
        let row = SqliteRunLedger::new(self.conn).start_stage(&self.run_id, stage)?;
        info!(
            "event=stage_start module=pipeline status=ok run_id={} stage={stage}",
            self.run_id
        );

        let result = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(PipelineError::from)
            .and_then(|tx| {
                let outcome = body(&tx)?;
                tx.commit()?;
                Ok(outcome)
            });

        let ledger = SqliteRunLedger::new(self.conn);
        let duration_ms = started_at.elapsed().as_millis();
        match result {
            Ok(outcome) => {
                ledger.finish_stage(
                    row,
                    RunStatus::Completed,
                    outcome.records_processed,
                    outcome.notes.as_deref(),
                )?;
                info!(
                    "event=stage_finish module=pipeline status=ok run_id={} stage={stage} records={} duration_ms={duration_ms}",
                    self.run_id, outcome.records_processed
                );
                Ok(outcome.output)
            }
            Err(err) => {
                ledger.finish_stage(row, RunStatus::Failed, 0, Some(&err.to_string()))?;
                error!(
                    "event=stage_finish module=pipeline status=error run_id={} stage={stage} duration_ms={duration_ms} error={err}",
                    self.run_id
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RunPlan, Stage};

    #[test]
    fn plans_parse_and_order_stages() {
        assert_eq!(RunPlan::parse("cleanup-and-analysis"), Some(RunPlan::CleanupAndAnalysis));
        assert_eq!(RunPlan::parse("FULL"), Some(RunPlan::Full));
        assert_eq!(RunPlan::parse("nope"), None);
        assert_eq!(RunPlan::Full.stages().first(), Some(&Stage::Ingest));
        assert_eq!(RunPlan::AnalysisOnly.stages(), &[Stage::Scoring, Stage::Analysis, Stage::Ranking]);
    }
}
