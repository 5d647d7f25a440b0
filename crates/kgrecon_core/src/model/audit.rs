//! Audit, conflict and review records.
//!
//! # Invariants
//! - `MergeRecord` rows are permanent and append-only.
//! - A `Conflict` only leaves `Unresolved` through explicit adjudication.

use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Survivor id recorded for hard-deleted noise entities.
pub const NOISE_DELETED: &str = "NOISE_DELETED";

/// Audit of one merge engine decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub batch_id: String,
    pub survivor_id: String,
    pub absorbed_id: EntityId,
    pub absorbed_name: String,
    pub reason: String,
    pub match_key: Option<String>,
    pub relationships_repointed: u32,
    pub relationships_consolidated: u32,
    pub relationships_dropped: u32,
    pub resolutions_repointed: u32,
    pub survivor_degree_before: u32,
    pub survivor_degree_after: u32,
    pub merged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Unresolved,
    ResolvedA,
    ResolvedB,
    ResolvedMerged,
}

impl ConflictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::ResolvedA => "resolved_a",
            Self::ResolvedB => "resolved_b",
            Self::ResolvedMerged => "resolved_merged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unresolved" => Some(Self::Unresolved),
            "resolved_a" => Some(Self::ResolvedA),
            "resolved_b" => Some(Self::ResolvedB),
            "resolved_merged" => Some(Self::ResolvedMerged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Entity,
    Relationship,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Relationship => "relationship",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "entity" => Some(Self::Entity),
            "relationship" => Some(Self::Relationship),
            _ => None,
        }
    }
}

/// Flagged disagreement between two sources about one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Option<i64>,
    pub subject_kind: SubjectKind,
    /// Entity id, or relationship row id rendered as text.
    pub subject_id: String,
    pub field_name: String,
    pub source_a: String,
    pub value_a: String,
    pub source_b: String,
    pub value_b: String,
    pub severity: Severity,
    pub status: ConflictStatus,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    FuzzyNearMiss,
    LastnameAmbiguous,
}

impl ReviewKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FuzzyNearMiss => "fuzzy_near_miss",
            Self::LastnameAmbiguous => "lastname_ambiguous",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fuzzy_near_miss" => Some(Self::FuzzyNearMiss),
            "lastname_ambiguous" => Some(Self::LastnameAmbiguous),
            _ => None,
        }
    }
}

/// A decision the engine refused to make without a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: Option<i64>,
    pub kind: ReviewKind,
    pub subject_name: String,
    pub entity_a: EntityId,
    pub entity_b: EntityId,
    pub score: f64,
    pub runner_up_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One stage execution in the `pipeline_runs` ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: i64,
    pub run_id: String,
    pub stage: String,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub records_processed: u64,
    pub notes: Option<String>,
}
