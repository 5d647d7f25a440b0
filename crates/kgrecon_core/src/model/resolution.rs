//! Resolution audit model.
//!
//! # Invariants
//! - One `ResolutionRecord` per raw source record, never mutated except for
//!   merge repointing of `canonical_id`.
//! - A noise-deleted target leaves `canonical_id = None` and keeps the old
//!   id in `tombstoned_id`.

use super::entity::EntityType;
use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tier of the matching hierarchy produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Base,
    Exact,
    Alias,
    Fuzzy,
    New,
    Manual,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Exact => "exact",
            Self::Alias => "alias",
            Self::Fuzzy => "fuzzy",
            Self::New => "new",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base" => Some(Self::Base),
            "exact" => Some(Self::Exact),
            "alias" => Some(Self::Alias),
            "fuzzy" => Some(Self::Fuzzy),
            "new" => Some(Self::New),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Structured explanation stored in `entity_resolution_log.details`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    /// Which stored name the query matched (display name or alias).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_name: Option<String>,
    /// Normalized query form used for comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_form: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Append-only audit row for one resolution decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub id: Option<i64>,
    pub source_system: String,
    pub source_local_id: Option<String>,
    pub source_name_as_written: String,
    pub entity_type: EntityType,
    pub canonical_id: Option<EntityId>,
    pub tombstoned_id: Option<EntityId>,
    pub method: MatchMethod,
    pub confidence: f64,
    pub details: MatchDetails,
    pub created_at: DateTime<Utc>,
}
