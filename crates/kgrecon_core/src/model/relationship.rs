//! Relationship and provenance model.
//!
//! # Responsibility
//! - Define typed edges and the per-source assertions backing them.
//!
//! # Invariants
//! - At most one live relationship per (unordered pair, type).
//! - No relationship connects an entity to itself.
//! - Every relationship has at least one `RelationshipSource`.

use super::EntityId;
use serde::{Deserialize, Serialize};

/// Coarse category of how an assertion was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceClass {
    Curated,
    Rdf,
    Cooccurrence,
    CorpusCooccurrence,
}

impl EvidenceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Curated => "curated",
            Self::Rdf => "rdf",
            Self::Cooccurrence => "cooccurrence",
            Self::CorpusCooccurrence => "corpus_cooccurrence",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "curated" => Some(Self::Curated),
            "rdf" => Some(Self::Rdf),
            "cooccurrence" => Some(Self::Cooccurrence),
            "corpus_cooccurrence" => Some(Self::CorpusCooccurrence),
            _ => None,
        }
    }
}

/// Orders two endpoint ids into the unordered storage key.
pub fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A typed edge between two canonical entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    pub relationship_type: String,
    pub subtype: Option<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub weight: Option<f64>,
    pub confidence_score: Option<f64>,
    pub weakly_corroborated: bool,
}

impl Relationship {
    /// Returns the endpoint opposite `id`, or `None` when `id` is not an
    /// endpoint.
    pub fn other_end(&self, id: &str) -> Option<&str> {
        if self.source_entity_id == id {
            Some(self.target_entity_id.as_str())
        } else if self.target_entity_id == id {
            Some(self.source_entity_id.as_str())
        } else {
            None
        }
    }
}

/// One source's assertion of a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSource {
    pub id: i64,
    pub relationship_id: i64,
    pub source_system: String,
    pub evidence_class: EvidenceClass,
    pub source_confidence: f64,
    pub evidence_detail: Option<String>,
    pub asserted_type: String,
    pub asserted_date_start: Option<String>,
    pub asserted_date_end: Option<String>,
    pub asserted_weight: Option<f64>,
    pub document_refs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::{pair_key, EvidenceClass};

    #[test]
    fn pair_key_is_order_insensitive() {
        assert_eq!(pair_key("PER-2", "PER-1"), ("PER-1", "PER-2"));
        assert_eq!(pair_key("PER-1", "PER-2"), ("PER-1", "PER-2"));
    }

    #[test]
    fn evidence_class_round_trips_through_db_text() {
        for class in [
            EvidenceClass::Curated,
            EvidenceClass::Rdf,
            EvidenceClass::Cooccurrence,
            EvidenceClass::CorpusCooccurrence,
        ] {
            assert_eq!(EvidenceClass::parse(class.as_str()), Some(class));
        }
    }
}
