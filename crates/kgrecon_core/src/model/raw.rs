//! Uniform records emitted by ingestion adapters.

use super::entity::EntityType;
use super::relationship::EvidenceClass;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entity sighting as a source wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub name: String,
    #[serde(default)]
    pub type_hint: Option<EntityType>,
    #[serde(default)]
    pub source_id: Option<String>,
    pub source_system: String,
    /// Source-provided alternative spellings.
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Attributes merged into the entity's metadata on a match.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RawEntity {
    pub fn new(name: impl Into<String>, source_system: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: None,
            source_id: None,
            source_system: source_system.into(),
            variants: Vec::new(),
            category: None,
            metadata: Map::new(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.type_hint.unwrap_or(EntityType::Person)
    }
}

/// One relationship assertion as a source wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationship {
    pub source_name: String,
    pub target_name: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub date_end: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    pub source_system: String,
    #[serde(default)]
    pub document_refs: Vec<String>,
    #[serde(default)]
    pub source_type_hint: Option<EntityType>,
    #[serde(default)]
    pub target_type_hint: Option<EntityType>,
    #[serde(default)]
    pub evidence_class: Option<EvidenceClass>,
    #[serde(default)]
    pub source_confidence: Option<f64>,
    #[serde(default)]
    pub evidence_detail: Option<String>,
}

impl RawRelationship {
    pub fn new(
        source_name: impl Into<String>,
        target_name: impl Into<String>,
        relationship_type: impl Into<String>,
        source_system: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            target_name: target_name.into(),
            relationship_type: relationship_type.into(),
            subtype: None,
            date: None,
            date_end: None,
            weight: None,
            source_system: source_system.into(),
            document_refs: Vec::new(),
            source_type_hint: None,
            target_type_hint: None,
            evidence_class: None,
            source_confidence: None,
            evidence_detail: None,
        }
    }
}
