//! Canonical entity model.
//!
//! # Responsibility
//! - Define the one-record-per-referent entity shape and its typed metadata.
//! - Provide alias bookkeeping and metadata combination used by merges.
//!
//! # Invariants
//! - `aliases` never contains `display_name` (compared case-insensitively).
//! - `exclude_from_analysis` entities stay in the graph but are skipped by
//!   every analytical pass.

use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Kind of real-world referent a canonical entity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Aircraft,
    Property,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Aircraft,
        EntityType::Property,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Aircraft => "aircraft",
            Self::Property => "property",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "person" => Some(Self::Person),
            "organization" | "organisation" | "org" => Some(Self::Organization),
            "location" | "place" => Some(Self::Location),
            "aircraft" => Some(Self::Aircraft),
            "property" => Some(Self::Property),
            _ => None,
        }
    }

    /// Prefix used when minting canonical ids for this type.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Person => "PER",
            Self::Organization => "ORG",
            Self::Location => "LOC",
            Self::Aircraft => "AIR",
            Self::Property => "PROP",
        }
    }
}

/// Typed view of the open per-entity attribute mapping.
///
/// Well-known attributes get explicit fields; anything a source adds beyond
/// them lands in `extra` and survives round trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    /// Category as asserted by each source system, keyed by system tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_categories: BTreeMap<String, String>,
    /// Number of full-text corpus documents mentioning this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_document_count: Option<u64>,
    /// Number of source documents known to mention this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_mention_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_distance: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_systems: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityMetadata {
    /// Folds `other` into `self` using merge rules: numbers take the max,
    /// lists take the union, booleans OR, missing fields are inherited and
    /// conflicting strings keep `self`'s value.
    pub fn absorb(&mut self, other: &EntityMetadata) {
        if self.category.is_none() {
            self.category = other.category.clone();
        }
        if self.occupation.is_none() {
            self.occupation = other.occupation.clone();
        }
        for (system, category) in &other.source_categories {
            self.source_categories
                .entry(system.clone())
                .or_insert_with(|| category.clone());
        }
        self.corpus_document_count = max_opt(self.corpus_document_count, other.corpus_document_count);
        self.document_mention_count =
            max_opt(self.document_mention_count, other.document_mention_count);
        self.hop_distance = max_opt(self.hop_distance, other.hop_distance);
        for system in &other.source_systems {
            if !self.source_systems.contains(system) {
                self.source_systems.push(system.clone());
            }
        }
        for (key, value) in &other.extra {
            match self.extra.get_mut(key) {
                Some(existing) => combine_json(existing, value),
                None => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Records that `system` contributed to this entity, optionally with the
    /// category it asserted.
    pub fn note_source(&mut self, system: &str, category: Option<&str>) {
        if !self.source_systems.iter().any(|known| known == system) {
            self.source_systems.push(system.to_string());
        }
        if let Some(category) = category.map(str::trim).filter(|value| !value.is_empty()) {
            self.source_categories
                .entry(system.to_string())
                .or_insert_with(|| category.to_string());
            if self.category.is_none() {
                self.category = Some(category.to_string());
            }
        }
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn combine_json(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Number(current), Value::Number(other)) => {
            if let (Some(a), Some(b)) = (current.as_f64(), other.as_f64()) {
                if b > a {
                    *current = other.clone();
                }
            }
        }
        (Value::Array(items), Value::Array(other)) => {
            for item in other {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
        }
        (Value::Bool(current), Value::Bool(other)) => *current |= *other,
        (Value::Object(current), Value::Object(other)) => {
            for (key, value) in other {
                match current.get_mut(key) {
                    Some(slot) => combine_json(slot, value),
                    None => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot @ Value::Null, other) => *slot = other.clone(),
        _ => {}
    }
}

/// The single deduplicated record representing one real-world referent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub metadata: EntityMetadata,
    pub exclude_from_analysis: bool,
    pub exclude_reason: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl CanonicalEntity {
    pub fn new(id: EntityId, entity_type: EntityType, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type,
            display_name: display_name.into(),
            aliases: Vec::new(),
            metadata: EntityMetadata::default(),
            exclude_from_analysis: false,
            exclude_reason: None,
            first_seen: now,
            last_updated: now,
        }
    }

    /// Adds `alias` unless it is blank, already known, or equal to the
    /// display name. Returns whether the alias set changed.
    pub fn add_alias(&mut self, alias: &str) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || alias.to_lowercase() == self.display_name.to_lowercase() {
            return false;
        }
        let folded = alias.to_lowercase();
        if self
            .aliases
            .iter()
            .any(|known| known.to_lowercase() == folded)
        {
            return false;
        }
        self.aliases.push(alias.to_string());
        true
    }

    /// Replaces the display name, keeping the previous one as an alias.
    pub fn rename(&mut self, new_name: impl Into<String>) {
        let previous = std::mem::replace(&mut self.display_name, new_name.into());
        let folded = self.display_name.to_lowercase();
        self.aliases.retain(|alias| alias.to_lowercase() != folded);
        self.add_alias(&previous);
    }

    /// Every name this entity is known by: display name first, then aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.display_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}
