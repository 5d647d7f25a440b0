//! Entity resolver: the matching hierarchy.
//!
//! # Responsibility
//! - Map a raw name plus source tag to one canonical entity id.
//! - Append exactly one `ResolutionRecord` per resolution, whichever tier
//!   decided it.
//! - Queue fuzzy near misses for manual review instead of merging them.
//!
//! # Invariants
//! - Tiers run in a fixed order and the first success wins:
//!   exact display name, alias, fuzzy, short form, then a new entity.
//! - Fuzzy acceptance is length-adjusted and never applies to numbered
//!   placeholders on either side.
//! - Each tier is a pure function of the query and the in-memory name
//!   index, so tiers are testable in isolation.

use crate::config::ResolverConfig;
use crate::model::audit::{ReviewItem, ReviewKind};
use crate::model::entity::{CanonicalEntity, EntityType};
use crate::model::raw::RawEntity;
use crate::model::resolution::{MatchDetails, MatchMethod, ResolutionRecord};
use crate::model::EntityId;
use crate::repo::audit_repo::{AuditRepository, SqliteAuditRepository};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::resolution_repo::{ResolutionLog, SqliteResolutionLog};
use crate::repo::{RepoError, RepoResult};
use crate::text::noise::is_numbered_placeholder;
use crate::text::normalize::{normalize, NormalForm};
use crate::text::similarity::{ratio, sorted_token_form};
use chrono::Utc;
use log::{debug, info};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

const EXACT_CONFIDENCE: f64 = 1.0;
const ALIAS_CONFIDENCE: f64 = 0.95;

#[derive(Debug)]
pub enum ResolveError {
    EmptyName,
    Repo(RepoError),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "cannot resolve an empty name"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EmptyName => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for ResolveError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Outcome of one resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub canonical_id: EntityId,
    pub method: MatchMethod,
    pub confidence: f64,
    /// Whether this resolution minted a new canonical entity.
    pub created: bool,
}

/// A tier's positive decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entity_id: EntityId,
    pub method: MatchMethod,
    pub confidence: f64,
    pub details: MatchDetails,
}

/// Best fuzzy candidate regardless of threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyHit {
    pub entity_id: EntityId,
    pub matched_name: String,
    pub score: f64,
}

/// Precomputed view of one raw name, shared by every tier.
#[derive(Debug, Clone)]
pub struct Query {
    pub written: String,
    pub form: NormalForm,
    /// Lowercased lookup keys: the name as written and its normalized form.
    pub keys: Vec<String>,
    pub threshold: f64,
    pub placeholder: bool,
    pub fuzzy_best: Option<FuzzyHit>,
}

impl Query {
    pub fn new(written: &str, index: &NameIndex, config: &ResolverConfig) -> Self {
        let form = normalize(written);
        let mut keys = vec![written.to_lowercase()];
        let normalized_key = form.full.to_lowercase();
        if !normalized_key.is_empty() && !keys.contains(&normalized_key) {
            keys.push(normalized_key);
        }
        let placeholder = is_numbered_placeholder(written);
        let fuzzy_best = if placeholder {
            None
        } else {
            index.best_fuzzy(&sorted_token_form(&form.full))
        };
        Self {
            written: written.to_string(),
            threshold: config.threshold_for(form.full.chars().count()),
            form,
            keys,
            placeholder,
            fuzzy_best,
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedName {
    entity_id: EntityId,
    name: String,
    sorted: String,
    from_display: bool,
}

/// In-memory lookup structures for one entity type.
#[derive(Debug, Default)]
pub struct NameIndex {
    display: HashMap<String, EntityId>,
    aliases: HashMap<String, EntityId>,
    /// Lowercased short form -> (entity id, lowercased first token).
    short_keys: HashMap<String, Vec<(EntityId, String)>>,
    pool: Vec<IndexedName>,
    seen: HashSet<(EntityId, String)>,
}

impl NameIndex {
    /// Indexes every name of `entity` not indexed yet.
    pub fn insert(&mut self, entity: &CanonicalEntity) {
        for (position, name) in entity.names().enumerate() {
            let from_display = position == 0;
            let folded = name.to_lowercase();
            if !self.seen.insert((entity.id.clone(), folded.clone())) {
                continue;
            }
            let form = normalize(name);
            let normalized = form.full.to_lowercase();

            if from_display {
                self.display
                    .entry(folded.clone())
                    .or_insert_with(|| entity.id.clone());
            } else {
                self.aliases
                    .entry(folded.clone())
                    .or_insert_with(|| entity.id.clone());
            }
            if !normalized.is_empty() && normalized != folded {
                self.aliases
                    .entry(normalized.clone())
                    .or_insert_with(|| entity.id.clone());
            }
            if let (Some(short), Some(first)) = (form.short.as_ref(), first_token(&normalized)) {
                let slot = self.short_keys.entry(short.to_lowercase()).or_default();
                if !slot.iter().any(|(id, token)| id == &entity.id && token == &first) {
                    slot.push((entity.id.clone(), first));
                }
            }
            if !is_numbered_placeholder(name) {
                self.pool.push(IndexedName {
                    entity_id: entity.id.clone(),
                    name: name.to_string(),
                    sorted: sorted_token_form(&form.full),
                    from_display,
                });
            }
        }
    }

    /// Highest-scoring pool entry; ties prefer display names, then the
    /// smallest entity id.
    pub fn best_fuzzy(&self, query_sorted: &str) -> Option<FuzzyHit> {
        let mut best: Option<(f64, &IndexedName)> = None;
        for entry in &self.pool {
            let score = ratio(query_sorted, &entry.sorted);
            if score <= 0.0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_score, current)) => {
                    score > best_score
                        || (score == best_score
                            && (entry.from_display, std::cmp::Reverse(&entry.entity_id))
                                > (current.from_display, std::cmp::Reverse(&current.entity_id)))
                }
            };
            if better {
                best = Some((score, entry));
            }
        }
        best.map(|(score, entry)| FuzzyHit {
            entity_id: entry.entity_id.clone(),
            matched_name: entry.name.clone(),
            score,
        })
    }
}

fn first_token(value: &str) -> Option<String> {
    value
        .split_whitespace()
        .next()
        .map(|token| token.trim_end_matches('.').to_string())
        .filter(|token| !token.is_empty())
}

/// A tier of the matching hierarchy.
pub type Rule = fn(&Query, &NameIndex, &ResolverConfig) -> Option<Candidate>;

/// Tiers in evaluation order.
pub const RULES: &[Rule] = &[exact_rule, alias_rule, fuzzy_rule, short_form_rule];

/// Case-insensitive match against a display name.
pub fn exact_rule(query: &Query, index: &NameIndex, _config: &ResolverConfig) -> Option<Candidate> {
    query.keys.iter().find_map(|key| {
        index.display.get(key).map(|id| Candidate {
            entity_id: id.clone(),
            method: MatchMethod::Exact,
            confidence: EXACT_CONFIDENCE,
            details: MatchDetails {
                matched_name: Some(key.clone()),
                normalized: Some(query.form.full.clone()),
                ..MatchDetails::default()
            },
        })
    })
}

/// Case-insensitive match against any alias or normalized name.
pub fn alias_rule(query: &Query, index: &NameIndex, _config: &ResolverConfig) -> Option<Candidate> {
    query.keys.iter().find_map(|key| {
        index.aliases.get(key).map(|id| Candidate {
            entity_id: id.clone(),
            method: MatchMethod::Alias,
            confidence: ALIAS_CONFIDENCE,
            details: MatchDetails {
                matched_name: Some(key.clone()),
                normalized: Some(query.form.full.clone()),
                ..MatchDetails::default()
            },
        })
    })
}

/// Best token-sorted similarity, accepted only at or above the
/// length-adjusted threshold.
pub fn fuzzy_rule(query: &Query, _index: &NameIndex, _config: &ResolverConfig) -> Option<Candidate> {
    let hit = query.fuzzy_best.as_ref()?;
    if hit.score < query.threshold {
        return None;
    }
    Some(Candidate {
        entity_id: hit.entity_id.clone(),
        method: MatchMethod::Fuzzy,
        confidence: hit.score / 100.0,
        details: MatchDetails {
            matched_name: Some(hit.matched_name.clone()),
            normalized: Some(query.form.full.clone()),
            score: Some(hit.score),
            threshold: Some(query.threshold),
            ..MatchDetails::default()
        },
    })
}

/// First-initial + last-token key, accepted only when exactly one entity
/// carries it with a prefix-compatible first name (`Jeff` ~ `Jeffrey`).
pub fn short_form_rule(query: &Query, index: &NameIndex, config: &ResolverConfig) -> Option<Candidate> {
    if query.placeholder {
        return None;
    }
    let short = query.form.short.as_ref()?;
    let query_first = first_token(&query.form.full.to_lowercase())?;
    let slot = index.short_keys.get(&short.to_lowercase())?;
    let matches: BTreeSet<&EntityId> = slot
        .iter()
        .filter(|(_, first)| first.starts_with(&query_first) || query_first.starts_with(first.as_str()))
        .map(|(id, _)| id)
        .collect();
    if matches.len() != 1 {
        return None;
    }
    let entity_id = matches.into_iter().next()?.clone();
    Some(Candidate {
        entity_id,
        method: MatchMethod::Alias,
        confidence: config.short_form_confidence,
        details: MatchDetails {
            normalized: Some(query.form.full.clone()),
            short_form: Some(short.clone()),
            note: Some("short_form".to_string()),
            ..MatchDetails::default()
        },
    })
}

/// Resolves raw names against the canonical store.
pub struct EntityResolver<'conn> {
    conn: &'conn Connection,
    config: ResolverConfig,
    indexes: HashMap<EntityType, NameIndex>,
}

impl<'conn> EntityResolver<'conn> {
    /// Builds the name indexes from every stored entity.
    pub fn load(conn: &'conn Connection, config: ResolverConfig) -> RepoResult<Self> {
        let mut indexes: HashMap<EntityType, NameIndex> = HashMap::new();
        for entity in SqliteEntityRepository::new(conn).list_entities(None)? {
            indexes.entry(entity.entity_type).or_default().insert(&entity);
        }
        Ok(Self {
            conn,
            config,
            indexes,
        })
    }

    /// Resolves a record from a regular source through the full hierarchy.
    pub fn resolve(&mut self, raw: &RawEntity) -> Result<Resolution, ResolveError> {
        self.resolve_with(raw, false)
    }

    /// Seeds the canonical base: only exact duplicates inside the base
    /// collapse, everything else becomes a new entity with method `base`.
    pub fn seed_base(&mut self, raw: &RawEntity) -> Result<Resolution, ResolveError> {
        self.resolve_with(raw, true)
    }

    fn resolve_with(&mut self, raw: &RawEntity, base: bool) -> Result<Resolution, ResolveError> {
        let written = raw.name.split_whitespace().collect::<Vec<_>>().join(" ");
        if written.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        let entity_type = raw.entity_type();
        let index = self.indexes.entry(entity_type).or_default();
        let query = Query::new(&written, index, &self.config);

        let decision = if base {
            exact_rule(&query, index, &self.config).map(|candidate| Candidate {
                method: MatchMethod::Base,
                ..candidate
            })
        } else {
            RULES
                .iter()
                .find_map(|rule| rule(&query, index, &self.config))
        };

        match decision {
            Some(candidate) => self.attach(raw, &query, candidate),
            None => self.create(raw, &query, base),
        }
    }

    fn attach(
        &mut self,
        raw: &RawEntity,
        query: &Query,
        candidate: Candidate,
    ) -> Result<Resolution, ResolveError> {
        let entities = SqliteEntityRepository::new(self.conn);
        let mut entity = entities
            .get_entity(&candidate.entity_id)?
            .ok_or_else(|| RepoError::NotFound(format!("entity {}", candidate.entity_id)))?;

        let mut changed = entity.add_alias(&query.written);
        for variant in &raw.variants {
            changed |= entity.add_alias(variant);
        }
        changed |= enrich_metadata(&mut entity, raw);
        if changed {
            entities.update_entity(&entity)?;
            self.index_for(entity.entity_type).insert(&entity);
        }

        self.append_record(raw, &entity, candidate.method, candidate.confidence, candidate.details)?;
        debug!(
            "event=entity_resolved module=resolver status=ok method={} canonical_id={} source={}",
            candidate.method.as_str(),
            entity.id,
            raw.source_system
        );
        Ok(Resolution {
            canonical_id: entity.id,
            method: candidate.method,
            confidence: candidate.confidence,
            created: false,
        })
    }

    fn create(&mut self, raw: &RawEntity, query: &Query, base: bool) -> Result<Resolution, ResolveError> {
        let entities = SqliteEntityRepository::new(self.conn);
        let entity_type = raw.entity_type();
        let display = if query.form.is_empty() {
            query.written.clone()
        } else {
            query.form.full.clone()
        };
        let mut entity = CanonicalEntity::new(entities.next_id(entity_type)?, entity_type, display);
        entity.add_alias(&query.written);
        for variant in &raw.variants {
            entity.add_alias(variant);
        }
        enrich_metadata(&mut entity, raw);
        entities.insert_entity(&entity)?;
        self.index_for(entity_type).insert(&entity);

        let method = if base { MatchMethod::Base } else { MatchMethod::New };
        let details = MatchDetails {
            normalized: Some(query.form.full.clone()),
            score: query.fuzzy_best.as_ref().map(|hit| hit.score),
            ..MatchDetails::default()
        };
        self.append_record(raw, &entity, method, EXACT_CONFIDENCE, details)?;

        if !base {
            self.queue_near_miss(query, &entity)?;
        }
        debug!(
            "event=entity_created module=resolver status=ok method={} canonical_id={} source={}",
            method.as_str(),
            entity.id,
            raw.source_system
        );
        Ok(Resolution {
            canonical_id: entity.id,
            method,
            confidence: EXACT_CONFIDENCE,
            created: true,
        })
    }

    fn queue_near_miss(&self, query: &Query, created: &CanonicalEntity) -> RepoResult<()> {
        let Some(hit) = query.fuzzy_best.as_ref() else {
            return Ok(());
        };
        if hit.score < self.config.review_floor || hit.score >= query.threshold {
            return Ok(());
        }
        let queued = SqliteAuditRepository::new(self.conn).enqueue_review(&ReviewItem {
            id: None,
            kind: ReviewKind::FuzzyNearMiss,
            subject_name: query.written.clone(),
            entity_a: created.id.clone(),
            entity_b: hit.entity_id.clone(),
            score: hit.score,
            runner_up_score: None,
        })?;
        if queued {
            info!(
                "event=review_enqueued module=resolver status=ok kind=fuzzy_near_miss entity_a={} entity_b={} score={:.1} threshold={:.1}",
                created.id, hit.entity_id, hit.score, query.threshold
            );
        }
        Ok(())
    }

    fn append_record(
        &self,
        raw: &RawEntity,
        entity: &CanonicalEntity,
        method: MatchMethod,
        confidence: f64,
        details: MatchDetails,
    ) -> RepoResult<i64> {
        SqliteResolutionLog::new(self.conn).append(&ResolutionRecord {
            id: None,
            source_system: raw.source_system.clone(),
            source_local_id: raw.source_id.clone(),
            source_name_as_written: raw.name.clone(),
            entity_type: entity.entity_type,
            canonical_id: Some(entity.id.clone()),
            tombstoned_id: None,
            method,
            confidence,
            details,
            created_at: Utc::now(),
        })
    }

    fn index_for(&mut self, entity_type: EntityType) -> &mut NameIndex {
        self.indexes.entry(entity_type).or_default()
    }
}

/// Folds source attributes into the entity. Returns whether anything changed.
fn enrich_metadata(entity: &mut CanonicalEntity, raw: &RawEntity) -> bool {
    let before = entity.metadata.clone();
    entity
        .metadata
        .note_source(&raw.source_system, raw.category.as_deref());
    if !raw.metadata.is_empty() {
        match serde_json::from_value(Value::Object(raw.metadata.clone())) {
            Ok(incoming) => entity.metadata.absorb(&incoming),
            Err(err) => debug!(
                "event=metadata_skipped module=resolver status=warn canonical_id={} error={err}",
                entity.id
            ),
        }
    }
    entity.metadata != before
}
