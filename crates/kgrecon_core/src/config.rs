//! Reconciliation tunables.
//!
//! # Responsibility
//! - Hold every empirically chosen threshold and weight as a named,
//!   overridable value with its default.
//! - Parse from TOML and reject out-of-range values.
//!
//! # Invariants
//! - A config returned by `from_toml` or `from_file` has passed `validate()`.
//! - Missing sections and fields fall back to defaults.

use crate::model::relationship::EvidenceClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Validation(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(message) => write!(f, "failed to parse config: {message}"),
            Self::Validation(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(_) | Self::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub resolver: ResolverConfig,
    pub merge: MergeConfig,
    pub scoring: ScoringConfig,
    pub analysis: AnalysisConfig,
    /// Default evidence class per source system, used when a raw
    /// relationship does not state its own.
    pub sources: BTreeMap<String, EvidenceClass>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Fuzzy acceptance score for names longer than `short_name_max_len`.
    pub long_name_threshold: f64,
    /// Fuzzy acceptance score for names of at most `short_name_max_len` chars.
    pub short_name_threshold: f64,
    pub short_name_max_len: usize,
    /// Near misses scoring at least this much are queued for review.
    pub review_floor: f64,
    pub short_form_confidence: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            long_name_threshold: 90.0,
            short_name_threshold: 95.0,
            short_name_max_len: 10,
            review_floor: 80.0,
            short_form_confidence: 0.9,
        }
    }
}

impl ResolverConfig {
    /// Fuzzy threshold for a normalized query of `len` characters.
    pub fn threshold_for(&self, len: usize) -> f64 {
        if len > self.short_name_max_len {
            self.long_name_threshold
        } else {
            self.short_name_threshold
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Noise entities at or below this degree are deleted, above it flagged.
    pub noise_degree_threshold: u32,
    pub jaccard_min: f64,
    /// Top candidate must beat the runner-up by this factor.
    pub jaccard_margin: f64,
    pub max_consolidation_rounds: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            noise_degree_threshold: 50,
            jaccard_min: 0.05,
            jaccard_margin: 1.5,
            max_consolidation_rounds: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceWeights {
    pub curated: f64,
    pub rdf: f64,
    pub corpus_cooccurrence: f64,
    pub cooccurrence: f64,
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            curated: 1.5,
            rdf: 1.0,
            corpus_cooccurrence: 0.9,
            cooccurrence: 0.5,
        }
    }
}

impl EvidenceWeights {
    pub fn weight(&self, class: EvidenceClass) -> f64 {
        match class {
            EvidenceClass::Curated => self.curated,
            EvidenceClass::Rdf => self.rdf,
            EvidenceClass::CorpusCooccurrence => self.corpus_cooccurrence,
            EvidenceClass::Cooccurrence => self.cooccurrence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub evidence_weights: EvidenceWeights,
    /// Minimum endpoint degree for a single-source edge to count as weak.
    pub weak_prominence_min: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            evidence_weights: EvidenceWeights::default(),
            weak_prominence_min: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub gap_min_degree: u32,
    pub gap_min_shared: u32,
    /// Keep only the strongest N candidates when set.
    pub gap_candidate_cap: Option<usize>,
    pub louvain_max_sweeps: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            gap_min_degree: 5,
            gap_min_shared: 3,
            gap_candidate_cap: None,
            louvain_max_sweeps: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconcileConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: ReconcileConfig =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Default evidence class configured for `source_system`.
    pub fn default_evidence_class(&self, source_system: &str) -> Option<EvidenceClass> {
        self.sources.get(source_system).copied()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let resolver = &self.resolver;
        for (name, value) in [
            ("resolver.long_name_threshold", resolver.long_name_threshold),
            ("resolver.short_name_threshold", resolver.short_name_threshold),
            ("resolver.review_floor", resolver.review_floor),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if resolver.review_floor > resolver.long_name_threshold.min(resolver.short_name_threshold) {
            return Err(ConfigError::Validation(
                "resolver.review_floor must not exceed the fuzzy thresholds".into(),
            ));
        }
        if !(0.0..=1.0).contains(&resolver.short_form_confidence) {
            return Err(ConfigError::Validation(format!(
                "resolver.short_form_confidence must be within 0..=1, got {}",
                resolver.short_form_confidence
            )));
        }

        let merge = &self.merge;
        if !(0.0..=1.0).contains(&merge.jaccard_min) {
            return Err(ConfigError::Validation(format!(
                "merge.jaccard_min must be within 0..=1, got {}",
                merge.jaccard_min
            )));
        }
        if merge.jaccard_margin < 1.0 {
            return Err(ConfigError::Validation(format!(
                "merge.jaccard_margin must be at least 1.0, got {}",
                merge.jaccard_margin
            )));
        }
        if merge.max_consolidation_rounds == 0 {
            return Err(ConfigError::Validation(
                "merge.max_consolidation_rounds must be positive".into(),
            ));
        }

        let weights = &self.scoring.evidence_weights;
        for (name, value) in [
            ("curated", weights.curated),
            ("rdf", weights.rdf),
            ("corpus_cooccurrence", weights.corpus_cooccurrence),
            ("cooccurrence", weights.cooccurrence),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "scoring.evidence_weights.{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.analysis.louvain_max_sweeps == 0 {
            return Err(ConfigError::Validation(
                "analysis.louvain_max_sweeps must be positive".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ReconcileConfig};
    use crate::model::relationship::EvidenceClass;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ReconcileConfig::from_toml("").unwrap();
        assert_eq!(config, ReconcileConfig::default());
        assert_eq!(config.merge.noise_degree_threshold, 50);
        assert_eq!(config.scoring.evidence_weights.curated, 1.5);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config = ReconcileConfig::from_toml(
            r#"
            [merge]
            jaccard_margin = 2.0

            [scoring.evidence_weights]
            cooccurrence = 0.4

            [sources]
            flight_logs = "curated"
            "#,
        )
        .unwrap();
        assert_eq!(config.merge.jaccard_margin, 2.0);
        assert_eq!(config.merge.jaccard_min, 0.05);
        assert_eq!(config.scoring.evidence_weights.cooccurrence, 0.4);
        assert_eq!(config.scoring.evidence_weights.rdf, 1.0);
        assert_eq!(
            config.default_evidence_class("flight_logs"),
            Some(EvidenceClass::Curated)
        );
    }

    #[test]
    fn threshold_depends_on_length() {
        let config = ReconcileConfig::default();
        assert_eq!(config.resolver.threshold_for(10), 95.0);
        assert_eq!(config.resolver.threshold_for(11), 90.0);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = ReconcileConfig::from_toml("[merge]\njaccard_margin = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = ReconcileConfig::from_toml("[resolver]\nlong_name_threshold = 120.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = ReconcileConfig::from_toml("[scoring.evidence_weights]\nrdf = -1.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
