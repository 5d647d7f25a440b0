use kgrecon_core::analysis::corroboration::{base_score, Corroboration};
use kgrecon_core::analysis::priority::{score_entity, EntitySignals};
use kgrecon_core::config::EvidenceWeights;
use kgrecon_core::model::audit::Severity;
use kgrecon_core::text::similarity::token_sort_ratio;
use kgrecon_core::{normalize, EvidenceClass, RelationshipSource};
use proptest::prelude::*;

fn raw_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z .,()'-]{0,40}",
        "[A-Z][a-z]{1,10}, [A-Z][a-z]{1,10}( [A-Z][a-z]{0,8}\\.?)?",
        "(Mr\\.|Ms\\.|Dr\\.|Sir) [A-Z][a-z]{1,10} [A-Z][a-z]{1,10}( Jr\\.| PhD)?",
    ]
}

fn evidence_class_strategy() -> impl Strategy<Value = EvidenceClass> {
    prop_oneof![
        Just(EvidenceClass::Curated),
        Just(EvidenceClass::Rdf),
        Just(EvidenceClass::CorpusCooccurrence),
        Just(EvidenceClass::Cooccurrence),
    ]
}

fn source_strategy() -> impl Strategy<Value = RelationshipSource> {
    (
        "[a-e]{1}",
        evidence_class_strategy(),
        prop::collection::vec("doc-[0-9]{1}", 0..3),
    )
        .prop_map(|(system, class, documents)| RelationshipSource {
            id: 0,
            relationship_id: 1,
            source_system: system,
            evidence_class: class,
            source_confidence: 1.0,
            evidence_detail: None,
            asserted_type: "associate".to_string(),
            asserted_date_start: None,
            asserted_date_end: None,
            asserted_weight: None,
            document_refs: documents,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn normalization_is_idempotent(name in raw_name_strategy()) {
        let once = normalize(&name);
        let twice = normalize(&once.full);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn similarity_is_symmetric_and_bounded(a in raw_name_strategy(), b in raw_name_strategy()) {
        let forward = token_sort_ratio(&a, &b);
        prop_assert_eq!(forward, token_sort_ratio(&b, &a));
        prop_assert!((0.0..=100.0).contains(&forward));
    }

    #[test]
    fn similarity_ignores_token_order(first in "[a-z]{2,8}", last in "[a-z]{2,8}") {
        let score = token_sort_ratio(&format!("{first} {last}"), &format!("{last}, {first}"));
        prop_assert_eq!(score, 100.0);
    }

    #[test]
    fn base_score_never_drops_with_more_evidence(systems in 1usize..6, documents in 0usize..8) {
        let score = base_score(systems, documents);
        prop_assert!(base_score(systems + 1, documents) >= score);
        prop_assert!(base_score(systems, documents + 1) >= score);
    }

    #[test]
    fn adding_a_source_never_lowers_the_score(
        sources in prop::collection::vec(source_strategy(), 1..6),
        extra in source_strategy(),
    ) {
        let weights = EvidenceWeights::default();
        let before = Corroboration::from_sources(&sources, &weights).score();
        let mut extended = sources.clone();
        extended.push(extra);
        let after = Corroboration::from_sources(&extended, &weights).score();
        prop_assert!((0.0..=1.0).contains(&before));
        prop_assert!(after >= before);
    }

    #[test]
    fn priority_factors_stay_within_their_caps(
        degree in 0u32..10_000,
        mentions in prop::option::of(0u64..100_000),
        documents_in_graph in 0u64..1_000,
        corpus in prop::option::of(0u64..100_000),
        weak in 0u32..100,
        gaps in 0u32..100,
        bridges in 0u32..20,
        conflicts in prop::collection::vec(
            prop_oneof![Just(Severity::Low), Just(Severity::Medium), Just(Severity::High)],
            0..6,
        ),
    ) {
        let factors = score_entity(&EntitySignals {
            entity_id: "PER-00001".to_string(),
            degree,
            document_mentions: mentions,
            documents_in_graph,
            corpus_documents: corpus,
            weak_relationships: weak,
            gap_involvements: gaps,
            bridge_communities: bridges,
            conflicts,
            ..EntitySignals::default()
        });
        prop_assert!(factors.prominence <= 20.0);
        prop_assert!(factors.document_coverage <= 30.0);
        prop_assert!(factors.corpus_disparity <= 25.0);
        prop_assert!(factors.weak_relationships <= 20.0);
        prop_assert!(factors.structural_gaps <= 25.0);
        prop_assert!(factors.community_bridges <= 15.0);
        prop_assert!(factors.contradictions <= 10.0);
        prop_assert!(factors.total() >= 0.0 && factors.total() <= 145.0);
    }
}
