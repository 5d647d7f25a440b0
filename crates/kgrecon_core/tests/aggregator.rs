use kgrecon_core::db::open_db_in_memory;
use kgrecon_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use kgrecon_core::repo::relationship_repo::{RelationshipRepository, SqliteRelationshipRepository};
use kgrecon_core::service::aggregator::AssertionOutcome;
use kgrecon_core::{
    EntityType, EvidenceClass, RawEntity, RawRelationship, ReconcileConfig, RelationshipAggregator,
    SourceBatch,
};

#[test]
fn repeated_assertions_from_different_sources_corroborate_one_edge() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    let first = aggregator
        .ingest_relationship(&relationship("Ghislaine Maxwell", "Jean-Luc Brunel", "flights"))
        .unwrap();
    let second = aggregator
        .ingest_relationship(&relationship("Jean-Luc Brunel", "GHISLAINE MAXWELL", "emails"))
        .unwrap();

    let AssertionOutcome::Created(id) = first else {
        panic!("expected a new edge, got {first:?}");
    };
    assert_eq!(second, AssertionOutcome::Corroborated(id));

    let repo = SqliteRelationshipRepository::new(&conn);
    assert_eq!(repo.count_relationships().unwrap(), 1);
    let sources = repo.list_sources(id).unwrap();
    let systems: Vec<&str> = sources.iter().map(|source| source.source_system.as_str()).collect();
    assert_eq!(systems, vec!["flights", "emails"]);

    let report = aggregator.report();
    assert_eq!(report.relationships_created, 1);
    assert_eq!(report.relationships_corroborated, 1);
}

#[test]
fn different_types_between_one_pair_stay_separate_edges() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    let mut employed = relationship("Sarah Kellen", "Ghislaine Maxwell", "court");
    employed.relationship_type = "Employed_By".into();
    aggregator
        .ingest_relationship(&relationship("Sarah Kellen", "Ghislaine Maxwell", "court"))
        .unwrap();
    aggregator.ingest_relationship(&employed).unwrap();

    let relationships = SqliteRelationshipRepository::new(&conn)
        .list_relationships()
        .unwrap();
    assert_eq!(relationships.len(), 2);
    assert_eq!(relationships[1].relationship_type, "employed_by");
}

#[test]
fn self_referencing_assertions_are_skipped() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    aggregator
        .ingest_entity(&RawEntity::new("Jeffrey Epstein", "base"), true)
        .unwrap();
    let outcome = aggregator
        .ingest_relationship(&relationship("Jeffrey Epstein", "Jeff Epstein", "emails"))
        .unwrap();

    assert_eq!(outcome, AssertionOutcome::SkippedSelfLoop);
    assert_eq!(
        SqliteRelationshipRepository::new(&conn)
            .count_relationships()
            .unwrap(),
        0
    );
    assert_eq!(aggregator.report().relationships_skipped, 1);
}

#[test]
fn non_entity_endpoints_are_dropped_before_resolution() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    let outcome = aggregator
        .ingest_relationship(&relationship(
            "Ghislaine Maxwell",
            "https://example.org/profile",
            "web",
        ))
        .unwrap();

    assert_eq!(outcome, AssertionOutcome::SkippedNonEntity);
    let report = aggregator.report();
    assert_eq!(report.entities_skipped, 1);
    assert_eq!(report.relationships_skipped, 1);
    assert_eq!(
        SqliteEntityRepository::new(&conn).count_entities().unwrap(),
        1
    );
}

#[test]
fn edge_attributes_follow_the_most_confident_source() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    let mut weak = relationship("Leon Black", "Apollo Global", "emails");
    weak.target_type_hint = Some(EntityType::Organization);
    weak.date = Some("2012-01-01".into());
    weak.source_confidence = Some(0.4);
    let mut strong = weak.clone();
    strong.source_system = "filings".into();
    strong.date = Some("2011-06-30".into());
    strong.weight = Some(3.0);
    strong.source_confidence = Some(0.95);

    aggregator.ingest_relationship(&weak).unwrap();
    let AssertionOutcome::Corroborated(id) = aggregator.ingest_relationship(&strong).unwrap() else {
        panic!("second assertion should corroborate");
    };

    let edge = SqliteRelationshipRepository::new(&conn)
        .get_relationship(id)
        .unwrap()
        .unwrap();
    assert_eq!(edge.date_start.as_deref(), Some("2011-06-30"));
    assert_eq!(edge.weight, Some(3.0));
}

#[test]
fn evidence_class_falls_back_to_source_default_then_cooccurrence() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::from_toml("[sources]\nflight_logs = \"curated\"\n").unwrap();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    let AssertionOutcome::Created(curated) = aggregator
        .ingest_relationship(&relationship("Ghislaine Maxwell", "Sarah Kellen", "flight_logs"))
        .unwrap()
    else {
        panic!("expected a new edge");
    };
    let AssertionOutcome::Created(guessed) = aggregator
        .ingest_relationship(&relationship("Ghislaine Maxwell", "Nadia Marcinkova", "ner"))
        .unwrap()
    else {
        panic!("expected a new edge");
    };

    let repo = SqliteRelationshipRepository::new(&conn);
    assert_eq!(
        repo.list_sources(curated).unwrap()[0].evidence_class,
        EvidenceClass::Curated
    );
    assert_eq!(
        repo.list_sources(guessed).unwrap()[0].evidence_class,
        EvidenceClass::Cooccurrence
    );
}

#[test]
fn batches_resolve_entities_before_relationships() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    let mut org = RawEntity::new("Apollo Global", "filings");
    org.type_hint = Some(EntityType::Organization);
    let mut link = relationship("Leon Black", "Apollo Global", "filings");
    link.target_type_hint = Some(EntityType::Organization);
    aggregator
        .ingest_batch(&SourceBatch {
            source_system: "filings".into(),
            is_base: false,
            entities: vec![RawEntity::new("Leon Black", "filings"), org],
            relationships: vec![link],
        })
        .unwrap();

    let report = aggregator.into_report();
    assert_eq!(report.entities_resolved, 2);
    assert_eq!(report.methods["new"], 2);
    assert_eq!(report.relationships_created, 1);
}

fn relationship(source: &str, target: &str, system: &str) -> RawRelationship {
    RawRelationship::new(source, target, "associate", system)
}
