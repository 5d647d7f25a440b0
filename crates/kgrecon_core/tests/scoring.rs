use kgrecon_core::analysis::corroboration::CorroborationScorer;
use kgrecon_core::config::ScoringConfig;
use kgrecon_core::db::open_db_in_memory;
use kgrecon_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use kgrecon_core::repo::relationship_repo::{
    NewRelationship, NewSource, RelationshipRepository, SqliteRelationshipRepository,
};
use kgrecon_core::{CanonicalEntity, EntityType, EvidenceClass, ReconcileConfig};
use rusqlite::Connection;

#[test]
fn scores_follow_corroboration_and_are_persisted() {
    let conn = open_db_in_memory().unwrap();
    insert(&conn, "PER-00001", "Ghislaine Maxwell");
    insert(&conn, "PER-00002", "Jean-Luc Brunel");
    insert(&conn, "PER-00003", "Nadia Marcinkova");

    let two_systems = link(&conn, "PER-00001", "PER-00002", "flights", EvidenceClass::Rdf, &[]);
    corroborate(&conn, two_systems, "ner", EvidenceClass::Cooccurrence, &[]);
    let well_documented = link(&conn, "PER-00001", "PER-00003", "court", EvidenceClass::Curated, &["d1", "d2"]);
    corroborate(&conn, well_documented, "emails", EvidenceClass::Rdf, &["d3", "d4"]);
    corroborate(&conn, well_documented, "flights", EvidenceClass::Rdf, &["d5"]);
    let mention = link(&conn, "PER-00002", "PER-00003", "ner", EvidenceClass::Cooccurrence, &[]);

    let config = ScoringConfig::default();
    let (report, scored) = CorroborationScorer::new(&conn, &config).run().unwrap();
    assert_eq!(report.scored, 3);
    assert_eq!(report.weak, 0);
    assert_eq!(scored.len(), 3);

    let repo = SqliteRelationshipRepository::new(&conn);
    let score = |id: i64| repo.get_relationship(id).unwrap().unwrap().confidence_score.unwrap();
    assert!((score(two_systems) - 0.6).abs() < 1e-9);
    assert_eq!(score(well_documented), 1.0);
    assert!((score(mention) - 0.1).abs() < 1e-9);

    let documented = scored
        .iter()
        .find(|edge| edge.relationship_id == well_documented)
        .unwrap();
    assert_eq!(documented.source_systems, 3);
    assert_eq!(documented.documents, 5);
    assert_eq!(documented.best_evidence_class, Some(EvidenceClass::Curated));
}

#[test]
fn single_source_edges_on_prominent_entities_are_weak() {
    let conn = open_db_in_memory().unwrap();
    insert(&conn, "PER-00001", "Ghislaine Maxwell");
    for index in 1..=20 {
        let org = format!("ORG-{index:05}");
        insert_org(&conn, &org, &format!("Holding Trust {index}"));
        link(&conn, "PER-00001", &org, "filings", EvidenceClass::Rdf, &[]);
    }
    insert(&conn, "PER-00002", "Sarah Kellen");
    let guessed = link(&conn, "PER-00001", "PER-00002", "ner", EvidenceClass::Cooccurrence, &[]);

    let config = ScoringConfig::default();
    let (report, scored) = CorroborationScorer::new(&conn, &config).run().unwrap();
    assert_eq!(report.scored, 21);
    assert_eq!(report.weak, 20);

    let cooccurrence = scored.iter().find(|edge| edge.relationship_id == guessed).unwrap();
    assert!(!cooccurrence.weakly_corroborated);
    let repo = SqliteRelationshipRepository::new(&conn);
    let weak_rows = repo
        .list_relationships()
        .unwrap()
        .into_iter()
        .filter(|relationship| relationship.weakly_corroborated)
        .count();
    assert_eq!(weak_rows, 20);
}

#[test]
fn prominence_threshold_is_configurable() {
    let conn = open_db_in_memory().unwrap();
    insert(&conn, "PER-00001", "Ghislaine Maxwell");
    insert(&conn, "PER-00002", "Sarah Kellen");
    link(&conn, "PER-00001", "PER-00002", "court", EvidenceClass::Curated, &[]);

    let config = ReconcileConfig::from_toml("[scoring]\nweak_prominence_min = 1\n").unwrap();
    let (report, scored) = CorroborationScorer::new(&conn, &config.scoring).run().unwrap();

    assert_eq!(report.weak, 1);
    assert!((scored[0].confidence_score - 0.3).abs() < 1e-9);
}

#[test]
fn edges_touching_excluded_entities_are_left_unscored() {
    let conn = open_db_in_memory().unwrap();
    insert(&conn, "PER-00001", "Ghislaine Maxwell");
    insert(&conn, "PER-00002", "Mary");
    insert(&conn, "PER-00003", "Sarah Kellen");
    let excluded = link(&conn, "PER-00001", "PER-00002", "flights", EvidenceClass::Rdf, &[]);
    link(&conn, "PER-00001", "PER-00003", "flights", EvidenceClass::Rdf, &[]);
    SqliteEntityRepository::new(&conn)
        .set_exclusion("PER-00002", "noise:standalone_first_name:mary")
        .unwrap();

    let config = ScoringConfig::default();
    let (report, scored) = CorroborationScorer::new(&conn, &config).run().unwrap();

    assert_eq!(report.scored, 1);
    assert_eq!(report.skipped_excluded, 1);
    assert!(scored.iter().all(|edge| edge.relationship_id != excluded));
    let untouched = SqliteRelationshipRepository::new(&conn)
        .get_relationship(excluded)
        .unwrap()
        .unwrap();
    assert_eq!(untouched.confidence_score, None);
}

fn insert(conn: &Connection, id: &str, name: &str) {
    SqliteEntityRepository::new(conn)
        .insert_entity(&CanonicalEntity::new(id.to_string(), EntityType::Person, name))
        .unwrap();
}

fn insert_org(conn: &Connection, id: &str, name: &str) {
    SqliteEntityRepository::new(conn)
        .insert_entity(&CanonicalEntity::new(id.to_string(), EntityType::Organization, name))
        .unwrap();
}

fn link(
    conn: &Connection,
    a: &str,
    b: &str,
    system: &str,
    class: EvidenceClass,
    documents: &[&str],
) -> i64 {
    let id = SqliteRelationshipRepository::new(conn)
        .insert_relationship(&NewRelationship {
            source_entity_id: a,
            target_entity_id: b,
            relationship_type: "associate",
            subtype: None,
        })
        .unwrap();
    corroborate(conn, id, system, class, documents);
    id
}

fn corroborate(conn: &Connection, id: i64, system: &str, class: EvidenceClass, documents: &[&str]) {
    let documents: Vec<String> = documents.iter().map(|doc| doc.to_string()).collect();
    SqliteRelationshipRepository::new(conn)
        .add_source(
            id,
            &NewSource {
                source_system: system,
                evidence_class: class,
                source_confidence: 1.0,
                evidence_detail: None,
                asserted_type: "associate",
                asserted_date_start: None,
                asserted_date_end: None,
                asserted_weight: None,
                document_refs: &documents,
            },
        )
        .unwrap();
}
