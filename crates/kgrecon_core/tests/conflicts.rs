use kgrecon_core::db::open_db_in_memory;
use kgrecon_core::model::audit::{ConflictStatus, Severity, SubjectKind};
use kgrecon_core::repo::audit_repo::{AuditRepository, SqliteAuditRepository};
use kgrecon_core::repo::RepoError;
use kgrecon_core::service::adjudication::resolve_conflict;
use kgrecon_core::service::conflicts::ConflictDetector;
use kgrecon_core::{RawEntity, RawRelationship, ReconcileConfig, RelationshipAggregator};
use rusqlite::Connection;

#[test]
fn category_disagreements_are_flagged_with_severity() {
    let conn = open_db_in_memory().unwrap();
    categorize(&conn, "Sarah Kellen", &[("base", "associate"), ("court", "victim")]);
    categorize(&conn, "Adriana Ross", &[("base", "staff"), ("court", "pilot")]);
    categorize(&conn, "Doug Band", &[("base", "associate"), ("court", "other")]);
    categorize(&conn, "Larry Visoski", &[("base", "pilot"), ("court", "Pilot")]);

    let conflicts = ConflictDetector::new(&conn).category_conflicts().unwrap();
    assert_eq!(conflicts.len(), 2);

    let kellen = &conflicts[0];
    assert_eq!(kellen.subject_kind, SubjectKind::Entity);
    assert_eq!(kellen.field_name, "category");
    assert_eq!(
        (kellen.value_a.as_str(), kellen.value_b.as_str()),
        ("associate", "victim")
    );
    assert_eq!(kellen.severity, Severity::Medium);
    assert_eq!(conflicts[1].severity, Severity::Low);
}

#[test]
fn relationship_type_and_date_disagreements_are_flagged() {
    let conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(&conn, &config).unwrap();

    let mut flights = RawRelationship::new("Ghislaine Maxwell", "Sarah Kellen", "associate", "flights");
    flights.date = Some("1999-03-01".into());
    let mut court = flights.clone();
    court.source_system = "court".into();
    court.date = Some("2001-07-15".into());
    let mut staff = RawRelationship::new("Sarah Kellen", "Ghislaine Maxwell", "Employed_By", "emails");
    staff.date = Some("2002-01-01".into());
    aggregator.ingest_relationship(&flights).unwrap();
    aggregator.ingest_relationship(&court).unwrap();
    aggregator.ingest_relationship(&staff).unwrap();

    let conflicts = ConflictDetector::new(&conn).relationship_conflicts().unwrap();
    assert_eq!(conflicts.len(), 2);

    let date = conflicts.iter().find(|c| c.field_name == "date_start").unwrap();
    assert_eq!(date.subject_kind, SubjectKind::Relationship);
    assert_eq!(date.severity, Severity::Medium);
    assert_eq!(date.source_a, "court");
    assert_eq!(date.value_a, "2001-07-15");
    assert_eq!(date.source_b, "flights");

    let kind = conflicts
        .iter()
        .find(|c| c.field_name == "relationship_type")
        .unwrap();
    assert_eq!(kind.severity, Severity::Low);
    assert_eq!(kind.subject_id, date.subject_id);
    assert_eq!(
        (kind.source_a.as_str(), kind.value_a.as_str()),
        ("court", "associate")
    );
    assert_eq!(
        (kind.source_b.as_str(), kind.value_b.as_str()),
        ("emails", "employed_by")
    );
}

#[test]
fn detection_is_idempotent_and_never_reopens_adjudicated_conflicts() {
    let conn = open_db_in_memory().unwrap();
    categorize(&conn, "Sarah Kellen", &[("base", "associate"), ("court", "victim")]);

    let detector = ConflictDetector::new(&conn);
    let first = detector.run().unwrap();
    assert_eq!((first.detected, first.inserted), (1, 1));

    let audit = SqliteAuditRepository::new(&conn);
    let id = audit.list_conflicts(None).unwrap()[0].id.unwrap();
    resolve_conflict(&conn, id, ConflictStatus::ResolvedB, Some("court record wins")).unwrap();

    let second = detector.run().unwrap();
    assert_eq!((second.detected, second.inserted), (1, 0));

    let stored = audit.list_conflicts(None).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, ConflictStatus::ResolvedB);
    assert_eq!(stored[0].resolution_notes.as_deref(), Some("court record wins"));
    assert!(audit
        .list_conflicts(Some(ConflictStatus::Unresolved))
        .unwrap()
        .is_empty());
}

#[test]
fn adjudicating_an_unknown_conflict_fails() {
    let conn = open_db_in_memory().unwrap();

    let err = resolve_conflict(&conn, 42, ConflictStatus::ResolvedA, None).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
}

/// Resolves `name` once per (source, category) so each source records its
/// own category on the same entity.
fn categorize(conn: &Connection, name: &str, categories: &[(&str, &str)]) {
    let config = ReconcileConfig::default();
    let mut aggregator = RelationshipAggregator::new(conn, &config).unwrap();
    for (index, (source, category)) in categories.iter().enumerate() {
        let mut raw = RawEntity::new(name, *source);
        raw.category = Some((*category).to_string());
        aggregator.ingest_entity(&raw, index == 0).unwrap();
    }
}
