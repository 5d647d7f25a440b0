use kgrecon_core::analysis::analyze_graph;
use kgrecon_core::analysis::priority::{collect_signals, rank};
use kgrecon_core::config::AnalysisConfig;
use kgrecon_core::db::open_db_in_memory;
use kgrecon_core::model::audit::{Conflict, ConflictStatus, Severity, SubjectKind};
use kgrecon_core::repo::audit_repo::{AuditRepository, SqliteAuditRepository};
use kgrecon_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use kgrecon_core::repo::relationship_repo::{
    NewRelationship, NewSource, RelationshipRepository, SqliteRelationshipRepository,
};
use kgrecon_core::service::adjudication::resolve_conflict;
use kgrecon_core::{CanonicalEntity, EntityType, EvidenceClass};
use rusqlite::Connection;

#[test]
fn excluded_entities_never_reach_the_live_graph() {
    let conn = two_clusters_and_a_gap();

    let analysis = analyze_graph(&conn, &AnalysisConfig::default()).unwrap();

    assert_eq!(analysis.graph.node_count(), 18);
    assert!(analysis.graph.neighbors("PER-X").is_none());
    assert_eq!(analysis.graph.degree("PER-A1"), 5);
    assert!(!analysis.partition.membership.contains_key("PER-X"));
    assert!(analysis.bridges.iter().all(|bridge| bridge.entity_id != "PER-X"));
}

#[test]
fn dense_clusters_form_communities_joined_by_a_bridge() {
    let conn = two_clusters_and_a_gap();

    let analysis = analyze_graph(&conn, &AnalysisConfig::default()).unwrap();
    let membership = &analysis.partition.membership;

    let cluster_a = membership["PER-A1"];
    let cluster_b = membership["PER-B1"];
    assert_ne!(cluster_a, cluster_b);
    for index in 2..=5 {
        assert_eq!(membership[&format!("PER-A{index}")], cluster_a);
        assert_eq!(membership[&format!("PER-B{index}")], cluster_b);
    }
    assert!(analysis.partition.communities >= 3);
    assert!(analysis.partition.modularity > 0.0);

    let hub = analysis
        .bridges
        .iter()
        .find(|bridge| bridge.entity_id == "PER-H")
        .unwrap();
    assert_eq!(hub.communities_spanned, 2);
}

#[test]
fn well_connected_strangers_with_shared_neighbors_are_gaps() {
    let conn = two_clusters_and_a_gap();

    let analysis = analyze_graph(&conn, &AnalysisConfig::default()).unwrap();

    assert_eq!(analysis.gaps.len(), 1);
    let gap = &analysis.gaps[0];
    assert_eq!((gap.entity_a.as_str(), gap.entity_b.as_str()), ("PER-G1", "PER-G2"));
    assert_eq!(gap.shared_neighbors, 5);
    assert_eq!(gap.combined_degree, 10);

    let strict = AnalysisConfig {
        gap_min_shared: 6,
        ..AnalysisConfig::default()
    };
    assert!(analyze_graph(&conn, &strict).unwrap().gaps.is_empty());
}

#[test]
fn ranking_reflects_signals_and_only_unresolved_conflicts() {
    let conn = two_clusters_and_a_gap();
    let inserted = SqliteAuditRepository::new(&conn)
        .insert_conflict(&Conflict {
            id: None,
            subject_kind: SubjectKind::Entity,
            subject_id: "PER-G2".into(),
            field_name: "category".into(),
            source_a: "base".into(),
            value_a: "associate".into(),
            source_b: "court".into(),
            value_b: "victim".into(),
            severity: Severity::Medium,
            status: ConflictStatus::Unresolved,
            resolution_notes: None,
        })
        .unwrap();
    assert!(inserted);

    let analysis = analyze_graph(&conn, &AnalysisConfig::default()).unwrap();
    let signals =
        collect_signals(&conn, &analysis.graph, &analysis.gaps, &analysis.bridges).unwrap();
    let ranked = rank(&signals);

    assert_eq!(ranked.len(), 18);
    assert!(ranked.iter().all(|score| score.entity_id != "PER-X"));
    for (index, score) in ranked.iter().enumerate() {
        assert_eq!(score.rank, index + 1);
    }
    assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));

    let by_id = |id: &str| ranked.iter().find(|score| score.entity_id == id).unwrap().clone();
    assert_eq!(by_id("PER-G1").factors.structural_gaps, 5.0);
    assert_eq!(by_id("PER-G2").factors.contradictions, 5.0);
    assert_eq!(by_id("PER-H").factors.community_bridges, 6.0);
    assert!(by_id("PER-G2").score > by_id("PER-G1").score);

    let id = SqliteAuditRepository::new(&conn).list_conflicts(None).unwrap()[0]
        .id
        .unwrap();
    resolve_conflict(&conn, id, ConflictStatus::ResolvedA, None).unwrap();
    let signals =
        collect_signals(&conn, &analysis.graph, &analysis.gaps, &analysis.bridges).unwrap();
    let g2 = signals.iter().find(|entry| entry.entity_id == "PER-G2").unwrap();
    assert!(g2.conflicts.is_empty());
}

/// Two five-person cliques joined through `PER-H`, a pair of unconnected
/// entities sharing five neighbors, and an excluded entity wired into the
/// first clique.
fn two_clusters_and_a_gap() -> Connection {
    let conn = open_db_in_memory().unwrap();
    for cluster in ["A", "B"] {
        for index in 1..=5 {
            insert(&conn, &format!("PER-{cluster}{index}"));
        }
        for a in 1..=5 {
            for b in a + 1..=5 {
                link(&conn, &format!("PER-{cluster}{a}"), &format!("PER-{cluster}{b}"));
            }
        }
    }
    insert(&conn, "PER-H");
    link(&conn, "PER-H", "PER-A1");
    link(&conn, "PER-H", "PER-B1");

    insert(&conn, "PER-G1");
    insert(&conn, "PER-G2");
    for index in 1..=5 {
        let neighbor = format!("PER-N{index}");
        insert(&conn, &neighbor);
        link(&conn, "PER-G1", &neighbor);
        link(&conn, "PER-G2", &neighbor);
    }

    insert(&conn, "PER-X");
    for index in 1..=5 {
        link(&conn, "PER-X", &format!("PER-A{index}"));
    }
    SqliteEntityRepository::new(&conn)
        .set_exclusion("PER-X", "noise:unknown_person")
        .unwrap();
    conn
}

fn insert(conn: &Connection, id: &str) {
    let name = format!("Person {}", id.trim_start_matches("PER-"));
    SqliteEntityRepository::new(conn)
        .insert_entity(&CanonicalEntity::new(id.to_string(), EntityType::Person, name))
        .unwrap();
}

fn link(conn: &Connection, a: &str, b: &str) {
    let repo = SqliteRelationshipRepository::new(conn);
    let id = repo
        .insert_relationship(&NewRelationship {
            source_entity_id: a,
            target_entity_id: b,
            relationship_type: "associate",
            subtype: None,
        })
        .unwrap();
    repo.add_source(
        id,
        &NewSource {
            source_system: "flights",
            evidence_class: EvidenceClass::Rdf,
            source_confidence: 1.0,
            evidence_detail: None,
            asserted_type: "associate",
            asserted_date_start: None,
            asserted_date_end: None,
            asserted_weight: None,
            document_refs: &[],
        },
    )
    .unwrap();
}
