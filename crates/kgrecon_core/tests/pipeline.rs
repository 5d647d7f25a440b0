use kgrecon_core::db::open_db_in_memory;
use kgrecon_core::model::audit::RunStatus;
use kgrecon_core::repo::audit_repo::{RunLedger, SqliteRunLedger};
use kgrecon_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use kgrecon_core::repo::integrity::check_integrity;
use kgrecon_core::{
    MemorySink, Pipeline, RawEntity, RawRelationship, ReconcileConfig, RunPlan, SourceBatch,
    SourceInput,
};

#[test]
fn full_run_reconciles_sources_and_emits_analysis() {
    let mut conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut sink = MemorySink::default();

    let mut pipeline = Pipeline::new(&mut conn, &config);
    let run_id = pipeline.run_id().to_string();
    let summary = pipeline.run(RunPlan::Full, &sources(), &mut sink).unwrap();

    assert_eq!(summary.run_id, run_id);
    assert_eq!(summary.ingest.len(), 3);
    assert_eq!(summary.missing_sources, vec!["emails".to_string()]);
    let merge = summary.merge.as_ref().unwrap();
    assert_eq!(merge.noise_deleted, 1);
    assert_eq!(merge.merges, 0);
    assert!(summary.integrity.as_ref().unwrap().is_sound());
    assert_eq!(summary.conflicts.unwrap().inserted, 1);
    assert_eq!(summary.scoring.as_ref().unwrap().scored, 2);
    assert_eq!(summary.ranked, Some(3));
    assert_eq!(summary.open_reviews, 0);

    assert_eq!(sink.count("scored_relationship"), 2);
    assert_eq!(sink.count("priority"), 3);
    assert_eq!(sink.count("structural_gap"), 0);
    assert_eq!(sink.count("review_item"), 0);

    assert_eq!(SqliteEntityRepository::new(&conn).count_entities().unwrap(), 3);
    assert!(check_integrity(&conn).unwrap().is_sound());
}

#[test]
fn every_stage_is_recorded_in_the_ledger() {
    let mut conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    let mut sink = MemorySink::default();

    let mut pipeline = Pipeline::new(&mut conn, &config);
    let run_id = pipeline.run_id().to_string();
    pipeline.run(RunPlan::Full, &sources(), &mut sink).unwrap();

    let runs = SqliteRunLedger::new(&conn).list_runs(Some(&run_id)).unwrap();
    let stages: Vec<&str> = runs.iter().map(|run| run.stage.as_str()).collect();
    assert_eq!(
        stages,
        vec![
            "ingest:base",
            "ingest:flights",
            "ingest:court",
            "ingest:emails",
            "merge",
            "conflicts",
            "scoring",
            "analysis",
            "ranking",
        ]
    );
    assert!(runs.iter().all(|run| run.status == RunStatus::Completed));
    assert!(runs.iter().all(|run| run.finished_at.is_some()));

    let missing = runs.iter().find(|run| run.stage == "ingest:emails").unwrap();
    assert_eq!(missing.records_processed, 0);
    assert_eq!(
        missing.notes.as_deref(),
        Some("source unavailable, coverage reduced: export not delivered")
    );
}

#[test]
fn analysis_only_runs_leave_the_store_shape_alone() {
    let mut conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    Pipeline::new(&mut conn, &config)
        .run(RunPlan::Full, &sources(), &mut MemorySink::default())
        .unwrap();

    let mut sink = MemorySink::default();
    let mut pipeline = Pipeline::new(&mut conn, &config);
    let run_id = pipeline.run_id().to_string();
    let summary = pipeline.run(RunPlan::AnalysisOnly, &[], &mut sink).unwrap();

    assert!(summary.ingest.is_empty());
    assert!(summary.merge.is_none());
    assert!(summary.conflicts.is_none());
    assert_eq!(summary.ranked, Some(3));
    assert_eq!(sink.count("scored_relationship"), 2);

    let runs = SqliteRunLedger::new(&conn).list_runs(Some(&run_id)).unwrap();
    let stages: Vec<&str> = runs.iter().map(|run| run.stage.as_str()).collect();
    assert_eq!(stages, vec!["scoring", "analysis", "ranking"]);
    assert_eq!(SqliteEntityRepository::new(&conn).count_entities().unwrap(), 3);
}

#[test]
fn cleanup_rerun_is_a_no_op() {
    let mut conn = open_db_in_memory().unwrap();
    let config = ReconcileConfig::default();
    Pipeline::new(&mut conn, &config)
        .run(RunPlan::Full, &sources(), &mut MemorySink::default())
        .unwrap();

    let summary = Pipeline::new(&mut conn, &config)
        .run(RunPlan::CleanupAndAnalysis, &[], &mut MemorySink::default())
        .unwrap();

    let merge = summary.merge.unwrap();
    assert_eq!(merge.noise_deleted + merge.noise_flagged + merge.merges + merge.renamed, 0);
    let conflicts = summary.conflicts.unwrap();
    assert_eq!((conflicts.detected, conflicts.inserted), (1, 0));
}

fn sources() -> Vec<SourceInput> {
    let mut kellen = RawEntity::new("Sarah Kellen", "base");
    kellen.category = Some("victim".into());
    let base = SourceBatch {
        source_system: "base".into(),
        is_base: true,
        entities: vec![
            RawEntity::new("Ghislaine Maxwell", "base"),
            RawEntity::new("Jean-Luc Brunel", "base"),
            kellen,
        ],
        relationships: vec![RawRelationship::new(
            "Ghislaine Maxwell",
            "Jean-Luc Brunel",
            "associate",
            "base",
        )],
    };
    let flights = SourceBatch {
        source_system: "flights".into(),
        is_base: false,
        entities: Vec::new(),
        relationships: vec![
            RawRelationship::new("Jean-Luc Brunel", "Ghislaine Maxwell", "associate", "flights"),
            RawRelationship::new("Ghislaine Maxwell", "Sarah Kellen", "associate", "flights"),
            RawRelationship::new("Unknown Person", "Ghislaine Maxwell", "associate", "flights"),
        ],
    };
    let mut staff = RawEntity::new("Sarah Kellen", "court");
    staff.category = Some("staff".into());
    let court = SourceBatch {
        source_system: "court".into(),
        is_base: false,
        entities: vec![staff],
        relationships: Vec::new(),
    };
    vec![
        SourceInput::Available(base),
        SourceInput::Available(flights),
        SourceInput::Available(court),
        SourceInput::Missing {
            source_system: "emails".into(),
            reason: "export not delivered".into(),
        },
    ]
}
