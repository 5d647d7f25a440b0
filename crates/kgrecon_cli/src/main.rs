//! `kgrecon` command-line entry point.
//!
//! # Responsibility
//! - Load JSON-lines sources and run pipeline plans against a store file.
//! - Expose stage status and manual adjudication to reviewers.
//! - Write analytical output as JSON lines.

mod input;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use input::{load_source, parse_source_arg};
use kgrecon_core::db::open_db;
use kgrecon_core::model::audit::ConflictStatus;
use kgrecon_core::repo::audit_repo::{AuditRepository, RunLedger, SqliteAuditRepository, SqliteRunLedger};
use kgrecon_core::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use kgrecon_core::repo::integrity::check_integrity;
use kgrecon_core::repo::relationship_repo::{RelationshipRepository, SqliteRelationshipRepository};
use kgrecon_core::service::adjudication::{manual_resolution, resolve_conflict, ManualResolution};
use kgrecon_core::sink::JsonLinesSink;
use kgrecon_core::{default_log_level, init_logging, Pipeline, ReconcileConfig, RunPlan};
use log::info;
use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kgrecon", version, about = "Entity resolution and knowledge-graph reconciliation")]
struct Cli {
    /// Log level: trace|debug|info|warn|error.
    #[arg(long, global = true, env = "KGRECON_LOG_LEVEL")]
    log_level: Option<String>,
    /// Directory for rolling log files. Logging stays off when unset.
    #[arg(long, global = true, env = "KGRECON_LOG_DIR")]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a pipeline plan.
    Run {
        #[arg(long, env = "KGRECON_DB")]
        db: PathBuf,
        /// TOML configuration; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// full | cleanup-and-analysis | analysis-only
        #[arg(long, default_value = "full", value_parser = parse_plan)]
        plan: RunPlan,
        /// Base registry source as NAME=PATH.
        #[arg(long, value_parser = parse_source_arg)]
        base: Option<(String, String)>,
        /// Additional source as NAME=PATH; repeatable, ingested in order.
        #[arg(long = "source", value_parser = parse_source_arg)]
        sources: Vec<(String, String)>,
        /// Output file for JSON-lines records; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show store counts and the stage ledger.
    Status {
        #[arg(long, env = "KGRECON_DB")]
        db: PathBuf,
        /// Restrict the ledger to one run id.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Record a decision on a conflict.
    ResolveConflict {
        #[arg(long, env = "KGRECON_DB")]
        db: PathBuf,
        #[arg(long)]
        id: i64,
        /// resolved_a | resolved_b | resolved_merged | unresolved
        #[arg(long, value_parser = parse_conflict_status)]
        status: ConflictStatus,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Assign a written name to a canonical entity by hand.
    Assign {
        #[arg(long, env = "KGRECON_DB")]
        db: PathBuf,
        #[arg(long)]
        source: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        entity: String,
        /// Review item closed by this decision.
        #[arg(long)]
        review: Option<i64>,
        #[arg(long)]
        notes: Option<String>,
    },
}

fn parse_plan(value: &str) -> Result<RunPlan, String> {
    RunPlan::parse(value).ok_or_else(|| format!("unknown plan `{value}`"))
}

fn parse_conflict_status(value: &str) -> Result<ConflictStatus, String> {
    ConflictStatus::parse(value.trim()).ok_or_else(|| format!("unknown conflict status `{value}`"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, absolute(log_dir)?).context("initializing logging")?;
    }

    match cli.command {
        Command::Run {
            db,
            config,
            plan,
            base,
            sources,
            out,
        } => run(&db, config.as_deref(), plan, base, sources, out.as_deref()),
        Command::Status { db, run_id } => status(&db, run_id.as_deref()),
        Command::ResolveConflict { db, id, status, notes } => {
            let conn = open_db(&db)?;
            resolve_conflict(&conn, id, status, notes.as_deref())?;
            println!("conflict {id} -> {}", status.as_str());
            Ok(())
        }
        Command::Assign {
            db,
            source,
            name,
            entity,
            review,
            notes,
        } => {
            let conn = open_db(&db)?;
            let record_id = manual_resolution(
                &conn,
                &ManualResolution {
                    source_system: &source,
                    source_local_id: None,
                    name_as_written: &name,
                    canonical_id: &entity,
                    notes: notes.as_deref(),
                    review_id: review,
                },
            )?;
            println!("resolution record {record_id} -> {entity}");
            Ok(())
        }
    }
}

fn run(
    db: &Path,
    config_path: Option<&Path>,
    plan: RunPlan,
    base: Option<(String, String)>,
    sources: Vec<(String, String)>,
    out: Option<&Path>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => ReconcileConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ReconcileConfig::default(),
    };

    let mut inputs = Vec::new();
    if let Some((name, path)) = base {
        inputs.push(load_source(&name, Path::new(&path), true)?);
    }
    for (name, path) in sources {
        inputs.push(load_source(&name, Path::new(&path), false)?);
    }
    if plan == RunPlan::Full && inputs.is_empty() {
        return Err(anyhow!("plan `full` needs at least one --base or --source"));
    }

    let writer: Box<dyn Write> = match out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut sink = JsonLinesSink::new(writer);

    let mut conn = open_db(db)?;
    let mut pipeline = Pipeline::new(&mut conn, &config);
    let summary = pipeline.run(plan, &inputs, &mut sink)?;
    info!(
        "event=cli_run module=cli status=ok run_id={} plan={:?}",
        summary.run_id, plan
    );
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn status(db: &Path, run_id: Option<&str>) -> Result<()> {
    let conn = open_db(db)?;
    let integrity = check_integrity(&conn)?;
    let counts = json!({
        "entities": SqliteEntityRepository::new(&conn).count_entities()?,
        "relationships": SqliteRelationshipRepository::new(&conn).count_relationships()?,
        "open_reviews": SqliteAuditRepository::new(&conn).list_reviews(None)?.len(),
        "unresolved_conflicts": SqliteAuditRepository::new(&conn)
            .list_conflicts(Some(ConflictStatus::Unresolved))?
            .len(),
        "integrity": integrity,
        "integrity_sound": integrity.is_sound(),
    });
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{counts}")?;
    for row in SqliteRunLedger::new(&conn).list_runs(run_id)? {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("resolving current directory")?
        .join(path))
}
