mod config;

use anyhow::{anyhow, Context, Result};
use cbo_audit::{ClaimFilter, ClaimLedger};
use cbo_core::brain_contracts::ChapterStatus;
use cbo_core::capability::{ExtractionCapability, ReasoningCapability};
use cbo_core::claim_contracts::{ClaimStatus, QueryMode};
use cbo_core::job_contracts::{EnrichmentJob, JobRegistry};
use cbo_core::query_contracts::QueryRequest;
use cbo_mind::providers::{ChapterTextExtractor, CommandCapability, LexicalReasoner};
use cbo_mind::QueryEngine;
use cbo_retrieval::GraphExpander;
use cbo_storage::{BrainStore, InMemoryJobRegistry, SqliteJobRegistry, WriteMode};
use clap::{Parser, Subcommand, ValueEnum};
use config::{parse_bool_flag, JobBackend, Settings};
use serde::Serialize;
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

const NOTES_DIR: &str = "notes/";

#[derive(Parser)]
#[command(name = "cbo")]
#[command(about = "Brain retrieval, claim audit and enrichment CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a brain with its primary objective
    Init {
        brain: String,
        #[arg(long)]
        objective: String,
    },
    /// Answer a question from a brain
    Query {
        brain: String,
        question: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Standard)]
        mode: ModeArg,
        /// Start an enrichment job when the answer is weak
        #[arg(long)]
        auto_enrich: bool,
        /// Wait for the enrichment job, then ask again
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
        #[arg(long, default_value_t = 600)]
        wait_timeout_secs: u64,
    },
    /// Run gap detection and enrichment for a question to completion
    Enrich { brain: String, question: String },
    /// Show one enrichment job
    Job { job_id: String },
    /// List enrichment jobs, newest first
    Jobs {
        #[arg(long)]
        brain: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Processing-log summary
    Status { brain: String },
    /// Record chapter states
    Chapters {
        brain: String,
        status: String,
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        reason: Option<String>,
        /// Comma-separated index terms for each chapter
        #[arg(long)]
        terms: Option<String>,
    },
    /// Inspect versioned claims
    Claims {
        #[command(subcommand)]
        action: ClaimCommands,
    },
    /// Write a user note and track its claims
    Note {
        brain: String,
        path: String,
        content: String,
        #[arg(long, value_enum, default_value_t = NoteMode::Replace)]
        mode: NoteMode,
    },
    /// Knowledge graph nodes and links
    Graph { brain: String },
    /// Knowledge files with their metadata
    Files { brain: String },
    /// Recent query and enrichment runs
    Runs {
        brain: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ClaimCommands {
    List {
        brain: String,
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Show { brain: String, claim_id: String },
    History { brain: String, claim_id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Standard,
    Audit,
}

impl From<ModeArg> for QueryMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Standard => QueryMode::Standard,
            ModeArg::Audit => QueryMode::Audit,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum NoteMode {
    Replace,
    Merge,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::load();
    let engine = build_engine(&settings)?;

    match cli.command {
        Commands::Init { brain, objective } => {
            let path = engine
                .store()
                .create_brain(&brain, &objective)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&json!({ "brain": brain, "path": path }))
        }
        Commands::Query {
            brain,
            question,
            mode,
            auto_enrich,
            wait,
            poll_ms,
            wait_timeout_secs,
        } => {
            let request = QueryRequest::new(question, mode.into()).with_auto_enrich(auto_enrich);
            let response = engine
                .query(&brain, &request)
                .map_err(|err| kinded(err.kind(), err))?;
            let Some(job_id) = response.enrichment_job_id.clone() else {
                return print_json(&response);
            };
            let limit = Duration::from_secs(wait_timeout_secs);
            if !wait {
                print_json(&response)?;
                // The job thread dies with the process; stay until it settles.
                wait_for_job(&engine, &job_id, poll_ms, limit)?;
                return Ok(());
            }
            let job = wait_for_job(&engine, &job_id, poll_ms, limit)?;
            let requery = QueryRequest::new(request.question.clone(), request.mode);
            let refreshed = engine
                .query(&brain, &requery)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&json!({ "initial": response, "job": job, "response": refreshed }))
        }
        Commands::Enrich { brain, question } => {
            let job = engine
                .orchestrator()
                .trigger_blocking(&brain, &question)
                .map_err(|err| kinded(err.kind(), err))?;
            match job {
                Some(job) => print_json(&job),
                None => print_json(&json!({
                    "job": null,
                    "message": "no skipped chapters can improve this answer",
                })),
            }
        }
        Commands::Job { job_id } => {
            let job = engine
                .orchestrator()
                .get_status(&job_id)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&job)
        }
        Commands::Jobs { brain, limit } => {
            let jobs = engine
                .orchestrator()
                .list_jobs(brain.as_deref(), limit)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&jobs)
        }
        Commands::Status { brain } => {
            let summary = engine
                .store()
                .processing_summary(&brain)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&summary)
        }
        Commands::Chapters {
            brain,
            status,
            ids,
            reason,
            terms,
        } => {
            let status = status
                .parse::<ChapterStatus>()
                .map_err(|err| kinded("invalid_request", err))?;
            let store = engine.store();
            let changed = store
                .register_chapters(&brain, &ids, status, reason)
                .map_err(|err| kinded(err.kind(), err))?;
            if let Some(terms) = terms {
                let terms = split_terms(&terms);
                for id in &ids {
                    store
                        .set_chapter_index_terms(&brain, id, terms.clone())
                        .map_err(|err| kinded(err.kind(), err))?;
                }
            }
            print_json(&json!({ "brain": brain, "status": status, "changed": changed }))
        }
        Commands::Claims { action } => run_claims(&engine, &settings, action),
        Commands::Note {
            brain,
            path,
            content,
            mode,
        } => {
            let path = note_path(&path);
            let write_mode = match mode {
                NoteMode::Replace => WriteMode::Overwrite,
                NoteMode::Merge => WriteMode::AppendMerge,
            };
            let store = engine.store();
            store
                .write_markdown(&brain, &path, &content, write_mode)
                .map_err(|err| kinded(err.kind(), err))?;
            let claims = if settings.engine.audit.claim_versioning {
                let report = ClaimLedger::new(settings.engine.audit.clone())
                    .track_file(store, &brain, &path, None)
                    .map_err(|err| kinded(err.kind(), err))?;
                Some(report)
            } else {
                None
            };
            info!(brain = %brain, path = %path, "note_written");
            print_json(&json!({ "path": path, "claims": claims }))
        }
        Commands::Graph { brain } => {
            let graph = GraphExpander::new(settings.engine.expander.clone())
                .graph_data(engine.store(), &brain)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&graph)
        }
        Commands::Files { brain } => {
            let index = engine
                .store()
                .knowledge_index(&brain)
                .map_err(|err| kinded(err.kind(), err))?;
            let files = index
                .iter()
                .map(|file| {
                    json!({
                        "path": file.path,
                        "category": file.category,
                        "title": file.title,
                        "tags": file.metadata.tags,
                        "summary": file.metadata.summary,
                        "confidence": file.metadata.confidence,
                        "modifiedAt": file.modified_at,
                    })
                })
                .collect::<Vec<_>>();
            print_json(&files)
        }
        Commands::Runs { brain, limit } => {
            let runs = engine
                .store()
                .read_runs(&brain)
                .map_err(|err| kinded(err.kind(), err))?;
            let skip = runs.len().saturating_sub(limit);
            print_json(&runs[skip..])
        }
    }
}

fn run_claims(engine: &QueryEngine, settings: &Settings, action: ClaimCommands) -> Result<()> {
    let ledger = ClaimLedger::new(settings.engine.audit.clone());
    let store = engine.store();
    match action {
        ClaimCommands::List {
            brain,
            file,
            status,
            text,
            limit,
        } => {
            let status = status
                .map(|value| value.parse::<ClaimStatus>())
                .transpose()
                .map_err(|err| kinded("invalid_request", err))?;
            let filter = ClaimFilter {
                file_path: file,
                status,
                text,
            };
            let claims = ledger
                .list_claims(store, &brain, &filter, limit)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&claims)
        }
        ClaimCommands::Show { brain, claim_id } => {
            let claim = ledger
                .get_claim(store, &brain, &claim_id)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&claim)
        }
        ClaimCommands::History { brain, claim_id } => {
            let history = ledger
                .claim_history(store, &brain, &claim_id)
                .map_err(|err| kinded(err.kind(), err))?;
            print_json(&history)
        }
    }
}

fn build_engine(settings: &Settings) -> Result<QueryEngine> {
    let store = Arc::new(
        BrainStore::open(&settings.brains_dir, settings.store.clone()).with_context(|| {
            format!("failed to open brains dir {}", settings.brains_dir.display())
        })?,
    );
    let registry: Arc<dyn JobRegistry> = match settings.job_backend {
        JobBackend::Memory => Arc::new(InMemoryJobRegistry::new(settings.max_job_history)),
        JobBackend::Sqlite => Arc::new(
            SqliteJobRegistry::open(&settings.job_db_path, settings.max_job_history)
                .with_context(|| {
                    format!("failed to open job store {}", settings.job_db_path.display())
                })?,
        ),
    };
    let reasoner: Arc<dyn ReasoningCapability> = match &settings.reasoner_cmd {
        Some(cmd) => Arc::new(CommandCapability::new(cmd).with_working_dir(&settings.brains_dir)),
        None => Arc::new(LexicalReasoner::default()),
    };
    let extractor: Arc<dyn ExtractionCapability> = match &settings.extractor_cmd {
        Some(cmd) => Arc::new(CommandCapability::new(cmd).with_working_dir(&settings.brains_dir)),
        None => Arc::new(ChapterTextExtractor::new(&settings.chapters_dir)),
    };
    Ok(QueryEngine::new(
        store,
        reasoner,
        extractor,
        registry,
        settings.engine.clone(),
    ))
}

/// Polls the job registry until the job is terminal.
fn wait_for_job(
    engine: &QueryEngine,
    job_id: &str,
    poll_ms: u64,
    limit: Duration,
) -> Result<EnrichmentJob> {
    let started = Instant::now();
    loop {
        let job = engine
            .orchestrator()
            .get_status(job_id)
            .map_err(|err| kinded(err.kind(), err))?;
        if job.status.is_terminal() {
            info!(job_id, status = %job.status, "enrichment_wait_finished");
            return Ok(job);
        }
        if started.elapsed() >= limit {
            return Err(anyhow!(
                "timeout: job {job_id} still {} after {}s",
                job.status,
                limit.as_secs()
            ));
        }
        std::thread::sleep(Duration::from_millis(poll_ms.max(10)));
    }
}

fn note_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('/');
    let mut path = if trimmed.starts_with(NOTES_DIR) {
        trimmed.to_string()
    } else {
        format!("{NOTES_DIR}{trimmed}")
    };
    if !path.ends_with(".md") {
        path.push_str(".md");
    }
    path
}

fn split_terms(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

fn kinded(kind: &str, err: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("{kind}: {err}")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let enabled = std::env::var("CBO_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false);
    if enabled {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
