use cbo_audit::{AuditConfig, ClaimLedger};
use cbo_core::brain_contracts::{ChapterStatus, Confidence};
use cbo_core::capability::{
    AnswerDraft, AnswerRequest, CapabilityError, CapabilityGuardrails, ChapterDigest,
    ReasoningCapability,
};
use cbo_core::claim_contracts::{ProvenancePolicy, QueryMode, RunStatus};
use cbo_core::job_contracts::{EnrichmentJob, JobStatus};
use cbo_core::query_contracts::QueryRequest;
use cbo_mind::providers::{ChapterTextExtractor, LexicalReasoner};
use cbo_mind::{
    EngineConfig, EnrichmentOrchestrator, GapDetector, QueryEngine, QueryError,
    NO_SKIPPED_CHAPTERS,
};
use cbo_retrieval::FileSelector;
use cbo_storage::{BrainStore, InMemoryJobRegistry, SqliteJobRegistry, StoreConfig, WriteMode};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BRAIN: &str = "acme";
const BERLIN_QUESTION: &str = "When did Acme open the Berlin office?";

/// Canned answers keyed by question; unknown questions get a low-confidence shrug.
struct ScriptedReasoner {
    answers: BTreeMap<String, AnswerDraft>,
}

impl ScriptedReasoner {
    fn new(answers: &[(&str, &str, Confidence)]) -> Arc<Self> {
        Arc::new(Self {
            answers: answers
                .iter()
                .map(|(question, answer, confidence)| {
                    (
                        question.to_string(),
                        AnswerDraft {
                            answer: answer.to_string(),
                            confidence: *confidence,
                            sources: Vec::new(),
                            citations: Vec::new(),
                        },
                    )
                })
                .collect(),
        })
    }
}

impl ReasoningCapability for ScriptedReasoner {
    fn answer(
        &self,
        request: &AnswerRequest,
        _guardrails: &CapabilityGuardrails,
    ) -> Result<AnswerDraft, CapabilityError> {
        Ok(self
            .answers
            .get(&request.question)
            .cloned()
            .unwrap_or_else(|| AnswerDraft {
                answer: "Unclear.".to_string(),
                confidence: Confidence::Low,
                sources: Vec::new(),
                citations: Vec::new(),
            }))
    }

    fn classify_relevance(
        &self,
        _chapter: &ChapterDigest,
        _objective: &str,
        _guardrails: &CapabilityGuardrails,
    ) -> Result<bool, CapabilityError> {
        Ok(false)
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    store: Arc<BrainStore>,
    chapters_dir: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        BrainStore::open(dir.path().join("brains"), StoreConfig::default()).expect("open store"),
    );
    store
        .create_brain(BRAIN, "Who built Acme and how")
        .expect("create brain");
    store
        .write_markdown(
            BRAIN,
            "characters/jane.md",
            "---\nsource: chapter_2\ntags: [founder]\nsummary: Jane founded Acme\nrelated: [facts/revenue.md]\n---\n\n- Jane founded Acme in 1999.\n\n> Jane founded Acme in 1999 with two partners. (Source: chapter_2)\n",
            WriteMode::Overwrite,
        )
        .expect("jane");
    store
        .write_markdown(
            BRAIN,
            "facts/revenue.md",
            "---\ntags: [finance]\nrelated: [characters/jane.md]\n---\n\n- Revenue reached two million in 2003.\n",
            WriteMode::Overwrite,
        )
        .expect("revenue");
    let ledger = ClaimLedger::new(AuditConfig::default());
    for path in ["characters/jane.md", "facts/revenue.md"] {
        ledger
            .track_file(&store, BRAIN, path, None)
            .expect("track claims");
    }

    store
        .register_chapters(
            BRAIN,
            &["1".to_string(), "2".to_string()],
            ChapterStatus::Extracted,
            None,
        )
        .expect("extracted chapters");
    store
        .register_chapters(
            BRAIN,
            &["7".to_string()],
            ChapterStatus::Skipped,
            Some("European expansion: the Berlin office".to_string()),
        )
        .expect("skipped 7");
    store
        .register_chapters(
            BRAIN,
            &["8".to_string()],
            ChapterStatus::Skipped,
            Some("cafeteria menus".to_string()),
        )
        .expect("skipped 8");

    let chapters_dir = dir.path().join("chapters");
    fs::create_dir_all(&chapters_dir).expect("chapters dir");
    fs::write(
        chapters_dir.join("7.txt"),
        "Acme opened the Berlin office in 2004. The office employed forty engineers. \
         Lunch was served daily.",
    )
    .expect("chapter 7");
    fs::write(chapters_dir.join("8.txt"), "Soup on Mondays, stew on Fridays.").expect("chapter 8");

    Workspace {
        _dir: dir,
        store,
        chapters_dir,
    }
}

fn lexical_engine(ws: &Workspace, config: EngineConfig) -> QueryEngine {
    QueryEngine::new(
        Arc::clone(&ws.store),
        Arc::new(LexicalReasoner::default()),
        Arc::new(ChapterTextExtractor::new(&ws.chapters_dir)),
        Arc::new(InMemoryJobRegistry::new(20)),
        config,
    )
}

fn wait_for_job(orchestrator: &EnrichmentOrchestrator, job_id: &str) -> EnrichmentJob {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let job = orchestrator.get_status(job_id).expect("job status");
        if job.status.is_terminal() {
            return job;
        }
        assert!(Instant::now() < deadline, "job {job_id} never finished");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn chapter_status(store: &BrainStore, chapter_id: &str) -> ChapterStatus {
    store
        .read_processing_log(BRAIN)
        .expect("log")
        .state(chapter_id)
        .expect("chapter present")
        .status
}

#[test]
fn founder_question_selects_the_founder_file() {
    let ws = workspace();
    let selected = FileSelector::default()
        .select_relevant_files(&ws.store, BRAIN, "Who founded the company?", 1)
        .expect("select");
    assert_eq!(selected, vec!["characters/jane.md".to_string()]);
}

#[test]
fn strict_provenance_rejects_unbacked_statements() {
    let ws = workspace();
    let question = "Who founded the company?";
    let reasoner = ScriptedReasoner::new(&[(
        question,
        "Jane founded Acme in 1999. Revenue tripled during the winter.",
        Confidence::High,
    )]);
    let config = EngineConfig {
        audit: AuditConfig {
            provenance: ProvenancePolicy::Strict,
            ..AuditConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = QueryEngine::new(
        Arc::clone(&ws.store),
        reasoner,
        Arc::new(ChapterTextExtractor::new(&ws.chapters_dir)),
        Arc::new(InMemoryJobRegistry::new(20)),
        config,
    );

    let err = engine
        .query(BRAIN, &QueryRequest::new(question, QueryMode::Audit))
        .expect_err("strict violation");
    assert!(matches!(err, QueryError::Audit(_)));
    assert_eq!(err.kind(), "provenance_violation");

    let runs = ws.store.read_runs(BRAIN).expect("runs");
    assert_eq!(runs.last().map(|run| run.status), Some(RunStatus::Failed));

    // The same answer in standard mode is not audited.
    let response = engine
        .query(BRAIN, &QueryRequest::new(question, QueryMode::Standard))
        .expect("standard query");
    assert!(response.trace_degraded);
}

#[test]
fn fully_extracted_brain_has_no_gap_and_no_job() {
    let ws = workspace();
    ws.store
        .register_chapters(
            BRAIN,
            &["7".to_string(), "8".to_string()],
            ChapterStatus::Extracted,
            None,
        )
        .expect("extract all");

    let detector = GapDetector::new(
        Arc::new(LexicalReasoner::default()),
        CapabilityGuardrails::default(),
    );
    let report = detector
        .detect_gap(&ws.store, BRAIN, BERLIN_QUESTION, None)
        .expect("detect");
    assert!(report.candidate_chapters.is_empty());
    assert_eq!(report.rationale, NO_SKIPPED_CHAPTERS);

    let engine = lexical_engine(&ws, EngineConfig::default());
    let job_id = engine
        .orchestrator()
        .trigger(BRAIN, BERLIN_QUESTION)
        .expect("trigger");
    assert_eq!(job_id, None);
}

#[test]
fn low_confidence_query_enriches_and_requery_succeeds() {
    let ws = workspace();
    let engine = lexical_engine(&ws, EngineConfig::default());

    let first = engine
        .query(
            BRAIN,
            &QueryRequest::new(BERLIN_QUESTION, QueryMode::Standard).with_auto_enrich(true),
        )
        .expect("first query");
    assert!(first.confidence <= Confidence::Low);
    let job_id = first.enrichment_job_id.clone().expect("enrichment started");

    let job = wait_for_job(engine.orchestrator(), &job_id);
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.candidate_chapters, vec!["7".to_string()]);
    assert_eq!(job.processed_chapters, vec!["7".to_string()]);

    assert_eq!(chapter_status(&ws.store, "7"), ChapterStatus::Extracted);
    assert_eq!(chapter_status(&ws.store, "8"), ChapterStatus::Skipped);
    let log = ws.store.read_processing_log(BRAIN).expect("log");
    assert_eq!(
        log.state("7").and_then(|state| state.source_objective.as_deref()),
        Some(BERLIN_QUESTION)
    );
    assert_eq!(log.secondary_objectives, vec![BERLIN_QUESTION.to_string()]);

    let second = engine
        .query(BRAIN, &QueryRequest::new(BERLIN_QUESTION, QueryMode::Audit))
        .expect("re-query");
    assert_eq!(second.confidence, Confidence::High);
    assert!(second.answer.contains("2004"));
    assert!(second
        .sources
        .contains(&"facts/enriched_chapter_7.md".to_string()));
    assert!(!second.trace_degraded);
    assert!(second.query_run_id.is_some());
    assert_eq!(second.trace_completeness.completeness_ratio, 1.0);
    assert!(second
        .claim_trace
        .iter()
        .any(|item| item.source_locator == "chapter_7"));
}

#[test]
fn re_enrichment_leaves_extracted_chapters_alone() {
    let ws = workspace();
    let engine = lexical_engine(&ws, EngineConfig::default());
    let orchestrator = engine.orchestrator();

    let first = orchestrator
        .trigger_blocking(BRAIN, BERLIN_QUESTION)
        .expect("enrich")
        .expect("job");
    assert_eq!(first.status, JobStatus::Completed);
    let enriched = ws
        .store
        .read_file(BRAIN, "facts/enriched_chapter_7.md")
        .expect("enriched file");
    let claim_events = ws.store.read_claim_events(BRAIN).expect("events").len();

    let second = orchestrator
        .trigger_blocking(BRAIN, BERLIN_QUESTION)
        .expect("re-enrich");
    assert!(second.is_none());
    assert_eq!(
        ws.store
            .read_file(BRAIN, "facts/enriched_chapter_7.md")
            .expect("enriched file"),
        enriched
    );
    assert_eq!(
        ws.store.read_claim_events(BRAIN).expect("events").len(),
        claim_events
    );
    assert_eq!(
        ws.store
            .read_processing_log(BRAIN)
            .expect("log")
            .secondary_objectives
            .len(),
        1
    );
}

#[test]
fn durable_job_registry_survives_reopen() {
    let ws = workspace();
    let db_path = ws.store.root().join("jobs.sqlite");
    let job_id = {
        let engine = QueryEngine::new(
            Arc::clone(&ws.store),
            Arc::new(LexicalReasoner::default()),
            Arc::new(ChapterTextExtractor::new(&ws.chapters_dir)),
            Arc::new(SqliteJobRegistry::open(&db_path, 20).expect("sqlite")),
            EngineConfig::default(),
        );
        engine
            .orchestrator()
            .trigger_blocking(BRAIN, BERLIN_QUESTION)
            .expect("enrich")
            .expect("job")
            .job_id
    };

    let reopened = lexical_engine_with_registry(&ws, &db_path);
    let job = reopened.orchestrator().get_status(&job_id).expect("status");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.brain_name, BRAIN);
}

fn lexical_engine_with_registry(ws: &Workspace, db_path: &Path) -> QueryEngine {
    QueryEngine::new(
        Arc::clone(&ws.store),
        Arc::new(LexicalReasoner::default()),
        Arc::new(ChapterTextExtractor::new(&ws.chapters_dir)),
        Arc::new(SqliteJobRegistry::open(db_path, 20).expect("sqlite")),
        EngineConfig::default(),
    )
}
