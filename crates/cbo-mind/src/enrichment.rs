use crate::bounded::call_bounded;
use crate::config::EnrichmentConfig;
use crate::gap::{FailedAnswer, GapDetector};
use crate::EnrichmentError;
use cbo_audit::{AuditConfig, ClaimLedger};
use cbo_core::brain_contracts::{
    chapter_sort_key, normalize_knowledge_path, ChapterStatus, KnowledgeFile,
};
use cbo_core::capability::{
    CapabilityGuardrails, ExtractionCapability, ExtractionOutput, ExtractionRequest, FileAction,
    FileOperation, ReasoningCapability,
};
use cbo_core::claim_contracts::{QueryMode, RunKind, RunRecord, RunStatus, TraceCompleteness};
use cbo_core::job_contracts::{EnrichmentJob, JobOutcome, JobRegistry, JobRegistryError};
use cbo_storage::{BrainStore, BrainWriteGuard, StorageError, WriteMode};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Inner {
    store: Arc<BrainStore>,
    registry: Arc<dyn JobRegistry>,
    gap: GapDetector,
    extractor: Arc<dyn ExtractionCapability>,
    ledger: ClaimLedger,
    audit: AuditConfig,
    config: EnrichmentConfig,
    guardrails: CapabilityGuardrails,
}

/// Runs enrichment jobs that extract skipped chapters against a new objective.
#[derive(Clone)]
pub struct EnrichmentOrchestrator {
    inner: Arc<Inner>,
}

/// What one job run produced before it finished or failed.
#[derive(Default)]
struct JobProgress {
    processed: Vec<String>,
    touched_files: Vec<String>,
}

impl EnrichmentOrchestrator {
    pub fn new(
        store: Arc<BrainStore>,
        registry: Arc<dyn JobRegistry>,
        reasoner: Arc<dyn ReasoningCapability>,
        extractor: Arc<dyn ExtractionCapability>,
        audit: AuditConfig,
        config: EnrichmentConfig,
        guardrails: CapabilityGuardrails,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gap: GapDetector::new(reasoner, guardrails.clone()),
                ledger: ClaimLedger::new(audit.clone()),
                store,
                registry,
                extractor,
                audit,
                config,
                guardrails,
            }),
        }
    }

    pub fn gap_detector(&self) -> &GapDetector {
        &self.inner.gap
    }

    /// Starts a background job; `None` means there is nothing left to enrich.
    pub fn trigger(&self, brain: &str, question: &str) -> Result<Option<String>, EnrichmentError> {
        self.trigger_after(brain, question, None)
    }

    pub fn trigger_after(
        &self,
        brain: &str,
        question: &str,
        failed: Option<&FailedAnswer>,
    ) -> Result<Option<String>, EnrichmentError> {
        let Some(job) = self.prepare(brain, question, failed)? else {
            return Ok(None);
        };
        let job_id = job.job_id.clone();
        let orchestrator = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("cbo-{job_id}"))
            .spawn(move || {
                if let Err(err) = orchestrator.run(&job) {
                    warn!(job_id = %job.job_id, error = %err, "enrichment_finish_failed");
                }
            });
        if let Err(err) = spawned {
            let outcome = JobOutcome::failed(format!("failed to start job: {err}"), Vec::new());
            self.inner.registry.finish(&job_id, outcome, Utc::now())?;
            return Err(StorageError::Io(err).into());
        }
        Ok(Some(job_id))
    }

    /// Same as `trigger`, but runs the job on the caller's thread and returns it finished.
    pub fn trigger_blocking(
        &self,
        brain: &str,
        question: &str,
    ) -> Result<Option<EnrichmentJob>, EnrichmentError> {
        let Some(job) = self.prepare(brain, question, None)? else {
            return Ok(None);
        };
        self.run(&job).map(Some)
    }

    pub fn get_status(&self, job_id: &str) -> Result<EnrichmentJob, EnrichmentError> {
        self.inner
            .registry
            .get(job_id)?
            .ok_or_else(|| JobRegistryError::NotFound(job_id.to_string()).into())
    }

    pub fn list_jobs(
        &self,
        brain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EnrichmentJob>, EnrichmentError> {
        Ok(self.inner.registry.list(brain, limit)?)
    }

    fn prepare(
        &self,
        brain: &str,
        question: &str,
        failed: Option<&FailedAnswer>,
    ) -> Result<Option<EnrichmentJob>, EnrichmentError> {
        let store = &self.inner.store;
        if !store.brain_exists(brain) {
            return Err(StorageError::not_found(format!("brain {brain}")).into());
        }
        let report = self.inner.gap.detect_gap(store, brain, question, failed)?;
        if report.is_empty() {
            info!(brain, rationale = %report.rationale, "enrichment_not_needed");
            return Ok(None);
        }

        let mut chapters = report.candidate_chapters;
        if self.inner.config.max_chapters_per_job > 0 {
            chapters.truncate(self.inner.config.max_chapters_per_job);
        }
        let job = EnrichmentJob::new(brain, question, chapters, Utc::now());
        self.inner.registry.create(job.clone())?;
        info!(
            brain,
            job_id = %job.job_id,
            chapters = job.candidate_chapters.len(),
            rationale = %report.rationale,
            "enrichment_started"
        );
        Ok(Some(job))
    }

    /// Processes the job and moves it to its terminal state. Committed writes are kept on failure.
    fn run(&self, job: &EnrichmentJob) -> Result<EnrichmentJob, EnrichmentError> {
        let run_id = RunRecord::new_run_id(RunKind::Enrichment);
        let mut progress = JobProgress::default();
        let result = self.process(job, &run_id, &mut progress);

        let (status, outcome, warnings) = match &result {
            Ok(()) => (
                RunStatus::Succeeded,
                JobOutcome::completed(progress.processed.clone()),
                Vec::new(),
            ),
            Err(err) => {
                warn!(
                    brain = %job.brain_name,
                    job_id = %job.job_id,
                    kind = err.kind(),
                    error = %err,
                    "enrichment_failed"
                );
                (
                    RunStatus::Failed,
                    JobOutcome::failed(err.to_string(), progress.processed.clone()),
                    vec![err.to_string()],
                )
            }
        };

        let record = RunRecord {
            run_id,
            brain: job.brain_name.clone(),
            kind: RunKind::Enrichment,
            mode: QueryMode::Standard,
            question: job.question.clone(),
            status,
            claim_trace: Vec::new(),
            trace_completeness: TraceCompleteness::default(),
            provenance: self.inner.audit.provenance,
            sources: progress.touched_files,
            warnings,
            job_id: Some(job.job_id.clone()),
            created_at: Utc::now(),
        };
        if let Err(err) = self.inner.store.append_run_record(&job.brain_name, &record) {
            warn!(job_id = %job.job_id, error = %err, "enrichment_run_record_failed");
        }

        let finished = self
            .inner
            .registry
            .finish(&job.job_id, outcome, Utc::now())?;
        info!(
            brain = %finished.brain_name,
            job_id = %finished.job_id,
            status = finished.status.as_str(),
            processed = finished.processed_chapters.len(),
            "enrichment_finished"
        );
        Ok(finished)
    }

    fn process(
        &self,
        job: &EnrichmentJob,
        run_id: &str,
        progress: &mut JobProgress,
    ) -> Result<(), EnrichmentError> {
        let store = &self.inner.store;
        let brain = job.brain_name.as_str();
        store.append_secondary_objective(brain, &job.question)?;

        for chapter_id in &job.candidate_chapters {
            if !is_skipped(store, brain, chapter_id)? {
                debug!(brain, chapter_id = %chapter_id, "enrichment_chapter_already_done");
                continue;
            }
            let output = self.extract(brain, chapter_id, &job.question)?;
            let touched = store.with_write_lock(brain, |guard| {
                self.apply_chapter(guard, chapter_id, &job.question, run_id, &output)
            })?;
            let Some(touched) = touched else {
                continue;
            };
            info!(
                brain,
                job_id = %job.job_id,
                chapter_id = %chapter_id,
                files = touched.len(),
                "enrichment_chapter_extracted"
            );
            for path in touched {
                if !progress.touched_files.contains(&path) {
                    progress.touched_files.push(path);
                }
            }
            progress.processed.push(chapter_id.clone());
        }
        Ok(())
    }

    fn extract(
        &self,
        brain: &str,
        chapter_id: &str,
        objective: &str,
    ) -> Result<ExtractionOutput, EnrichmentError> {
        let request = ExtractionRequest {
            brain: brain.to_string(),
            chapter_id: chapter_id.to_string(),
            objective: objective.to_string(),
            existing_files: self.inner.store.list_files(brain)?,
        };
        let extractor = Arc::clone(&self.inner.extractor);
        let guardrails = self.inner.guardrails.clone();
        Ok(call_bounded(self.inner.guardrails.timeout_ms, move || {
            let output = extractor.extract(&request, &guardrails)?;
            output.validate()?;
            Ok(output)
        })?)
    }

    /// Writes one chapter's output, tracks its claims and marks it extracted, all under one lock.
    /// Returns `None` when another writer extracted the chapter in the meantime.
    fn apply_chapter(
        &self,
        guard: &mut BrainWriteGuard<'_>,
        chapter_id: &str,
        objective: &str,
        run_id: &str,
        output: &ExtractionOutput,
    ) -> Result<Option<Vec<String>>, StorageError> {
        let still_skipped = guard
            .processing_log()?
            .state(chapter_id)
            .map(|state| state.status == ChapterStatus::Skipped)
            .unwrap_or(false);
        if !still_skipped {
            return Ok(None);
        }

        let mut touched = Vec::new();
        for operation in &output.file_operations {
            let path = apply_operation(guard, chapter_id, operation)?;
            if !touched.contains(&path) {
                touched.push(path);
            }
        }
        if self.inner.audit.claim_versioning {
            let now = Utc::now();
            for path in &touched {
                self.inner
                    .ledger
                    .track_file_locked(guard, path, Some(run_id), now)?;
            }
        }

        let reason = if output.summary.trim().is_empty() {
            format!("enriched for: {objective}")
        } else {
            output.summary.trim().to_string()
        };
        guard.update_chapter_state(
            chapter_id,
            ChapterStatus::Extracted,
            Some(reason),
            Some(objective.to_string()),
        )?;
        Ok(Some(touched))
    }
}

fn is_skipped(store: &BrainStore, brain: &str, chapter_id: &str) -> Result<bool, StorageError> {
    Ok(store
        .read_processing_log(brain)?
        .state(chapter_id)
        .map(|state| state.status == ChapterStatus::Skipped)
        .unwrap_or(false))
}

/// `create` merges into an existing file, `update` replaces it, `delete` removes it.
fn apply_operation(
    guard: &mut BrainWriteGuard<'_>,
    chapter_id: &str,
    operation: &FileOperation,
) -> Result<String, StorageError> {
    let path = normalize_knowledge_path(&operation.path)?;
    let mode = match operation.action {
        FileAction::Delete => {
            guard.delete_file(&path)?;
            return Ok(path);
        }
        FileAction::Create => WriteMode::AppendMerge,
        FileAction::Update => WriteMode::Overwrite,
    };

    let mut file = KnowledgeFile::parse(path.clone(), &operation.content);
    if file.metadata.source.is_none() {
        file.metadata.source = Some(format!("chapter_{chapter_id}"));
    }
    let chapter_number = chapter_sort_key(chapter_id).0;
    if file.metadata.last_updated_chapter.is_none() {
        file.metadata.last_updated_chapter = u32::try_from(chapter_number).ok();
    }
    guard.write_file(&path, &file.body, file.metadata, mode)?;
    Ok(path)
}
