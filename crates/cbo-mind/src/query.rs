use crate::config::EngineConfig;
use crate::enrichment::EnrichmentOrchestrator;
use crate::gap::FailedAnswer;
use crate::synthesizer::{AnswerSynthesizer, Synthesis};
use crate::QueryError;
use cbo_audit::{enforce, ClaimAuditor, TraceInput, TraceOutcome};
use cbo_core::capability::{ExtractionCapability, ReasoningCapability};
use cbo_core::claim_contracts::{
    ClaimSnapshot, ProvenancePolicy, QueryMode, RunKind, RunRecord, RunStatus,
};
use cbo_core::job_contracts::JobRegistry;
use cbo_core::query_contracts::{QueryRequest, QueryResponse};
use cbo_retrieval::{FileSelector, GraphExpander};
use cbo_storage::{BrainStore, StorageError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Select, expand, synthesize, audit; then optionally hand a weak answer to enrichment.
pub struct QueryEngine {
    store: Arc<BrainStore>,
    selector: FileSelector,
    expander: GraphExpander,
    synthesizer: AnswerSynthesizer,
    auditor: ClaimAuditor,
    orchestrator: EnrichmentOrchestrator,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(
        store: Arc<BrainStore>,
        reasoner: Arc<dyn ReasoningCapability>,
        extractor: Arc<dyn ExtractionCapability>,
        registry: Arc<dyn JobRegistry>,
        config: EngineConfig,
    ) -> Self {
        let orchestrator = EnrichmentOrchestrator::new(
            Arc::clone(&store),
            registry,
            Arc::clone(&reasoner),
            extractor,
            config.audit.clone(),
            config.enrichment.clone(),
            config.guardrails.clone(),
        );
        Self {
            selector: FileSelector::new(config.selector.clone()),
            expander: GraphExpander::new(config.expander.clone()),
            synthesizer: AnswerSynthesizer::new(reasoner, config.guardrails.clone()),
            auditor: ClaimAuditor::new(config.audit.clone()),
            store,
            orchestrator,
            config,
        }
    }

    pub fn store(&self) -> &BrainStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &EnrichmentOrchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn query(&self, brain: &str, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        if !self.store.brain_exists(brain) {
            return Err(StorageError::not_found(format!("brain {brain}")).into());
        }
        let question = request.question.trim();
        let audit = &self.config.audit;
        let mode = if audit.claim_versioning && audit.query_audit_enabled {
            request.mode
        } else {
            QueryMode::Standard
        };
        let policy = self.auditor.resolve_policy(mode);

        let seeds = self.selector.select_relevant_files(
            &self.store,
            brain,
            question,
            self.config.select_limit,
        )?;
        let expansion = self.expander.expand_seeds(&self.store, brain, &seeds)?;
        let snapshot = if audit.claim_versioning {
            Some(self.store.current_claims(brain)?)
        } else {
            None
        };
        let candidates = match (&snapshot, policy) {
            (Some(snapshot), ProvenancePolicy::Warn | ProvenancePolicy::Strict) => {
                self.auditor
                    .candidate_claims(snapshot, &expansion.files, question)
            }
            _ => Vec::new(),
        };
        let synthesis = self.synthesizer.synthesize(
            &self.store,
            brain,
            question,
            &expansion.files,
            mode,
            candidates,
        )?;
        let mut warnings = synthesis.warnings.clone();

        let outcome = match &snapshot {
            Some(snapshot) if policy != ProvenancePolicy::Off => {
                self.trace(snapshot, question, &synthesis)
            }
            _ => TraceOutcome::default(),
        };
        let policy_warnings = match enforce(policy, &outcome.completeness) {
            Ok(policy_warnings) => policy_warnings,
            Err(err) => {
                if snapshot.is_some() {
                    let mut record =
                        self.run_record(brain, question, mode, policy, &synthesis, &outcome);
                    record.status = RunStatus::Failed;
                    record.warnings = vec![err.to_string()];
                    self.auditor.record_trace(&self.store, &record, &[])?;
                }
                warn!(
                    brain,
                    unlinked = outcome.unlinked_statements.len(),
                    "provenance_violation"
                );
                return Err(err.into());
            }
        };
        warnings.extend(policy_warnings);

        let enrichment_job_id = if request.auto_enrich_on_low_confidence
            && synthesis.confidence <= self.config.enrichment.auto_enrich_below
        {
            self.auto_enrich(brain, question, &synthesis, &mut warnings)
        } else {
            None
        };

        let query_run_id = match &snapshot {
            Some(_) => {
                let mut record =
                    self.run_record(brain, question, mode, policy, &synthesis, &outcome);
                record.warnings = warnings.clone();
                record.job_id = enrichment_job_id.clone();
                match self
                    .auditor
                    .record_trace(&self.store, &record, &outcome.linked_claim_ids)
                {
                    Ok(_) => Some(record.run_id),
                    // Once a job has started its id has to reach the caller.
                    Err(err) if enrichment_job_id.is_some() => {
                        warn!(
                            brain,
                            kind = err.kind(),
                            error = %err,
                            job_id = enrichment_job_id.as_deref().unwrap_or_default(),
                            "query_run_record_failed"
                        );
                        warnings.push(format!("query run was not recorded: {err}"));
                        None
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            None => None,
        };

        info!(
            brain,
            mode = mode.as_str(),
            confidence = synthesis.confidence.as_str(),
            sources = synthesis.sources.len(),
            ratio = outcome.completeness.completeness_ratio,
            run_id = query_run_id.as_deref().unwrap_or("none"),
            "query_answered"
        );
        Ok(QueryResponse {
            answer: synthesis.answer,
            confidence: synthesis.confidence,
            sources: synthesis.sources,
            claim_trace: outcome.claim_trace,
            trace_completeness: outcome.completeness,
            query_run_id,
            trace_degraded: policy == ProvenancePolicy::Off,
            warnings,
            enrichment_job_id,
        })
    }

    /// A no-context answer carries no statements to audit.
    fn trace(&self, snapshot: &ClaimSnapshot, question: &str, synthesis: &Synthesis) -> TraceOutcome {
        if synthesis.context_files.is_empty() {
            return TraceOutcome::default();
        }
        self.auditor.build_trace(
            snapshot,
            TraceInput {
                question,
                answer: &synthesis.answer,
                files: &synthesis.context_files,
                citations: &synthesis.citations,
            },
        )
    }

    fn auto_enrich(
        &self,
        brain: &str,
        question: &str,
        synthesis: &Synthesis,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let failed = FailedAnswer {
            answer: synthesis.answer.clone(),
            confidence: synthesis.confidence,
        };
        match self.orchestrator.trigger_after(brain, question, Some(&failed)) {
            Ok(Some(job_id)) => {
                warnings.push(format!(
                    "enrichment job {job_id} started; re-query once it completes"
                ));
                Some(job_id)
            }
            Ok(None) => {
                debug!(brain, "auto_enrich_nothing_to_do");
                warnings.push("no skipped chapters can improve this answer".to_string());
                None
            }
            Err(err) => {
                warn!(brain, kind = err.kind(), error = %err, "auto_enrich_failed");
                warnings.push(format!("enrichment could not start: {err}"));
                None
            }
        }
    }

    fn run_record(
        &self,
        brain: &str,
        question: &str,
        mode: QueryMode,
        policy: ProvenancePolicy,
        synthesis: &Synthesis,
        outcome: &TraceOutcome,
    ) -> RunRecord {
        RunRecord {
            run_id: RunRecord::new_run_id(RunKind::Query),
            brain: brain.to_string(),
            kind: RunKind::Query,
            mode,
            question: question.to_string(),
            status: RunStatus::Succeeded,
            claim_trace: outcome.claim_trace.clone(),
            trace_completeness: outcome.completeness,
            provenance: policy,
            sources: synthesis.sources.clone(),
            warnings: Vec::new(),
            job_id: None,
            created_at: Utc::now(),
        }
    }
}
