use crate::bounded::call_bounded;
use crate::QueryError;
use cbo_core::brain_contracts::{Confidence, RESPONSE_FILE};
use cbo_core::capability::{
    AnswerRequest, CapabilityGuardrails, ContextFile, ReasoningCapability, StatementCitation,
};
use cbo_core::claim_contracts::{ClaimTraceItem, QueryMode};
use cbo_core::query_contracts::NO_CONTEXT_ANSWER;
use cbo_core::text::truncate_chars;
use cbo_storage::{BrainStore, StorageError};
use std::sync::Arc;
use tracing::{debug, warn};

/// `_response.md` may use at most this fraction (1/n) of the context budget.
const SUMMARY_BUDGET_DIVISOR: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub confidence: Confidence,
    pub sources: Vec<String>,
    pub citations: Vec<StatementCitation>,
    pub warnings: Vec<String>,
    /// Knowledge files actually handed to the capability, in order.
    pub context_files: Vec<String>,
}

impl Synthesis {
    fn no_context() -> Self {
        Self {
            answer: NO_CONTEXT_ANSWER.to_string(),
            confidence: Confidence::None,
            sources: Vec::new(),
            citations: Vec::new(),
            warnings: Vec::new(),
            context_files: Vec::new(),
        }
    }
}

/// Grounds the reasoning capability in expanded brain files and polices what it cites.
pub struct AnswerSynthesizer {
    reasoner: Arc<dyn ReasoningCapability>,
    guardrails: CapabilityGuardrails,
}

impl AnswerSynthesizer {
    pub fn new(reasoner: Arc<dyn ReasoningCapability>, guardrails: CapabilityGuardrails) -> Self {
        Self {
            reasoner,
            guardrails,
        }
    }

    pub fn synthesize(
        &self,
        store: &BrainStore,
        brain: &str,
        question: &str,
        expanded: &[String],
        mode: QueryMode,
        candidate_claims: Vec<ClaimTraceItem>,
    ) -> Result<Synthesis, QueryError> {
        if expanded.is_empty() {
            debug!(brain, "answer_without_context");
            return Ok(Synthesis::no_context());
        }

        let objective = store.objective(brain)?;
        let (context, context_files) = self.build_context(store, brain, expanded)?;
        if context_files.is_empty() {
            debug!(brain, "answer_without_context");
            return Ok(Synthesis::no_context());
        }

        let request = AnswerRequest {
            question: question.to_string(),
            objective,
            context,
            candidate_claims,
            require_citations: mode == QueryMode::Audit,
        };
        let reasoner = Arc::clone(&self.reasoner);
        let guardrails = self.guardrails.clone();
        let draft = call_bounded(self.guardrails.timeout_ms, move || {
            let draft = reasoner.answer(&request, &guardrails)?;
            draft.validate()?;
            Ok(draft)
        })?;

        let mut warnings = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        for source in draft.sources {
            let source = source.trim().to_string();
            if !context_files.contains(&source) {
                warn!(brain, source = %source, "answer_source_outside_context");
                warnings.push(format!("dropped source outside the answering context: {source}"));
                continue;
            }
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        if sources.is_empty() {
            sources = context_files.clone();
        }

        debug!(
            brain,
            context_files = context_files.len(),
            confidence = draft.confidence.as_str(),
            citations = draft.citations.len(),
            "answer_synthesized"
        );
        Ok(Synthesis {
            answer: draft.answer,
            confidence: draft.confidence,
            sources,
            citations: draft.citations,
            warnings,
            context_files,
        })
    }

    /// Objective summary first, then expanded files, within the character budget.
    fn build_context(
        &self,
        store: &BrainStore,
        brain: &str,
        expanded: &[String],
    ) -> Result<(Vec<ContextFile>, Vec<String>), StorageError> {
        let mut remaining = self.guardrails.max_context_chars;
        let mut context = Vec::new();
        let mut context_files = Vec::new();

        if let Some(summary) = store.response_summary(brain)? {
            let summary_budget = remaining / SUMMARY_BUDGET_DIVISOR;
            if !summary.trim().is_empty() && summary_budget > 0 {
                let content = truncate_chars(summary.trim(), summary_budget);
                remaining -= content.chars().count();
                context.push(ContextFile {
                    path: RESPONSE_FILE.to_string(),
                    content,
                });
            }
        }

        for path in expanded {
            if remaining == 0 {
                debug!(brain, path = %path, "context_budget_exhausted");
                break;
            }
            let raw = match store.read_file(brain, path) {
                Ok(raw) => raw,
                Err(StorageError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            let content = truncate_chars(&raw, remaining);
            remaining -= content.chars().count();
            context.push(ContextFile {
                path: path.clone(),
                content,
            });
            context_files.push(path.clone());
        }
        Ok((context, context_files))
    }
}
