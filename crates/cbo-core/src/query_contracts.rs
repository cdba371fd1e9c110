use crate::brain_contracts::Confidence;
use crate::claim_contracts::{ClaimTraceItem, QueryMode, TraceCompleteness};
use serde::{Deserialize, Serialize};

pub const NO_CONTEXT_ANSWER: &str = "I couldn't find relevant information in the current brain.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub auto_enrich_on_low_confidence: bool,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            question: question.into(),
            mode,
            auto_enrich_on_low_confidence: false,
        }
    }

    pub fn with_auto_enrich(mut self, enabled: bool) -> Self {
        self.auto_enrich_on_low_confidence = enabled;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub answer: String,
    pub confidence: Confidence,
    pub sources: Vec<String>,
    pub claim_trace: Vec<ClaimTraceItem>,
    pub trace_completeness: TraceCompleteness,
    pub query_run_id: Option<String>,
    pub trace_degraded: bool,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_job_id: Option<String>,
}
