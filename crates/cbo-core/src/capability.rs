//! Contracts for the external reasoning and extraction capabilities.

use crate::brain_contracts::Confidence;
use crate::claim_contracts::ClaimTraceItem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityFailureKind {
    Timeout,
    InvalidOutput,
    Unavailable,
    ProviderError,
}

impl CapabilityFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::InvalidOutput => "invalid_output",
            Self::Unavailable => "unavailable",
            Self::ProviderError => "provider_error",
        }
    }
}

impl std::fmt::Display for CapabilityFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("capability error ({kind}): {message}")]
pub struct CapabilityError {
    pub kind: CapabilityFailureKind,
    pub message: String,
}

impl CapabilityError {
    pub fn new(kind: CapabilityFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            CapabilityFailureKind::Timeout,
            format!("no response within {timeout_ms}ms"),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityGuardrails {
    pub timeout_ms: u64,
    pub max_context_chars: usize,
}

impl Default for CapabilityGuardrails {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_context_chars: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub context: Vec<ContextFile>,
    /// Present only in audited mode; citations must refer to these ids.
    #[serde(default)]
    pub candidate_claims: Vec<ClaimTraceItem>,
    #[serde(default)]
    pub require_citations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StatementCitation {
    pub statement: String,
    #[serde(default)]
    pub claim_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AnswerDraft {
    pub answer: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub citations: Vec<StatementCitation>,
}

impl AnswerDraft {
    pub fn validate(&self) -> Result<(), CapabilityError> {
        if self.answer.trim().is_empty() {
            return Err(CapabilityError::new(
                CapabilityFailureKind::InvalidOutput,
                "answer must be non-empty",
            ));
        }
        if self.sources.iter().any(|source| source.trim().is_empty()) {
            return Err(CapabilityError::new(
                CapabilityFailureKind::InvalidOutput,
                "answer sources cannot contain empty paths",
            ));
        }
        Ok(())
    }

    pub fn parse_json(raw: &str) -> Result<Self, CapabilityError> {
        let draft = serde_json::from_str::<Self>(raw).map_err(|err| {
            CapabilityError::new(
                CapabilityFailureKind::InvalidOutput,
                format!("answer output parse error: {err}"),
            )
        })?;
        draft.validate()?;
        Ok(draft)
    }
}

/// What the gap detector knows about a skipped chapter without reading it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterDigest {
    pub chapter_id: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub index_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RelevanceVerdict {
    pub relevant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub brain: String,
    pub chapter_id: String,
    pub objective: String,
    #[serde(default)]
    pub existing_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileOperation {
    pub action: FileAction,
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExtractionOutput {
    #[serde(default)]
    pub file_operations: Vec<FileOperation>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_entities: Vec<String>,
}

impl ExtractionOutput {
    pub fn validate(&self) -> Result<(), CapabilityError> {
        for operation in &self.file_operations {
            if operation.path.trim().is_empty() {
                return Err(CapabilityError::new(
                    CapabilityFailureKind::InvalidOutput,
                    "file operation path must be non-empty",
                ));
            }
            if operation.action != FileAction::Delete && operation.content.trim().is_empty() {
                return Err(CapabilityError::new(
                    CapabilityFailureKind::InvalidOutput,
                    format!("file operation for {} has no content", operation.path),
                ));
            }
        }
        Ok(())
    }

    pub fn parse_json(raw: &str) -> Result<Self, CapabilityError> {
        let output = serde_json::from_str::<Self>(raw).map_err(|err| {
            CapabilityError::new(
                CapabilityFailureKind::InvalidOutput,
                format!("extraction output parse error: {err}"),
            )
        })?;
        output.validate()?;
        Ok(output)
    }
}

/// Answers questions strictly from supplied context and classifies chapter relevance.
pub trait ReasoningCapability: Send + Sync {
    fn answer(
        &self,
        request: &AnswerRequest,
        guardrails: &CapabilityGuardrails,
    ) -> Result<AnswerDraft, CapabilityError>;

    fn classify_relevance(
        &self,
        chapter: &ChapterDigest,
        objective: &str,
        guardrails: &CapabilityGuardrails,
    ) -> Result<bool, CapabilityError>;
}

/// Re-runs knowledge extraction for one chapter against an objective.
pub trait ExtractionCapability: Send + Sync {
    fn extract(
        &self,
        request: &ExtractionRequest,
        guardrails: &CapabilityGuardrails,
    ) -> Result<ExtractionOutput, CapabilityError>;
}
