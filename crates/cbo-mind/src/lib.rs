mod bounded;
pub mod config;
pub mod enrichment;
pub mod gap;
pub mod providers;
pub mod query;
pub mod synthesizer;

pub use config::{EngineConfig, EnrichmentConfig};
pub use enrichment::EnrichmentOrchestrator;
pub use gap::{FailedAnswer, GapDetector, GapReport, NO_SKIPPED_CHAPTERS};
pub use query::QueryEngine;
pub use synthesizer::{AnswerSynthesizer, Synthesis};

use cbo_audit::AuditError;
use cbo_core::capability::CapabilityError;
use cbo_core::job_contracts::JobRegistryError;
use cbo_retrieval::RetrievalError;
use cbo_storage::StorageError;
use thiserror::Error;

const EXTERNAL_CAPABILITY_KIND: &str = "external_capability_error";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

impl QueryError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(err) => err.kind(),
            Self::Retrieval(err) => err.kind(),
            Self::Audit(err) => err.kind(),
            Self::Capability(_) => EXTERNAL_CAPABILITY_KIND,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_retryable(),
            Self::Retrieval(RetrievalError::Storage(err)) => err.is_retryable(),
            Self::Audit(AuditError::Storage(err)) => err.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum GapError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

impl GapError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(err) => err.kind(),
            Self::Capability(_) => EXTERNAL_CAPABILITY_KIND,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("gap detection failed: {0}")]
    Gap(#[from] GapError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
    #[error("job registry error: {0}")]
    Job(#[from] JobRegistryError),
}

impl EnrichmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(err) => err.kind(),
            Self::Gap(err) => err.kind(),
            Self::Capability(_) => EXTERNAL_CAPABILITY_KIND,
            Self::Audit(err) => err.kind(),
            Self::Job(JobRegistryError::NotFound(_)) => "not_found",
            Self::Job(_) => "enrichment_failure",
        }
    }
}
