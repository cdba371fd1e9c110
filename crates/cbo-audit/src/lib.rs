pub mod claims;
pub mod policy;
pub mod trace;

pub use claims::{extract_claims, ClaimFilter, ClaimHistory, ClaimLedger, ExtractedClaim, TrackReport};
pub use policy::{enforce, resolve_policy};
pub use trace::{completeness, split_statements, ClaimAuditor, TraceInput, TraceOutcome};

use cbo_core::claim_contracts::ProvenancePolicy;
use cbo_storage::StorageError;
use thiserror::Error;

const DEFAULT_MAX_CLAIMS_PER_FILE: usize = 3;
const DEFAULT_MAX_TRACE_ITEMS: usize = 50;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("provenance violation: {unlinked} of {total} statements lack a linked claim")]
    ProvenanceViolation { unlinked: usize, total: usize },
}

impl AuditError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(err) => err.kind(),
            Self::ProvenanceViolation { .. } => "provenance_violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// Track claim versions for written files and record query runs.
    pub claim_versioning: bool,
    /// Expose audited queries; when off every query resolves to `standard`.
    pub query_audit_enabled: bool,
    pub provenance: ProvenancePolicy,
    pub max_claims_per_file: usize,
    pub max_trace_items: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            claim_versioning: true,
            query_audit_enabled: true,
            provenance: ProvenancePolicy::Warn,
            max_claims_per_file: DEFAULT_MAX_CLAIMS_PER_FILE,
            max_trace_items: DEFAULT_MAX_TRACE_ITEMS,
        }
    }
}
