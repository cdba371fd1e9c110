use cbo_audit::AuditConfig;
use cbo_core::brain_contracts::Confidence;
use cbo_core::capability::CapabilityGuardrails;
use cbo_retrieval::{ExpanderConfig, SelectorConfig};

const DEFAULT_SELECT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentConfig {
    /// Auto-enrich fires when an answer's confidence is at or below this level.
    pub auto_enrich_below: Confidence,
    /// Upper bound on chapters processed per job; 0 means every candidate.
    pub max_chapters_per_job: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            auto_enrich_below: Confidence::Low,
            max_chapters_per_job: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub select_limit: usize,
    pub selector: SelectorConfig,
    pub expander: ExpanderConfig,
    pub audit: AuditConfig,
    pub guardrails: CapabilityGuardrails,
    pub enrichment: EnrichmentConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            select_limit: DEFAULT_SELECT_LIMIT,
            selector: SelectorConfig::default(),
            expander: ExpanderConfig::default(),
            audit: AuditConfig::default(),
            guardrails: CapabilityGuardrails::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}
