use cbo_audit::AuditConfig;
use cbo_core::brain_contracts::Confidence;
use cbo_core::capability::CapabilityGuardrails;
use cbo_core::claim_contracts::ProvenancePolicy;
use cbo_mind::{EngineConfig, EnrichmentConfig};
use cbo_storage::StoreConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_JOB_HISTORY: usize = 200;
const JOB_DB_FILE: &str = ".cbo-jobs.sqlite";

/// On-disk `config.toml`; every field is optional.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub brains_dir: Option<String>,
    pub chapters_dir: Option<String>,
    pub audit: AuditSection,
    pub jobs: JobsSection,
    pub store: StoreSection,
    pub capability: CapabilitySection,
    pub enrichment: EnrichmentSection,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditSection {
    pub claim_versioning: Option<bool>,
    pub query_audit: Option<bool>,
    pub provenance: Option<String>,
    pub max_claims_per_file: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsSection {
    pub backend: Option<String>,
    pub path: Option<String>,
    pub max_history: Option<usize>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSection {
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CapabilitySection {
    pub timeout_ms: Option<u64>,
    pub max_context_chars: Option<usize>,
    pub reasoner_cmd: Option<String>,
    pub extractor_cmd: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentSection {
    pub auto_enrich_below: Option<String>,
    pub max_chapters_per_job: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobBackend {
    Memory,
    Sqlite,
}

impl JobBackend {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Self::Memory,
            _ => Self::Sqlite,
        }
    }
}

/// Fully resolved settings: file values, then environment overrides, then defaults.
#[derive(Clone, Debug)]
pub struct Settings {
    pub brains_dir: PathBuf,
    pub chapters_dir: PathBuf,
    pub job_backend: JobBackend,
    pub job_db_path: PathBuf,
    pub max_job_history: usize,
    pub reasoner_cmd: Option<String>,
    pub extractor_cmd: Option<String>,
    pub store: StoreConfig,
    pub engine: EngineConfig,
}

impl Settings {
    pub fn load() -> Self {
        let file = load_file_config(&config_path()).unwrap_or_default();
        Self::resolve(file, |key| env::var(key).ok())
    }

    pub fn resolve(mut file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        apply_env_overrides(&mut file, &lookup);

        let brains_dir = file
            .brains_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("brains"));
        let chapters_dir = file
            .chapters_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("chapters"));
        let job_db_path = file
            .jobs
            .path
            .map(PathBuf::from)
            .unwrap_or_else(|| brains_dir.join(JOB_DB_FILE));

        let audit_defaults = AuditConfig::default();
        let audit = AuditConfig {
            claim_versioning: file
                .audit
                .claim_versioning
                .unwrap_or(audit_defaults.claim_versioning),
            query_audit_enabled: file
                .audit
                .query_audit
                .unwrap_or(audit_defaults.query_audit_enabled),
            provenance: file
                .audit
                .provenance
                .as_deref()
                .map(ProvenancePolicy::parse_lenient)
                .unwrap_or(audit_defaults.provenance),
            max_claims_per_file: file
                .audit
                .max_claims_per_file
                .unwrap_or(audit_defaults.max_claims_per_file),
            ..audit_defaults
        };

        let guardrail_defaults = CapabilityGuardrails::default();
        let guardrails = CapabilityGuardrails {
            timeout_ms: file
                .capability
                .timeout_ms
                .unwrap_or(guardrail_defaults.timeout_ms),
            max_context_chars: file
                .capability
                .max_context_chars
                .unwrap_or(guardrail_defaults.max_context_chars),
        };

        let enrichment_defaults = EnrichmentConfig::default();
        let enrichment = EnrichmentConfig {
            auto_enrich_below: file
                .enrichment
                .auto_enrich_below
                .as_deref()
                .and_then(|value| value.parse::<Confidence>().ok())
                .unwrap_or(enrichment_defaults.auto_enrich_below),
            max_chapters_per_job: file
                .enrichment
                .max_chapters_per_job
                .unwrap_or(enrichment_defaults.max_chapters_per_job),
        };

        let store_defaults = StoreConfig::default();
        let store = StoreConfig {
            lock_timeout_ms: file
                .store
                .lock_timeout_ms
                .unwrap_or(store_defaults.lock_timeout_ms),
            ..store_defaults
        };

        Self {
            brains_dir,
            chapters_dir,
            job_backend: file
                .jobs
                .backend
                .as_deref()
                .map(JobBackend::parse)
                .unwrap_or(JobBackend::Sqlite),
            job_db_path,
            max_job_history: file.jobs.max_history.unwrap_or(DEFAULT_MAX_JOB_HISTORY),
            reasoner_cmd: non_empty(file.capability.reasoner_cmd),
            extractor_cmd: non_empty(file.capability.extractor_cmd),
            store,
            engine: EngineConfig {
                audit,
                guardrails,
                enrichment,
                ..EngineConfig::default()
            },
        }
    }
}

fn apply_env_overrides(file: &mut FileConfig, lookup: &impl Fn(&str) -> Option<String>) {
    let text = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let flag = |key: &str| text(key).and_then(|value| parse_bool_flag(&value));
    let number = |key: &str| text(key).and_then(|value| value.trim().parse::<u64>().ok());

    if let Some(value) = text("CBO_BRAINS_DIR") {
        file.brains_dir = Some(value);
    }
    if let Some(value) = text("CBO_CHAPTERS_DIR") {
        file.chapters_dir = Some(value);
    }
    if let Some(value) = flag("CBO_ENABLE_CLAIM_VERSIONING") {
        file.audit.claim_versioning = Some(value);
    }
    if let Some(value) = flag("CBO_ENABLE_QUERY_AUDIT") {
        file.audit.query_audit = Some(value);
    }
    if let Some(value) = text("CBO_PROVENANCE_ENFORCEMENT") {
        file.audit.provenance = Some(value);
    }
    if let Some(value) = text("CBO_JOB_STORE_BACKEND") {
        file.jobs.backend = Some(value);
    }
    if let Some(value) = text("CBO_JOB_STORE_PATH") {
        file.jobs.path = Some(value);
    }
    if let Some(value) = number("CBO_MAX_JOB_HISTORY") {
        file.jobs.max_history = usize::try_from(value).ok();
    }
    if let Some(value) = number("CBO_LOCK_TIMEOUT_MS") {
        file.store.lock_timeout_ms = Some(value);
    }
    if let Some(value) = number("CBO_CAPABILITY_TIMEOUT_MS") {
        file.capability.timeout_ms = Some(value);
    }
    if let Some(value) = text("CBO_REASONER_CMD") {
        file.capability.reasoner_cmd = Some(value);
    }
    if let Some(value) = text("CBO_EXTRACTOR_CMD") {
        file.capability.extractor_cmd = Some(value);
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn load_file_config(path: &Path) -> io::Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    let config = toml::from_str(&contents).unwrap_or_default();
    Ok(config)
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = env::var("CBO_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cognitive-book-os/config.toml")
}
