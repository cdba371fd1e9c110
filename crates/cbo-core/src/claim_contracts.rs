use crate::brain_contracts::Confidence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const CLAIM_ID_PREFIX: &str = "clm_";
pub const CLAIM_ID_HASH_LEN: usize = 12;
pub const NOTES_PREFIX: &str = "notes/";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Superseded,
    Retired,
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Retired => "retired",
        }
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            "retired" => Ok(Self::Retired),
            other => Err(format!("unknown claim status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claim {
    pub claim_id: String,
    pub brain: String,
    pub file_path: String,
    pub claim_text: String,
    #[serde(default)]
    pub evidence_quote: String,
    #[serde(default)]
    pub source_locator: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub user_override: bool,
    pub status: ClaimStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl Claim {
    pub fn has_evidence(&self) -> bool {
        !self.evidence_quote.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ClaimEventKind {
    ClaimInserted,
    ClaimSuperseded,
    ClaimRetired,
    ProvenanceWarning,
    ClaimCited,
}

impl ClaimEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaimInserted => "claim_inserted",
            Self::ClaimSuperseded => "claim_superseded",
            Self::ClaimRetired => "claim_retired",
            Self::ProvenanceWarning => "provenance_warning",
            Self::ClaimCited => "claim_cited",
        }
    }
}

impl fmt::Display for ClaimEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line of `claims_events.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimEvent {
    pub event_id: String,
    pub kind: ClaimEventKind,
    pub brain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub ts: DateTime<Utc>,
}

impl ClaimEvent {
    fn base(kind: ClaimEventKind, brain: &str, ts: DateTime<Utc>) -> Self {
        Self {
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            kind,
            brain: brain.to_string(),
            claim_id: None,
            file_path: None,
            run_id: None,
            claim: None,
            supersedes: None,
            detail: None,
            ts,
        }
    }

    pub fn inserted(claim: Claim, ts: DateTime<Utc>) -> Self {
        let mut event = Self::base(ClaimEventKind::ClaimInserted, &claim.brain, ts);
        event.claim_id = Some(claim.claim_id.clone());
        event.file_path = Some(claim.file_path.clone());
        event.run_id = claim.run_id.clone();
        event.claim = Some(claim);
        event
    }

    pub fn superseded(claim: Claim, previous_claim_id: &str, ts: DateTime<Utc>) -> Self {
        let mut event = Self::inserted(claim, ts);
        event.kind = ClaimEventKind::ClaimSuperseded;
        event.supersedes = Some(previous_claim_id.to_string());
        event
    }

    pub fn retired(
        brain: &str,
        claim_id: &str,
        file_path: &str,
        run_id: Option<&str>,
        ts: DateTime<Utc>,
    ) -> Self {
        let mut event = Self::base(ClaimEventKind::ClaimRetired, brain, ts);
        event.claim_id = Some(claim_id.to_string());
        event.file_path = Some(file_path.to_string());
        event.run_id = run_id.map(str::to_string);
        event
    }

    pub fn provenance_warning(
        brain: &str,
        file_path: &str,
        claim_id: Option<&str>,
        detail: impl Into<String>,
        ts: DateTime<Utc>,
    ) -> Self {
        let mut event = Self::base(ClaimEventKind::ProvenanceWarning, brain, ts);
        event.file_path = Some(file_path.to_string());
        event.claim_id = claim_id.map(str::to_string);
        event.detail = Some(detail.into());
        event
    }

    pub fn cited(brain: &str, claim_id: &str, run_id: &str, ts: DateTime<Utc>) -> Self {
        let mut event = Self::base(ClaimEventKind::ClaimCited, brain, ts);
        event.claim_id = Some(claim_id.to_string());
        event.run_id = Some(run_id.to_string());
        event
    }
}

/// Current view of all claims derived from the event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClaimSnapshot {
    pub claims: BTreeMap<String, Claim>,
    pub event_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClaimSnapshot {
    pub fn get(&self, claim_id: &str) -> Option<&Claim> {
        self.claims.get(claim_id)
    }

    pub fn active_for_path(&self, file_path: &str) -> Vec<&Claim> {
        let mut claims = self
            .claims
            .values()
            .filter(|claim| claim.file_path == file_path && claim.status == ClaimStatus::Active)
            .collect::<Vec<_>>();
        sort_by_recency(&mut claims);
        claims
    }

    pub fn active(&self) -> Vec<&Claim> {
        let mut claims = self
            .claims
            .values()
            .filter(|claim| claim.status == ClaimStatus::Active)
            .collect::<Vec<_>>();
        sort_by_recency(&mut claims);
        claims
    }

    /// Recorded versions are immutable; a repeated id never replaces the first record.
    fn record_new(&mut self, claim: &Claim) {
        self.claims
            .entry(claim.claim_id.clone())
            .or_insert_with(|| claim.clone());
    }

    pub fn apply(&mut self, event: &ClaimEvent) {
        self.event_count += 1;
        self.updated_at = Some(event.ts);
        match event.kind {
            ClaimEventKind::ClaimInserted => {
                if let Some(claim) = &event.claim {
                    self.record_new(claim);
                }
            }
            ClaimEventKind::ClaimSuperseded => {
                if let Some(previous) = event
                    .supersedes
                    .as_deref()
                    .and_then(|id| self.claims.get_mut(id))
                {
                    previous.status = ClaimStatus::Superseded;
                }
                if let Some(claim) = &event.claim {
                    self.record_new(claim);
                }
            }
            ClaimEventKind::ClaimRetired => {
                if let Some(claim) = event
                    .claim_id
                    .as_deref()
                    .and_then(|id| self.claims.get_mut(id))
                {
                    claim.status = ClaimStatus::Retired;
                }
            }
            ClaimEventKind::ProvenanceWarning | ClaimEventKind::ClaimCited => {}
        }
    }
}

/// Ordered, append-only sequence of claim events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimEventLog {
    events: Vec<ClaimEvent>,
}

impl ClaimEventLog {
    pub fn from_events(events: Vec<ClaimEvent>) -> Self {
        Self { events }
    }

    pub fn push(&mut self, event: ClaimEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[ClaimEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn project(&self) -> ClaimSnapshot {
        let mut snapshot = ClaimSnapshot::default();
        for event in &self.events {
            snapshot.apply(event);
        }
        snapshot
    }

    pub fn events_for_claim(&self, claim_id: &str) -> Vec<&ClaimEvent> {
        self.events
            .iter()
            .filter(|event| {
                event.claim_id.as_deref() == Some(claim_id)
                    || event.supersedes.as_deref() == Some(claim_id)
            })
            .collect()
    }
}

/// Newest first, ties broken by claim id.
pub fn sort_by_recency(claims: &mut [&Claim]) {
    claims.sort_by(|left, right| {
        right
            .extracted_at
            .cmp(&left.extracted_at)
            .then_with(|| left.claim_id.cmp(&right.claim_id))
    });
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTraceItem {
    pub claim_id: String,
    pub file_path: String,
    pub claim_text: String,
    pub evidence_quote: String,
    pub source_locator: String,
    pub confidence: Confidence,
    pub user_override: bool,
}

impl From<&Claim> for ClaimTraceItem {
    fn from(claim: &Claim) -> Self {
        Self {
            claim_id: claim.claim_id.clone(),
            file_path: claim.file_path.clone(),
            claim_text: claim.claim_text.clone(),
            evidence_quote: claim.evidence_quote.clone(),
            source_locator: claim.source_locator.clone(),
            confidence: claim.confidence,
            user_override: claim.user_override,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraceCompleteness {
    pub total_statements: usize,
    pub linked_statements: usize,
    pub completeness_ratio: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    #[default]
    Standard,
    Audit,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Audit => "audit",
        }
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "audit" => Ok(Self::Audit),
            other => Err(format!("unknown query mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvenancePolicy {
    #[default]
    Warn,
    Strict,
    Off,
}

impl ProvenancePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Strict => "strict",
            Self::Off => "off",
        }
    }

    /// Unknown values fall back to `warn`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Self::Strict,
            "off" => Self::Off,
            _ => Self::Warn,
        }
    }
}

impl fmt::Display for ProvenancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Query,
    Enrichment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// One immutable line of `runs.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub brain: String,
    pub kind: RunKind,
    pub mode: QueryMode,
    pub question: String,
    pub status: RunStatus,
    #[serde(default)]
    pub claim_trace: Vec<ClaimTraceItem>,
    #[serde(default)]
    pub trace_completeness: TraceCompleteness,
    #[serde(default)]
    pub provenance: ProvenancePolicy,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new_run_id(kind: RunKind) -> String {
        let prefix = match kind {
            RunKind::Query => "run",
            RunKind::Enrichment => "enr",
        };
        format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
    }
}
