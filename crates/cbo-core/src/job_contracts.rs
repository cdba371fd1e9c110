use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_JOB_HISTORY: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobRegistryError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {job_id} is already {status}")]
    TerminalState { job_id: String, status: JobStatus },
    #[error("job {job_id} cannot move to {status}")]
    InvalidTarget { job_id: String, status: JobStatus },
    #[error("job already exists: {0}")]
    Duplicate(String),
    #[error("job registry backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentJob {
    pub job_id: String,
    pub brain_name: String,
    pub question: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default)]
    pub candidate_chapters: Vec<String>,
    #[serde(default)]
    pub processed_chapters: Vec<String>,
}

impl EnrichmentJob {
    pub fn new(
        brain_name: &str,
        question: &str,
        candidate_chapters: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            job_id: format!("enrich_{brain_name}_{}", &suffix[..8]),
            brain_name: brain_name.to_string(),
            question: question.to_string(),
            status: JobStatus::Processing,
            started_at: now,
            completed_at: None,
            error: None,
            candidate_chapters,
            processed_chapters: Vec::new(),
        }
    }

    /// `processing -> completed | failed`; terminal states are immutable.
    pub fn finish(&mut self, outcome: JobOutcome, now: DateTime<Utc>) -> Result<(), JobRegistryError> {
        if self.status.is_terminal() {
            return Err(JobRegistryError::TerminalState {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }
        match outcome.status {
            JobStatus::Processing => {
                return Err(JobRegistryError::InvalidTarget {
                    job_id: self.job_id.clone(),
                    status: outcome.status,
                })
            }
            JobStatus::Completed => self.error = None,
            JobStatus::Failed => self.error = outcome.error,
        }
        self.status = outcome.status;
        self.processed_chapters = outcome.processed_chapters;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub error: Option<String>,
    pub processed_chapters: Vec<String>,
}

impl JobOutcome {
    pub fn completed(processed_chapters: Vec<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            error: None,
            processed_chapters,
        }
    }

    pub fn failed(error: impl Into<String>, processed_chapters: Vec<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.into()),
            processed_chapters,
        }
    }
}

/// Process-wide job registry. Guarded independently of any brain lock.
pub trait JobRegistry: Send + Sync {
    fn create(&self, job: EnrichmentJob) -> Result<(), JobRegistryError>;

    fn finish(
        &self,
        job_id: &str,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentJob, JobRegistryError>;

    fn get(&self, job_id: &str) -> Result<Option<EnrichmentJob>, JobRegistryError>;

    /// Most recent first.
    fn list(&self, brain: Option<&str>, limit: usize)
        -> Result<Vec<EnrichmentJob>, JobRegistryError>;
}
