//! Enrichment job registries: ephemeral (in-memory) and durable (sqlite).

use cbo_core::job_contracts::{
    EnrichmentJob, JobOutcome, JobRegistry, JobRegistryError, JobStatus, DEFAULT_MAX_JOB_HISTORY,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

pub const JOB_SCHEMA_VERSION: i64 = 2;
pub const INTERRUPTED_JOB_ERROR: &str = "interrupted: owning process exited before the job finished";

pub struct InMemoryJobRegistry {
    jobs: Mutex<BTreeMap<String, EnrichmentJob>>,
    max_history: usize,
}

impl Default for InMemoryJobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JOB_HISTORY)
    }
}

impl InMemoryJobRegistry {
    pub fn new(max_history: usize) -> Self {
        Self {
            jobs: Mutex::new(BTreeMap::new()),
            max_history: max_history.max(1),
        }
    }

    fn jobs(&self) -> Result<MutexGuard<'_, BTreeMap<String, EnrichmentJob>>, JobRegistryError> {
        self.jobs
            .lock()
            .map_err(|_| JobRegistryError::Backend("job registry lock poisoned".to_string()))
    }

    fn trim(jobs: &mut BTreeMap<String, EnrichmentJob>, max_history: usize) {
        let mut finished = jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| (job.started_at, job.job_id.clone()))
            .collect::<Vec<_>>();
        if finished.len() <= max_history {
            return;
        }
        finished.sort();
        let excess = finished.len() - max_history;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
        }
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn create(&self, job: EnrichmentJob) -> Result<(), JobRegistryError> {
        let mut jobs = self.jobs()?;
        if jobs.contains_key(&job.job_id) {
            return Err(JobRegistryError::Duplicate(job.job_id));
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    fn finish(
        &self,
        job_id: &str,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentJob, JobRegistryError> {
        let mut jobs = self.jobs()?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobRegistryError::NotFound(job_id.to_string()))?;
        job.finish(outcome, now)?;
        let finished = job.clone();
        Self::trim(&mut jobs, self.max_history);
        Ok(finished)
    }

    fn get(&self, job_id: &str) -> Result<Option<EnrichmentJob>, JobRegistryError> {
        Ok(self.jobs()?.get(job_id).cloned())
    }

    fn list(
        &self,
        brain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EnrichmentJob>, JobRegistryError> {
        let jobs = self.jobs()?;
        let mut listed = jobs
            .values()
            .filter(|job| brain.map(|name| job.brain_name == name).unwrap_or(true))
            .cloned()
            .collect::<Vec<_>>();
        listed.sort_by(|left, right| {
            right
                .started_at
                .cmp(&left.started_at)
                .then_with(|| right.job_id.cmp(&left.job_id))
        });
        listed.truncate(limit);
        Ok(listed)
    }
}

/// Durable registry; job state survives process restarts.
pub struct SqliteJobRegistry {
    conn: Mutex<Connection>,
    max_history: usize,
}

impl SqliteJobRegistry {
    pub fn open(path: impl AsRef<Path>, max_history: usize) -> Result<Self, JobRegistryError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        Self::with_connection(conn, max_history)
    }

    pub fn open_in_memory(max_history: usize) -> Result<Self, JobRegistryError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn, max_history)
    }

    fn with_connection(conn: Connection, max_history: usize) -> Result<Self, JobRegistryError> {
        conn.busy_timeout(std::time::Duration::from_millis(2_000))
            .map_err(backend)?;
        migrate(&conn)?;
        let registry = Self {
            conn: Mutex::new(conn),
            max_history: max_history.max(1),
        };
        registry.recover_interrupted(Utc::now())?;
        Ok(registry)
    }

    /// Fails `processing` jobs whose owning process is gone; returns their ids.
    pub fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<Vec<String>, JobRegistryError> {
        let orphaned = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare("SELECT job_id, owner_pid FROM enrichment_jobs WHERE status = 'processing'")
                .map_err(backend)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
                })
                .map_err(backend)?;
            let mut orphaned = Vec::new();
            for row in rows {
                let (job_id, owner_pid) = row.map_err(backend)?;
                let alive = owner_pid
                    .and_then(|pid| u32::try_from(pid).ok())
                    .map(process_exists)
                    .unwrap_or(false);
                if !alive {
                    orphaned.push(job_id);
                }
            }
            orphaned
        };

        for job_id in &orphaned {
            self.finish(job_id, JobOutcome::failed(INTERRUPTED_JOB_ERROR, Vec::new()), now)?;
            warn!(job_id = %job_id, "interrupted_job_recovered");
        }
        Ok(orphaned)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobRegistryError> {
        self.conn
            .lock()
            .map_err(|_| JobRegistryError::Backend("job registry lock poisoned".to_string()))
    }

    pub fn schema_version(&self) -> Result<i64, JobRegistryError> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(backend)
    }
}

fn migrate(conn: &Connection) -> Result<(), JobRegistryError> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(backend)?;
    if current > JOB_SCHEMA_VERSION {
        return Err(JobRegistryError::Backend(format!(
            "unsupported job schema version {current}, max supported {JOB_SCHEMA_VERSION}"
        )));
    }
    if current < 1 {
        conn.execute_batch(include_str!("../migrations/0001_job_registry.sql"))
            .map_err(backend)?;
        conn.execute("PRAGMA user_version = 1", [])
            .map(|_| ())
            .map_err(backend)?;
    }
    if current < 2 {
        conn.execute_batch(include_str!("../migrations/0002_job_owner.sql"))
            .map_err(backend)?;
        conn.execute("PRAGMA user_version = 2", [])
            .map(|_| ())
            .map_err(backend)?;
    }
    Ok(())
}

/// Without `/proc` liveness is unknown and the owner is assumed alive.
fn process_exists(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    !proc_root.is_dir() || proc_root.join(pid.to_string()).exists()
}

const JOB_COLUMNS: &str = "job_id, brain_name, question, status, started_at, completed_at, error, candidate_chapters_json, processed_chapters_json";

impl JobRegistry for SqliteJobRegistry {
    fn create(&self, job: EnrichmentJob) -> Result<(), JobRegistryError> {
        let conn = self.conn()?;
        let changes = conn
            .execute(
                "
                INSERT OR IGNORE INTO enrichment_jobs (
                    job_id,
                    brain_name,
                    question,
                    status,
                    started_at,
                    completed_at,
                    error,
                    candidate_chapters_json,
                    processed_chapters_json,
                    owner_pid
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ",
                params![
                    job.job_id,
                    job.brain_name,
                    job.question,
                    job.status.as_str(),
                    format_timestamp(job.started_at),
                    job.completed_at.map(format_timestamp),
                    job.error,
                    to_json(&job.candidate_chapters)?,
                    to_json(&job.processed_chapters)?,
                    i64::from(std::process::id()),
                ],
            )
            .map_err(backend)?;
        if changes == 0 {
            return Err(JobRegistryError::Duplicate(job.job_id));
        }
        Ok(())
    }

    fn finish(
        &self,
        job_id: &str,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentJob, JobRegistryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(backend)?;
        let mut job = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM enrichment_jobs WHERE job_id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()
            .map_err(backend)?
            .ok_or_else(|| JobRegistryError::NotFound(job_id.to_string()))??;
        job.finish(outcome, now)?;

        tx.execute(
            "
            UPDATE enrichment_jobs
            SET status = ?2, completed_at = ?3, error = ?4, processed_chapters_json = ?5
            WHERE job_id = ?1
            ",
            params![
                job.job_id,
                job.status.as_str(),
                job.completed_at.map(format_timestamp),
                job.error,
                to_json(&job.processed_chapters)?,
            ],
        )
        .map_err(backend)?;
        tx.execute(
            "
            DELETE FROM enrichment_jobs
            WHERE job_id IN (
                SELECT job_id FROM enrichment_jobs
                WHERE status != 'processing'
                ORDER BY started_at DESC, job_id DESC
                LIMIT -1 OFFSET ?1
            )
            ",
            params![self.max_history as i64],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(job)
    }

    fn get(&self, job_id: &str) -> Result<Option<EnrichmentJob>, JobRegistryError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM enrichment_jobs WHERE job_id = ?1"),
            params![job_id],
            job_from_row,
        )
        .optional()
        .map_err(backend)?
        .transpose()
    }

    fn list(
        &self,
        brain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EnrichmentJob>, JobRegistryError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "
                SELECT {JOB_COLUMNS} FROM enrichment_jobs
                WHERE (?1 IS NULL OR brain_name = ?1)
                ORDER BY started_at DESC, job_id DESC
                LIMIT ?2
                "
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![brain, limit as i64], job_from_row)
            .map_err(backend)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(backend)??);
        }
        Ok(jobs)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Result<EnrichmentJob, JobRegistryError>> {
    let job_id: String = row.get(0)?;
    let brain_name: String = row.get(1)?;
    let question: String = row.get(2)?;
    let status: String = row.get(3)?;
    let started_at: String = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;
    let error: Option<String> = row.get(6)?;
    let candidate_chapters: String = row.get(7)?;
    let processed_chapters: String = row.get(8)?;

    let Some(parsed_status) = JobStatus::parse(&status) else {
        return Ok(Err(JobRegistryError::Backend(format!(
            "unknown job status {status} for {job_id}"
        ))));
    };
    Ok(decode_job(
        job_id,
        brain_name,
        question,
        parsed_status,
        &started_at,
        completed_at.as_deref(),
        error,
        &candidate_chapters,
        &processed_chapters,
    ))
}

#[allow(clippy::too_many_arguments)]
fn decode_job(
    job_id: String,
    brain_name: String,
    question: String,
    status: JobStatus,
    started_at: &str,
    completed_at: Option<&str>,
    error: Option<String>,
    candidate_chapters: &str,
    processed_chapters: &str,
) -> Result<EnrichmentJob, JobRegistryError> {
    Ok(EnrichmentJob {
        job_id,
        brain_name,
        question,
        status,
        started_at: parse_timestamp(started_at)?,
        completed_at: completed_at.map(parse_timestamp).transpose()?,
        error,
        candidate_chapters: from_json(candidate_chapters)?,
        processed_chapters: from_json(processed_chapters)?,
    })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, JobRegistryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| JobRegistryError::Backend(format!("timestamp parse error: {err}")))
}

fn to_json(values: &[String]) -> Result<String, JobRegistryError> {
    serde_json::to_string(values).map_err(|err| JobRegistryError::Backend(err.to_string()))
}

fn from_json(raw: &str) -> Result<Vec<String>, JobRegistryError> {
    serde_json::from_str(raw).map_err(|err| JobRegistryError::Backend(err.to_string()))
}

fn backend(err: impl std::fmt::Display) -> JobRegistryError {
    JobRegistryError::Backend(err.to_string())
}
