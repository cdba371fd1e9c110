pub mod jobs;
mod lock;

pub use jobs::{InMemoryJobRegistry, SqliteJobRegistry};
pub use lock::LeaseRecord;

use cbo_core::brain_contracts::{
    category_of, file_stem, normalize_knowledge_path, validate_brain_name, BrainContractError,
    ChapterStatus, FileMetadata, IndexedFile, KnowledgeFile, ProcessingLog, ProcessingSummary,
    META_DIR, OBJECTIVE_FILE, PROCESSING_LOG_FILE, RESPONSE_FILE, KNOWLEDGE_CATEGORIES,
    INDEX_FILE,
};
use cbo_core::claim_contracts::{ClaimEvent, ClaimEventLog, ClaimSnapshot, RunRecord};
use chrono::{DateTime, Utc};
use lock::{BrainLeaseFile, BrainLockTable, BrainSlot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const CLAIM_EVENTS_FILE: &str = "claims_events.jsonl";
pub const CLAIMS_CURRENT_FILE: &str = "claims_current.json";
pub const RUNS_FILE: &str = "runs.jsonl";
pub const LOCK_FILE: &str = "brain.lock";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("contract error: {0}")]
    Contract(#[from] BrainContractError),
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("brain already exists: {0}")]
    AlreadyExists(String),
    #[error("timed out after {waited_ms}ms waiting for the write lock on brain {brain}")]
    LockTimeout { brain: String, waited_ms: u64 },
}

impl StorageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "corrupt_state",
            Self::Contract(BrainContractError::IllegalTransition { .. }) => "illegal_transition",
            Self::Contract(_) => "invalid_request",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::LockTimeout { .. } => "lock_timeout",
        }
    }

    /// Lock contention is the only storage failure worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub lock_timeout_ms: u64,
    pub lock_poll_ms: u64,
    pub lease_ttl_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            lock_poll_ms: 25,
            lease_ttl_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Overwrite,
    AppendMerge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub path: String,
    pub created: bool,
    pub bytes_written: usize,
}

/// File-backed collection of brains rooted at one directory.
pub struct BrainStore {
    root: PathBuf,
    config: StoreConfig,
    locks: Arc<BrainLockTable>,
    owner_id: String,
}

impl BrainStore {
    pub fn open(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            config,
            locks: Arc::new(BrainLockTable::default()),
            owner_id: format!("cbo-{}-{}", std::process::id(), short_uuid()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn brain_root(&self, brain: &str) -> Result<PathBuf, StorageError> {
        let name = validate_brain_name(brain)?;
        Ok(self.root.join(name))
    }

    pub fn brain_exists(&self, brain: &str) -> bool {
        self.brain_root(brain)
            .map(|path| path.is_dir())
            .unwrap_or(false)
    }

    fn existing_brain_root(&self, brain: &str) -> Result<PathBuf, StorageError> {
        let root = self.brain_root(brain)?;
        if !root.is_dir() {
            return Err(StorageError::not_found(format!("brain {brain}")));
        }
        Ok(root)
    }

    pub fn list_brains(&self) -> Result<Vec<String>, StorageError> {
        let mut brains = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_brain_name(&name).is_ok() {
                brains.push(name);
            }
        }
        brains.sort();
        Ok(brains)
    }

    pub fn create_brain(&self, brain: &str, objective: &str) -> Result<PathBuf, StorageError> {
        let root = self.brain_root(brain)?;
        if root.is_dir() {
            return Err(StorageError::AlreadyExists(brain.to_string()));
        }
        for category in KNOWLEDGE_CATEGORIES {
            fs::create_dir_all(root.join(category))?;
        }
        fs::create_dir_all(root.join(META_DIR))?;

        self.with_write_lock(brain, |guard| {
            write_atomic(
                &root.join(OBJECTIVE_FILE),
                format!("# Objective\n\n{}\n", objective.trim()).as_bytes(),
            )?;
            write_atomic(
                &root.join(INDEX_FILE),
                format!("# {brain}\n\nObjective: {}\n", objective.trim()).as_bytes(),
            )?;
            guard.write_processing_log(&ProcessingLog::new(objective.trim()))
        })?;
        debug!(brain, "brain_created");
        Ok(root)
    }

    pub fn objective(&self, brain: &str) -> Result<String, StorageError> {
        let log = self.read_processing_log(brain)?;
        if !log.objective.trim().is_empty() {
            return Ok(log.objective);
        }
        let root = self.existing_brain_root(brain)?;
        Ok(read_optional(&root.join(OBJECTIVE_FILE))?
            .map(|raw| {
                raw.trim()
                    .trim_start_matches("# Objective")
                    .trim()
                    .to_string()
            })
            .unwrap_or_default())
    }

    /// Objective-level synthesis (`_response.md`), when one has been written.
    pub fn response_summary(&self, brain: &str) -> Result<Option<String>, StorageError> {
        let root = self.existing_brain_root(brain)?;
        read_optional(&root.join(RESPONSE_FILE))
    }

    pub fn read_file(&self, brain: &str, path: &str) -> Result<String, StorageError> {
        let root = self.existing_brain_root(brain)?;
        let relative = normalize_knowledge_path(path)?;
        read_optional(&root.join(&relative))?
            .ok_or_else(|| StorageError::not_found(format!("file {relative} in brain {brain}")))
    }

    pub fn read_knowledge_file(
        &self,
        brain: &str,
        path: &str,
    ) -> Result<KnowledgeFile, StorageError> {
        let relative = normalize_knowledge_path(path)?;
        let raw = self.read_file(brain, &relative)?;
        Ok(KnowledgeFile::parse(relative, &raw))
    }

    pub fn file_exists(&self, brain: &str, path: &str) -> bool {
        let (Ok(root), Ok(relative)) = (self.brain_root(brain), normalize_knowledge_path(path))
        else {
            return false;
        };
        root.join(relative).is_file()
    }

    /// Sorted brain-relative paths of every knowledge file.
    pub fn list_files(&self, brain: &str) -> Result<Vec<String>, StorageError> {
        let root = self.existing_brain_root(brain)?;
        let mut files = Vec::new();
        collect_markdown(&root, &root, &mut files)?;
        files.sort();
        Ok(files)
    }

    pub fn knowledge_index(&self, brain: &str) -> Result<Vec<IndexedFile>, StorageError> {
        let root = self.existing_brain_root(brain)?;
        let mut index = Vec::new();
        for path in self.list_files(brain)? {
            let absolute = root.join(&path);
            let Some(raw) = read_optional(&absolute)? else {
                continue;
            };
            let file = KnowledgeFile::parse(path.clone(), &raw);
            let modified_at = fs::metadata(&absolute)
                .and_then(|meta| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            index.push(IndexedFile {
                category: category_of(&path),
                title: file_stem(&path),
                path,
                metadata: file.metadata,
                modified_at,
            });
        }
        Ok(index)
    }

    pub fn read_processing_log(&self, brain: &str) -> Result<ProcessingLog, StorageError> {
        let root = self.existing_brain_root(brain)?;
        let path = root.join(META_DIR).join(PROCESSING_LOG_FILE);
        Ok(read_json::<ProcessingLog>(&path)?.unwrap_or_default())
    }

    pub fn processing_summary(&self, brain: &str) -> Result<ProcessingSummary, StorageError> {
        let log = self.read_processing_log(brain)?;
        Ok(ProcessingSummary {
            brain_name: brain.to_string(),
            objective: log.objective.clone(),
            secondary_objectives: log.secondary_objectives.clone(),
            counts: log.status_counts(),
            skipped_chapters: log.chapters_with_status(ChapterStatus::Skipped),
            file_count: self.list_files(brain)?.len(),
        })
    }

    pub fn read_claim_events(&self, brain: &str) -> Result<ClaimEventLog, StorageError> {
        let root = self.existing_brain_root(brain)?;
        let events = read_jsonl::<ClaimEvent>(&root.join(META_DIR).join(CLAIM_EVENTS_FILE))?;
        Ok(ClaimEventLog::from_events(events))
    }

    /// Reads the persisted projection, rebuilding it from the event log when missing or stale.
    pub fn current_claims(&self, brain: &str) -> Result<ClaimSnapshot, StorageError> {
        let root = self.existing_brain_root(brain)?;
        let events = self.read_claim_events(brain)?;
        let snapshot_path = root.join(META_DIR).join(CLAIMS_CURRENT_FILE);
        match read_json::<ClaimSnapshot>(&snapshot_path) {
            Ok(Some(snapshot)) if snapshot.event_count == events.len() => Ok(snapshot),
            Ok(_) => Ok(events.project()),
            Err(err) => {
                warn!(brain, error = %err, "claims_projection_unreadable");
                Ok(events.project())
            }
        }
    }

    pub fn read_runs(&self, brain: &str) -> Result<Vec<RunRecord>, StorageError> {
        let root = self.existing_brain_root(brain)?;
        read_jsonl::<RunRecord>(&root.join(META_DIR).join(RUNS_FILE))
    }

    /// Runs `f` while holding the brain's exclusive write lock.
    pub fn with_write_lock<T, F>(&self, brain: &str, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut BrainWriteGuard<'_>) -> Result<T, StorageError>,
    {
        let mut guard = self.lock_brain(brain)?;
        f(&mut guard)
    }

    pub fn lock_brain(&self, brain: &str) -> Result<BrainWriteGuard<'_>, StorageError> {
        let root = self.existing_brain_root(brain)?;
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.lock_timeout_ms);
        let slot = self.locks.acquire(brain, deadline, started)?;
        let lease = LeaseRecord::new(&self.owner_id, Utc::now(), self.config.lease_ttl_ms);
        let lease_file = BrainLeaseFile::acquire(
            &root.join(META_DIR).join(LOCK_FILE),
            brain,
            &lease,
            Duration::from_millis(self.config.lock_poll_ms.max(1)),
            deadline,
            started,
        )?;
        Ok(BrainWriteGuard {
            store: self,
            brain: brain.to_string(),
            root,
            _lease: lease_file,
            _slot: slot,
        })
    }

    pub fn write_file(
        &self,
        brain: &str,
        path: &str,
        content: &str,
        metadata: FileMetadata,
        mode: WriteMode,
    ) -> Result<WriteReceipt, StorageError> {
        self.with_write_lock(brain, |guard| guard.write_file(path, content, metadata, mode))
    }

    /// Writes raw markdown whose frontmatter carries the metadata.
    pub fn write_markdown(
        &self,
        brain: &str,
        path: &str,
        raw: &str,
        mode: WriteMode,
    ) -> Result<WriteReceipt, StorageError> {
        self.with_write_lock(brain, |guard| guard.write_markdown(path, raw, mode))
    }

    pub fn delete_file(&self, brain: &str, path: &str) -> Result<bool, StorageError> {
        self.with_write_lock(brain, |guard| guard.delete_file(path))
    }

    pub fn update_chapter_state(
        &self,
        brain: &str,
        chapter_id: &str,
        status: ChapterStatus,
        reason: Option<String>,
    ) -> Result<Option<ChapterStatus>, StorageError> {
        self.with_write_lock(brain, |guard| {
            guard.update_chapter_state(chapter_id, status, reason, None)
        })
    }

    pub fn register_chapters(
        &self,
        brain: &str,
        chapter_ids: &[String],
        status: ChapterStatus,
        reason: Option<String>,
    ) -> Result<usize, StorageError> {
        self.with_write_lock(brain, |guard| {
            guard.register_chapters(chapter_ids, status, reason)
        })
    }

    pub fn set_chapter_index_terms(
        &self,
        brain: &str,
        chapter_id: &str,
        terms: Vec<String>,
    ) -> Result<(), StorageError> {
        self.with_write_lock(brain, |guard| guard.set_chapter_index_terms(chapter_id, terms))
    }

    pub fn append_secondary_objective(
        &self,
        brain: &str,
        objective: &str,
    ) -> Result<bool, StorageError> {
        self.with_write_lock(brain, |guard| guard.append_secondary_objective(objective))
    }

    pub fn append_claim_event(
        &self,
        brain: &str,
        event: ClaimEvent,
    ) -> Result<ClaimSnapshot, StorageError> {
        self.append_claim_events(brain, vec![event])
    }

    pub fn append_claim_events(
        &self,
        brain: &str,
        events: Vec<ClaimEvent>,
    ) -> Result<ClaimSnapshot, StorageError> {
        self.with_write_lock(brain, |guard| guard.append_claim_events(events))
    }

    pub fn append_run_record(&self, brain: &str, record: &RunRecord) -> Result<(), StorageError> {
        self.with_write_lock(brain, |guard| guard.append_run_record(record))
    }
}

/// Exclusive write access to one brain. Dropping the guard releases the lock.
pub struct BrainWriteGuard<'a> {
    store: &'a BrainStore,
    brain: String,
    root: PathBuf,
    _lease: BrainLeaseFile,
    _slot: BrainSlot,
}

impl BrainWriteGuard<'_> {
    pub fn brain(&self) -> &str {
        &self.brain
    }

    pub fn store(&self) -> &BrainStore {
        self.store
    }

    fn meta_path(&self, file: &str) -> PathBuf {
        self.root.join(META_DIR).join(file)
    }

    pub fn processing_log(&self) -> Result<ProcessingLog, StorageError> {
        Ok(read_json::<ProcessingLog>(&self.meta_path(PROCESSING_LOG_FILE))?.unwrap_or_default())
    }

    fn write_processing_log(&mut self, log: &ProcessingLog) -> Result<(), StorageError> {
        let payload = serde_json::to_vec_pretty(log)?;
        write_atomic(&self.meta_path(PROCESSING_LOG_FILE), &payload)?;
        Ok(())
    }

    pub fn write_file(
        &mut self,
        path: &str,
        content: &str,
        metadata: FileMetadata,
        mode: WriteMode,
    ) -> Result<WriteReceipt, StorageError> {
        let relative = normalize_knowledge_path(path)?;
        let absolute = self.root.join(&relative);
        let incoming = KnowledgeFile::new(relative.clone(), metadata, content);
        let prior = read_optional(&absolute)?;
        let created = prior.is_none();

        let file = match (mode, prior) {
            (WriteMode::AppendMerge, Some(raw)) => {
                let mut merged = KnowledgeFile::parse(relative.clone(), &raw);
                merged.merge_append(incoming);
                merged
            }
            _ => incoming,
        };
        let rendered = file.render()?;
        write_atomic(&absolute, rendered.as_bytes())?;
        debug!(brain = %self.brain, path = %relative, created, "knowledge_file_written");
        Ok(WriteReceipt {
            path: relative,
            created,
            bytes_written: rendered.len(),
        })
    }

    pub fn write_markdown(
        &mut self,
        path: &str,
        raw: &str,
        mode: WriteMode,
    ) -> Result<WriteReceipt, StorageError> {
        let parsed = KnowledgeFile::parse(path, raw);
        self.write_file(path, &parsed.body, parsed.metadata, mode)
    }

    pub fn delete_file(&mut self, path: &str) -> Result<bool, StorageError> {
        let relative = normalize_knowledge_path(path)?;
        match fs::remove_file(self.root.join(&relative)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn update_chapter_state(
        &mut self,
        chapter_id: &str,
        status: ChapterStatus,
        reason: Option<String>,
        source_objective: Option<String>,
    ) -> Result<Option<ChapterStatus>, StorageError> {
        let mut log = self.processing_log()?;
        let previous =
            log.apply_transition(chapter_id, status, reason, source_objective, Utc::now())?;
        self.write_processing_log(&log)?;
        debug!(
            brain = %self.brain,
            chapter_id,
            from = previous.map(ChapterStatus::as_str).unwrap_or("none"),
            to = status.as_str(),
            "chapter_state_updated"
        );
        Ok(previous)
    }

    /// Seeds chapters; never downgrades a chapter that already moved past `status`.
    pub fn register_chapters(
        &mut self,
        chapter_ids: &[String],
        status: ChapterStatus,
        reason: Option<String>,
    ) -> Result<usize, StorageError> {
        let mut log = self.processing_log()?;
        let now = Utc::now();
        let mut applied = 0usize;
        for chapter_id in chapter_ids {
            let allowed = log
                .state(chapter_id)
                .map(|state| state.status.allows(status))
                .unwrap_or(true);
            if !allowed {
                continue;
            }
            log.apply_transition(chapter_id, status, reason.clone(), None, now)?;
            applied += 1;
        }
        self.write_processing_log(&log)?;
        Ok(applied)
    }

    pub fn set_chapter_index_terms(
        &mut self,
        chapter_id: &str,
        terms: Vec<String>,
    ) -> Result<(), StorageError> {
        let mut log = self.processing_log()?;
        let Some(state) = log.chapter_map.get_mut(chapter_id) else {
            return Err(StorageError::not_found(format!(
                "chapter {chapter_id} in brain {}",
                self.brain
            )));
        };
        let mut cleaned = Vec::new();
        for term in terms {
            let term = term.trim().to_lowercase();
            if !term.is_empty() && !cleaned.contains(&term) {
                cleaned.push(term);
            }
        }
        state.index_terms = cleaned;
        self.write_processing_log(&log)
    }

    pub fn append_secondary_objective(&mut self, objective: &str) -> Result<bool, StorageError> {
        let mut log = self.processing_log()?;
        if !log.append_secondary_objective(objective) {
            return Ok(false);
        }
        self.write_processing_log(&log)?;
        Ok(true)
    }

    /// Appends events to the log and republishes the derived projection.
    pub fn append_claim_events(
        &mut self,
        events: Vec<ClaimEvent>,
    ) -> Result<ClaimSnapshot, StorageError> {
        let events_path = self.meta_path(CLAIM_EVENTS_FILE);
        let mut existing = read_jsonl::<ClaimEvent>(&events_path)?;
        if !events.is_empty() {
            append_jsonl(&events_path, &events)?;
            existing.extend(events);
        }
        let snapshot = ClaimEventLog::from_events(existing).project();
        write_atomic(
            &self.meta_path(CLAIMS_CURRENT_FILE),
            &serde_json::to_vec_pretty(&snapshot)?,
        )?;
        Ok(snapshot)
    }

    pub fn append_run_record(&mut self, record: &RunRecord) -> Result<(), StorageError> {
        append_jsonl(&self.meta_path(RUNS_FILE), std::slice::from_ref(record))
    }
}

fn collect_markdown(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if dir == root && name == META_DIR {
                continue;
            }
            collect_markdown(root, &path, out)?;
        } else if file_type.is_file() && name.ends_with(".md") {
            if let Ok(relative) = path.strip_prefix(root) {
                let relative = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(relative);
            }
        }
    }
    Ok(())
}

/// Publishes `payload` by writing a sibling temp file and renaming it into place.
pub fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!(".{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };
    fs::write(&temp_path, payload)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match read_optional(path)? {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
        _ => Ok(None),
    }
}

/// Reads a line-delimited log, skipping lines that do not parse.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(path = %path.display(), line_no, error = %err, "jsonl_line_skipped"),
        }
    }
    Ok(records)
}

/// Appends records by republishing the whole log, so readers never see a torn line.
fn append_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StorageError> {
    let mut payload = read_optional(path)?.unwrap_or_default();
    if !payload.is_empty() && !payload.ends_with('\n') {
        payload.push('\n');
    }
    for record in records {
        payload.push_str(&serde_json::to_string(record)?);
        payload.push('\n');
    }
    write_atomic(path, payload.as_bytes())
}

fn short_uuid() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
