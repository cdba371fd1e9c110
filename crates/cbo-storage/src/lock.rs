//! Brain-scoped exclusive lock: an in-process slot plus a cross-process lease file.

use crate::StorageError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Default)]
pub(crate) struct BrainLockTable {
    held: Mutex<BTreeSet<String>>,
    released: Condvar,
}

impl BrainLockTable {
    /// Waits for the brain's in-process slot until `deadline`.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        brain: &str,
        deadline: Instant,
        waited_from: Instant,
    ) -> Result<BrainSlot, StorageError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(brain) {
            let now = Instant::now();
            if now >= deadline {
                return Err(lock_timeout(brain, waited_from));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }
        held.insert(brain.to_string());
        Ok(BrainSlot {
            table: Arc::clone(self),
            brain: brain.to_string(),
        })
    }

    fn release(&self, brain: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(brain);
        self.released.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self, brain: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(brain)
    }
}

pub(crate) struct BrainSlot {
    table: Arc<BrainLockTable>,
    brain: String,
}

impl Drop for BrainSlot {
    fn drop(&mut self) {
        self.table.release(&self.brain);
    }
}

/// Advisory lease record in `meta/brain.lock`, held for the lifetime of the guard.
pub(crate) struct BrainLeaseFile {
    file: File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub owner_id: String,
    pub owner_pid: Option<u32>,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BrainLeaseFile {
    pub(crate) fn acquire(
        path: &Path,
        brain: &str,
        lease: &LeaseRecord,
        poll: Duration,
        deadline: Instant,
        waited_from: Instant,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        while file.try_lock_exclusive().is_err() {
            let now = Instant::now();
            if now >= deadline {
                match LeaseRecord::read(path) {
                    Some(holder) => warn!(
                        brain,
                        owner_id = %holder.owner_id,
                        owner_pid = ?holder.owner_pid,
                        past_expiry = holder.is_expired(Utc::now()),
                        "brain_lease_busy"
                    ),
                    None => warn!(brain, "brain_lease_busy"),
                }
                return Err(lock_timeout(brain, waited_from));
            }
            std::thread::sleep(poll.min(deadline - now));
        }

        let metadata = format!(
            "owner_id={}\nowner_pid={}\nacquired_at={}\nexpires_at={}\n",
            lease.owner_id,
            lease
                .owner_pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "na".to_string()),
            lease.acquired_at.to_rfc3339(),
            lease.expires_at.to_rfc3339(),
        );
        file.set_len(0)?;
        file.write_all(metadata.as_bytes())?;
        file.flush()?;

        Ok(Self { file })
    }
}

impl Drop for BrainLeaseFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl LeaseRecord {
    pub fn new(owner_id: &str, now: DateTime<Utc>, ttl_ms: u64) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            owner_pid: Some(std::process::id()),
            acquired_at: now,
            expires_at: now + ChronoDuration::milliseconds(ttl_ms.min(i64::MAX as u64) as i64),
        }
    }

    /// Current holder recorded in the lease file, if readable.
    pub fn read(path: &Path) -> Option<Self> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| Self::parse(&raw))
    }

    /// True once `now` reaches the recorded expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Parses the `key=value` lines written into the lease file.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut owner_id = None;
        let mut owner_pid = None;
        let mut acquired_at = None;
        let mut expires_at = None;
        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "owner_id" => owner_id = Some(value.trim().to_string()),
                "owner_pid" => owner_pid = value.trim().parse::<u32>().ok(),
                "acquired_at" => acquired_at = parse_rfc3339(value),
                "expires_at" => expires_at = parse_rfc3339(value),
                _ => {}
            }
        }
        Some(Self {
            owner_id: owner_id?,
            owner_pid,
            acquired_at: acquired_at?,
            expires_at: expires_at?,
        })
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn lock_timeout(brain: &str, waited_from: Instant) -> StorageError {
    StorageError::LockTimeout {
        brain: brain.to_string(),
        waited_ms: waited_from.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slot_times_out_while_held_and_frees_on_drop() {
        let table = Arc::new(BrainLockTable::default());
        let start = Instant::now();
        let slot = table
            .acquire("acme", start + Duration::from_millis(50), start)
            .expect("first acquire");
        assert!(table.is_held("acme"));

        let start = Instant::now();
        let err = table
            .acquire("acme", start + Duration::from_millis(30), start)
            .err()
            .expect("second acquire must time out");
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        let other = table
            .acquire("other", Instant::now() + Duration::from_millis(30), start)
            .expect("different brain is independent");
        drop(other);

        drop(slot);
        assert!(!table.is_held("acme"));
    }

    #[test]
    fn busy_lease_times_out_and_names_the_holder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meta").join("brain.lock");
        let now = Utc::now();
        let start = Instant::now();
        let holder = BrainLeaseFile::acquire(
            &path,
            "acme",
            &LeaseRecord::new("owner-a", now, 30_000),
            Duration::from_millis(5),
            start + Duration::from_millis(100),
            start,
        )
        .expect("first lease");

        let start = Instant::now();
        let err = BrainLeaseFile::acquire(
            &path,
            "acme",
            &LeaseRecord::new("owner-b", now, 30_000),
            Duration::from_millis(5),
            start + Duration::from_millis(40),
            start,
        )
        .err()
        .expect("second lease must time out");
        assert_eq!(err.kind(), "lock_timeout");

        let recorded = LeaseRecord::read(&path).expect("holder recorded");
        assert_eq!(recorded.owner_id, "owner-a");
        assert!(!recorded.is_expired(now));
        assert!(recorded.is_expired(now + ChronoDuration::seconds(31)));

        drop(holder);
        let start = Instant::now();
        BrainLeaseFile::acquire(
            &path,
            "acme",
            &LeaseRecord::new("owner-b", now, 30_000),
            Duration::from_millis(5),
            start + Duration::from_millis(100),
            start,
        )
        .expect("lease free after drop");
        assert_eq!(
            LeaseRecord::read(&path).map(|lease| lease.owner_id),
            Some("owner-b".to_string())
        );
    }

    #[test]
    fn lease_record_roundtrips_through_file_format() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 8, 0, 0)
            .single()
            .expect("valid timestamp");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meta").join("brain.lock");
        let lease = LeaseRecord::new("owner-a", now, 30_000);
        let start = Instant::now();
        let guard = BrainLeaseFile::acquire(
            &path,
            "acme",
            &lease,
            Duration::from_millis(5),
            start + Duration::from_millis(100),
            start,
        )
        .expect("lease acquire");

        let raw = std::fs::read_to_string(&path).expect("read lease");
        let parsed = LeaseRecord::parse(&raw).expect("parse lease");
        assert_eq!(parsed, lease);
        assert_eq!(parsed.expires_at - parsed.acquired_at, ChronoDuration::seconds(30));
        drop(guard);
    }
}
