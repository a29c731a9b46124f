//! JSON snapshot files for the three stores.
//!
//! Every write goes to `<file>.tmp`, is fsynced, then renamed over the real
//! file, so a crash leaves either the old or the new document. Memory is always
//! authoritative: a failed write is logged, the store stays dirty and the next
//! flush tries again.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use waitline_core::{
    Durability, Engine, QueueSettings, QueueSnapshot, StoreKind, TicketSnapshot,
    WaitlistSnapshot,
};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write task for {path} did not finish: {source}")]
    Task {
        path: PathBuf,
        #[source]
        source: tokio::task::JoinError,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn encode<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serialize {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `path` with `bytes` via a fsynced temp file and a rename. Blocking.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let tmp = tmp_path(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp).map_err(io_error(&tmp))?;
        file.write_all(bytes).map_err(io_error(&tmp))?;
        file.sync_all().map_err(io_error(&tmp))?;
        fs::rename(&tmp, path).map_err(io_error(path))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Run [`write_atomic`] on the blocking pool.
async fn write_off_runtime(path: PathBuf, bytes: Vec<u8>) -> Result<(), PersistenceError> {
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&task_path, &bytes))
        .await
        .map_err(|source| PersistenceError::Task { path, source })?
}

/// Read a JSON document, falling back to the default when the file is missing
/// or unreadable. Never fails.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No state file at {}, starting empty", path.display());
            return T::default();
        }
        Err(e) => {
            warn!("Failed to read {}: {}; starting empty", path.display(), e);
            return T::default();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse {}: {}; starting empty", path.display(), e);
            T::default()
        }
    }
}

/// Whether a flush honours the debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Write immediate changes now and debounced ones once they are old enough.
    Routine,
    /// Write everything that is dirty.
    Forced,
}

/// Owns the state directory and the debounce bookkeeping.
pub struct Persistence {
    dir: PathBuf,
    debounce: chrono::Duration,
    /// When each store was first seen dirty since its last successful write.
    pending_since: HashMap<StoreKind, DateTime<Utc>>,
    writes: HashMap<StoreKind, u64>,
    failures: u64,
}

impl Persistence {
    pub fn new(dir: impl Into<PathBuf>, debounce: chrono::Duration) -> Self {
        Self {
            dir: dir.into(),
            debounce,
            pending_since: HashMap::new(),
            writes: HashMap::new(),
            failures: 0,
        }
    }

    pub fn path_for(&self, kind: StoreKind) -> PathBuf {
        let file = match kind {
            StoreKind::Queues => "queue-data.json",
            StoreKind::Tickets => "tickets-data.json",
            StoreKind::Waitlist => "waitlist-data.json",
        };
        self.dir.join(file)
    }

    /// Build an engine from whatever is on disk.
    pub fn load(&self, settings: QueueSettings) -> Engine {
        let queues: QueueSnapshot = load_json_or_default(&self.path_for(StoreKind::Queues));
        let tickets: TicketSnapshot = load_json_or_default(&self.path_for(StoreKind::Tickets));
        let waitlist: WaitlistSnapshot = load_json_or_default(&self.path_for(StoreKind::Waitlist));
        info!(
            "Loaded {} queue(s), {} ticket(s), {} waitlist member(s) from {}",
            queues.queues.len(),
            tickets.tickets.len(),
            waitlist.members.len(),
            self.dir.display()
        );
        Engine::from_snapshots(settings, queues, tickets, waitlist)
    }

    /// Serialize one store. Runs with the engine borrowed, so the document is a
    /// consistent cut of that store.
    fn encode_store(&self, engine: &Engine, kind: StoreKind) -> Result<Vec<u8>, PersistenceError> {
        let path = self.path_for(kind);
        match kind {
            StoreKind::Queues => encode(&path, &engine.queues().to_snapshot()),
            StoreKind::Tickets => encode(&path, &engine.tickets().to_snapshot()),
            StoreKind::Waitlist => encode(&path, &engine.waitlist().to_snapshot()),
        }
    }

    /// Encode, write on the blocking pool, and mark the store clean on success.
    /// The caller holds the engine exclusively for the whole write, so writes of
    /// one store never overlap or land out of order.
    async fn write_and_record(&mut self, engine: &mut Engine, kind: StoreKind) -> bool {
        let result = match self.encode_store(engine, kind) {
            Ok(bytes) => write_off_runtime(self.path_for(kind), bytes).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                engine.mark_clean(kind);
                self.pending_since.remove(&kind);
                *self.writes.entry(kind).or_insert(0) += 1;
                debug!("Saved {} store", kind.name());
                true
            }
            Err(e) => {
                self.failures += 1;
                error!("Failed to save {} store: {}", kind.name(), e);
                false
            }
        }
    }

    /// Write the stores that are due. Returns how many were written.
    pub async fn flush(&mut self, engine: &mut Engine, mode: FlushMode, now: DateTime<Utc>) -> usize {
        let mut written = 0;
        for (kind, durability) in engine.dirty_stores() {
            let since = *self.pending_since.entry(kind).or_insert(now);
            let due = mode == FlushMode::Forced
                || durability == Durability::Immediate
                || now - since >= self.debounce;
            if due && self.write_and_record(engine, kind).await {
                written += 1;
            }
        }
        written
    }

    /// Periodic backup: write every store whether or not it changed.
    pub async fn write_all(&mut self, engine: &mut Engine) -> usize {
        let mut written = 0;
        for kind in StoreKind::ALL {
            if self.write_and_record(engine, kind).await {
                written += 1;
            }
        }
        written
    }

    /// Successful writes of one store since startup.
    pub fn write_count(&self, kind: StoreKind) -> u64 {
        self.writes.get(&kind).copied().unwrap_or(0)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;
    use waitline_core::{Region, UserId};

    fn setup() -> (TempDir, Persistence, Engine) {
        let dir = TempDir::new().unwrap();
        let persistence = Persistence::new(dir.path(), Duration::seconds(2));
        let engine = persistence.load(QueueSettings::default());
        (dir, persistence, engine)
    }

    #[test]
    fn test_missing_files_load_empty() {
        let (_dir, _persistence, engine) = setup();
        assert!(engine.tickets().is_empty());
        assert_eq!(engine.queues().regions().count(), 0);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("queue-data.json"), "{ not json").unwrap();
        let persistence = Persistence::new(dir.path(), Duration::seconds(2));

        let engine = persistence.load(QueueSettings::default());
        assert_eq!(engine.queues().regions().count(), 0);
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        write_atomic(&path, br#"{"a": 1}"#).unwrap();

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
        let loaded: serde_json::Value = load_json_or_default(&path);
        assert_eq!(loaded["a"], 1);
    }

    #[test]
    fn test_save_into_missing_directory_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope").join("doc.json");

        let err = write_atomic(&path, b"{}").unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[tokio::test]
    async fn test_routine_changes_are_debounced() {
        let (_dir, mut persistence, mut engine) = setup();
        let t0 = Utc::now();

        engine.activate_reviewer(Region::Eu, &UserId::from("r1"), t0);
        assert_eq!(persistence.flush(&mut engine, FlushMode::Routine, t0).await, 0);

        engine.set_presentation(
            Region::Eu,
            waitline_core::PresentationKind::QueueMessage,
            Some("m".into()),
        );
        let t1 = t0 + Duration::seconds(1);
        assert_eq!(persistence.flush(&mut engine, FlushMode::Routine, t1).await, 0);

        let t2 = t0 + Duration::seconds(2);
        assert_eq!(persistence.flush(&mut engine, FlushMode::Routine, t2).await, 1);
        assert_eq!(persistence.write_count(StoreKind::Queues), 1);
        assert!(engine.dirty_stores().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_changes_skip_debounce() {
        let (_dir, mut persistence, mut engine) = setup();
        let now = Utc::now();

        engine
            .join_waitlist(&UserId::from("u1"), Region::Eu, "srv", now)
            .unwrap();
        assert_eq!(persistence.flush(&mut engine, FlushMode::Routine, now).await, 1);
        assert_eq!(persistence.write_count(StoreKind::Waitlist), 1);
    }

    #[tokio::test]
    async fn test_forced_flush_writes_everything_dirty() {
        let (_dir, mut persistence, mut engine) = setup();
        let now = Utc::now();
        engine.activate_reviewer(Region::Eu, &UserId::from("r1"), now);

        assert_eq!(persistence.flush(&mut engine, FlushMode::Forced, now).await, 1);
        assert_eq!(persistence.flush(&mut engine, FlushMode::Forced, now).await, 0);
    }

    #[tokio::test]
    async fn test_write_then_reload() {
        let (dir, mut persistence, mut engine) = setup();
        let now = Utc::now();
        engine.activate_reviewer(Region::Na, &UserId::from("r1"), now);
        engine
            .join_waitlist(&UserId::from("u1"), Region::Na, "srv", now)
            .unwrap();
        engine.request_join(Region::Na, &UserId::from("u1")).unwrap();

        assert_eq!(persistence.write_all(&mut engine).await, 3);

        let reloaded = Persistence::new(dir.path(), Duration::seconds(2))
            .load(QueueSettings::default());
        assert_eq!(reloaded.queues().queue(Region::Na), engine.queues().queue(Region::Na));
        assert_eq!(
            reloaded.waitlist().get(&UserId::from("u1")),
            engine.waitlist().get(&UserId::from("u1"))
        );
    }

    #[tokio::test]
    async fn test_failed_write_keeps_store_dirty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let mut persistence = Persistence::new(&missing, Duration::seconds(2));
        let mut engine = persistence.load(QueueSettings::default());
        let now = Utc::now();
        engine
            .join_waitlist(&UserId::from("u1"), Region::Eu, "srv", now)
            .unwrap();

        assert_eq!(persistence.flush(&mut engine, FlushMode::Routine, now).await, 0);
        assert_eq!(persistence.failure_count(), 1);
        assert_eq!(engine.dirty_stores().len(), 1);
    }
}
