//! Persistence synchronizer: load-once, debounced write-through.
//!
//! The aggregate is stored as a single JSON document. It is read exactly once
//! at startup ([`load_or_default`], fail-soft) and written back through the
//! [`Persister`], which coalesces bursts of mutations into one write after a
//! quiet period. Rapid mutations (every keystroke of a form field goes through
//! the store) would otherwise thrash storage with partial snapshots.
//!
//! Write failures are logged and swallowed: the in-memory aggregate stays the
//! source of truth for the session and is never rolled back because a write
//! failed.

use crate::types::AppState;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Default file name of the durable state document
pub const DEFAULT_STATE_FILE: &str = "farmstead-state.json";

/// Default quiet window before a scheduled snapshot is written
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Errors raised by a [`StateStorage`] backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document could not be parsed or the aggregate could not be
    /// serialized
    #[error("storage (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// Backend-specific failure (used by test doubles to simulate quota
    /// exhaustion)
    #[error("storage failed: {0}")]
    Backend(String),
}

/// Durable storage for the aggregate document
///
/// Implementations hold one JSON document under a fixed key. The document is
/// a few kilobytes, so the operations are synchronous; the runtime only ever
/// calls them from spawned effect tasks.
pub trait StateStorage: Send + Sync {
    /// Reads the stored document, `Ok(None)` when nothing was ever written
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the document exists but cannot be read
    /// or parsed.
    fn load(&self) -> Result<Option<AppState>, StorageError>;

    /// Replaces the stored document with a snapshot of the aggregate
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when serialization or the write fails.
    fn save(&self, state: &AppState) -> Result<(), StorageError>;

    /// Removes the stored document
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the document exists but cannot be
    /// removed.
    fn clear(&self) -> Result<(), StorageError>;
}

/// File-backed storage: one JSON document at a fixed path
///
/// Writes go through a sibling temp file and an atomic rename, so a crash
/// mid-write never leaves a torn document behind.
#[derive(Clone, Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Creates storage rooted at the given document path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The document path
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        path.set_extension("json.tmp");
        path
    }
}

impl StateStorage for FileStorage {
    fn load(&self) -> Result<Option<AppState>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let state = serde_json::from_str(&raw)?;
        Ok(Some(state))
    }

    fn save(&self, state: &AppState) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let raw = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        std::fs::write(&temp, raw)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// In-memory storage double for tests
///
/// Holds the serialized document so tests observe exactly what would hit
/// disk. Writes can be made to fail (`set_fail_writes`) to exercise the
/// log-and-continue path, and `save_count` exposes how often a write actually
/// happened (the debounce assertions rely on it).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    document: std::sync::Mutex<Option<String>>,
    fail_writes: AtomicBool,
    save_count: AtomicUsize,
}

impl MemoryStorage {
    /// Creates empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage pre-seeded with a raw document (possibly corrupt)
    #[must_use]
    pub fn with_document(raw: impl Into<String>) -> Self {
        Self {
            document: std::sync::Mutex::new(Some(raw.into())),
            ..Self::default()
        }
    }

    /// Makes every subsequent `save` fail, simulating quota exhaustion
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Number of successful writes so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::Acquire)
    }

    /// The current raw document, if any
    #[must_use]
    pub fn document(&self) -> Option<String> {
        self.document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl StateStorage for MemoryStorage {
    fn load(&self) -> Result<Option<AppState>, StorageError> {
        let document = self
            .document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match document.as_deref() {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
        }
    }

    fn save(&self, state: &AppState) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(StorageError::Backend("quota exceeded".into()));
        }

        let raw = serde_json::to_string(state)?;
        *self
            .document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(raw);
        self.save_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self
            .document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Loads the aggregate once at startup, falling back to the default
///
/// Fail-soft by contract: a missing, unreadable, or unparseable document is
/// logged and replaced with `AppState::default()`. The caller never sees an
/// error; a farmer with a corrupt local document gets a fresh session rather
/// than a crash.
#[must_use]
pub fn load_or_default(storage: &dyn StateStorage) -> AppState {
    match storage.load() {
        Ok(Some(state)) => {
            tracing::debug!(
                orders = state.orders.len(),
                bookings = state.bookings.len(),
                "Loaded persisted state"
            );
            state
        }
        Ok(None) => {
            tracing::debug!("No persisted state found, starting fresh");
            AppState::default()
        }
        Err(error) => {
            tracing::warn!(%error, "Persisted state unreadable, starting fresh");
            AppState::default()
        }
    }
}

/// Timer state guarded by the persister mutex
#[derive(Debug, Default)]
struct PersistInner {
    /// The armed debounce timer, if any
    pending: Option<JoinHandle<()>>,
    /// The most recently scheduled snapshot
    latest: Option<AppState>,
    /// Sequence number of the snapshot (or reset) currently held
    last_seq: u64,
}

/// Debounced write-through of aggregate snapshots
///
/// One pending timer plus the latest snapshot: each `schedule` call resets
/// the timer (aborting the previous one) and replaces the snapshot, so a
/// burst of mutations produces exactly one write, of the final state, after
/// the quiet window. The timer is reset, never accumulated.
///
/// Snapshots carry sequence numbers ([`Persister::stamp`]). The reducer
/// stamps each snapshot while it still holds the state write lock, so the
/// sequence order matches the mutation order even when the effect tasks that
/// deliver the snapshots are scheduled out of order. The persister discards
/// anything older than what it has already seen, and a fired timer re-checks
/// its sequence under the mutex before touching storage.
pub struct Persister {
    storage: Arc<dyn StateStorage>,
    window: Duration,
    seq: AtomicU64,
    inner: Arc<Mutex<PersistInner>>,
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl Persister {
    /// Creates a persister over the given storage with the given quiet window
    #[must_use]
    pub fn new(storage: Arc<dyn StateStorage>, window: Duration) -> Self {
        Self {
            storage,
            window,
            seq: AtomicU64::new(0),
            inner: Arc::new(Mutex::new(PersistInner::default())),
        }
    }

    /// The quiet window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Allocates the next sequence number
    ///
    /// The reducer calls this while it holds the state write lock, which pins
    /// the sequence order to the mutation order before any task is spawned.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Schedules a snapshot for writing after the quiet window
    ///
    /// Stamps the snapshot itself; callers that need ordering across tasks
    /// use [`Persister::schedule_stamped`] with a sequence taken earlier.
    pub async fn schedule(&self, snapshot: AppState) {
        let seq = self.stamp();
        self.schedule_stamped(seq, snapshot).await;
    }

    /// Schedules a pre-stamped snapshot for writing after the quiet window
    ///
    /// A snapshot older than the newest one already seen is dropped, so two
    /// effect tasks delivering out of order cannot leave a stale aggregate as
    /// the write candidate. Otherwise any previously armed timer is cancelled
    /// and only the last snapshot of a burst reaches storage. Write failures
    /// are logged, never propagated: the in-memory aggregate is not rolled
    /// back.
    pub async fn schedule_stamped(&self, seq: u64, snapshot: AppState) {
        let mut inner = self.inner.lock().await;

        if seq <= inner.last_seq {
            tracing::debug!(seq, newest = inner.last_seq, "Dropping stale snapshot");
            return;
        }
        inner.last_seq = seq;

        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }
        inner.latest = Some(snapshot);

        let storage = Arc::clone(&self.storage);
        let window = self.window;
        let shared = Arc::clone(&self.inner);

        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;

            // A newer schedule or a reset aborts this task at the latest
            // here; if it already slipped past the sleep, the sequence check
            // under the mutex keeps it from writing superseded state.
            let mut inner = shared.lock().await;
            if inner.last_seq != seq {
                return;
            }
            if let Some(snapshot) = inner.latest.as_ref() {
                write_snapshot(storage.as_ref(), snapshot);
            }
            inner.pending = None;
        }));
    }

    /// Writes the latest snapshot immediately, cancelling any armed timer
    ///
    /// Used at shutdown so the final in-memory state always reaches storage
    /// even when the process exits inside the quiet window.
    pub async fn flush(&self) {
        let mut inner = self.inner.lock().await;

        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }

        if let Some(snapshot) = inner.latest.as_ref() {
            write_snapshot(self.storage.as_ref(), snapshot);
        }
    }

    /// Cancels any armed timer, forgets the snapshot, and clears storage
    ///
    /// Stamps the reset itself; callers that need ordering across tasks use
    /// [`Persister::reset_stamped`] with a sequence taken earlier.
    pub async fn reset(&self) {
        let seq = self.stamp();
        self.reset_stamped(seq).await;
    }

    /// Applies a pre-stamped reset: cancels any armed timer, forgets the
    /// snapshot, and clears storage
    ///
    /// Backs the store's reset-to-default operation; clearing bypasses the
    /// debounce window so a reset is durable immediately. Advancing the
    /// sequence means a snapshot stamped before the reset can no longer be
    /// scheduled or written afterwards.
    pub async fn reset_stamped(&self, seq: u64) {
        let mut inner = self.inner.lock().await;

        inner.last_seq = inner.last_seq.max(seq);

        if let Some(pending) = inner.pending.take() {
            pending.abort();
        }
        inner.latest = None;

        if let Err(error) = self.storage.clear() {
            tracing::warn!(%error, "Failed to clear persisted state");
        }
    }
}

/// Writes one snapshot, logging (not propagating) failure.
fn write_snapshot(storage: &dyn StateStorage, snapshot: &AppState) {
    match storage.save(snapshot) {
        Ok(()) => tracing::debug!("Persisted state snapshot"),
        Err(error) => {
            tracing::warn!(%error, "State write failed; in-memory state remains authoritative");
        }
    }
}
