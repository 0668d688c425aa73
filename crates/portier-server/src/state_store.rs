//! Shared, process-external state used by the authorization gate.
//!
//! Everything the gate remembers between requests goes through the narrow
//! [`StateBackend`] interface: whole-value `read`/`write`, line `append`,
//! `remove`, and an exclusive `lock` per key. Production uses
//! [`FileBackend`], a directory of small human-readable files shared by every
//! server process on the host; tests use an in-memory backend.
//!
//! ## File locking
//!
//! [`FileBackend::lock`] creates `<key>.lock` with `O_CREAT | O_EXCL` and
//! writes a unique owner line into it. If the file already exists the caller
//! backs off exponentially for a bounded number of attempts. A lock file
//! older than [`LockPolicy::stale_after`] is assumed to belong to a crashed
//! holder and is broken, so a dead process can never wedge the gate for good.
//!
//! Breaking and releasing both go by the owner line, never by path alone.
//! A breaker holds `<key>.lock.break` while it works and discards the stale
//! file only if it still holds the line that was judged stale. A guard only
//! removes a lock file that still holds its own line.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
#[cfg(test)]
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state key: {0:?}")]
    InvalidKey(String),

    #[error("could not lock `{key}` after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },

    #[error("corrupt state under `{key}`: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Held while a read-modify-write sequence is in progress. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    _inner: GuardInner,
}

// Variants are held only for their drop behaviour.
#[allow(dead_code)]
enum GuardInner {
    File(LockFile),
    #[cfg(test)]
    Memory(OwnedMutexGuard<()>),
}

struct LockFile {
    path: PathBuf,
    owner: String,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content == self.owner => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %self.path.display(), error = %e, "failed to release state lock");
                    }
                }
            }
            Ok(_) => {
                warn!(path = %self.path.display(), "state lock was broken while held, leaving the new owner's lock");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "state lock vanished while held");
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to release state lock");
            }
        }
    }
}

#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>, StateError>;

    /// Replace the value under `key` atomically.
    async fn write(&self, key: &str, value: &str) -> Result<(), StateError>;

    /// Append one line (a trailing newline is added).
    async fn append(&self, key: &str, line: &str) -> Result<(), StateError>;

    /// Remove `key`; absent keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), StateError>;

    async fn lock(&self, key: &str) -> Result<LockGuard, StateError>;
}

// ---------------------------------------------------------------------------
// Lock policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    /// Attempts after the first one before giving up.
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Age after which an existing lock file is considered abandoned.
    pub stale_after: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            stale_after: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    policy: LockPolicy,
}

impl FileBackend {
    pub async fn new(dir: PathBuf) -> Result<Self, StateError> {
        Self::with_policy(dir, LockPolicy::default()).await
    }

    pub async fn with_policy(dir: PathBuf, policy: LockPolicy) -> Result<Self, StateError> {
        fs::create_dir_all(&dir).await?;
        info!(path = %dir.display(), "state directory ready");
        Ok(Self { dir, policy })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are plain file names; anything that could escape the state
    /// directory is refused.
    fn path_for(&self, key: &str) -> Result<PathBuf, StateError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StateError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(key))
    }

    /// Break the lock at `lock_path` if it is stale. Returns whether the
    /// path is now worth retrying at once.
    ///
    /// Breakers take a short `<key>.lock.break` lock of their own and
    /// re-check under it, so two processes never judge the same lock stale
    /// and the second one never removes the lock the first went on to take.
    async fn break_if_stale(&self, key: &str, lock_path: &Path) -> Result<bool, StateError> {
        if !self.is_stale(lock_path).await {
            return Ok(false);
        }

        let breaker_path = self.path_for(&format!("{key}.lock.break"))?;
        let Some(_breaker) = create_lock_file(&breaker_path).await? else {
            if self.is_stale(&breaker_path).await {
                warn!(path = %breaker_path.display(), "removing abandoned lock breaker");
                let _ = fs::remove_file(&breaker_path).await;
            }
            return Ok(false);
        };

        let seen = match fs::read_to_string(lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        if !self.is_stale(lock_path).await {
            return Ok(false);
        }
        self.discard_if_unchanged(key, lock_path, &seen).await
    }

    /// Move the lock file aside and delete it if it still holds `seen`.
    /// Otherwise it was re-acquired after the staleness check, so it is
    /// linked back into place for its owner.
    async fn discard_if_unchanged(
        &self,
        key: &str,
        lock_path: &Path,
        seen: &str,
    ) -> Result<bool, StateError> {
        let parked = self.dir.join(format!(".{key}.lock.{}.stale", Uuid::new_v4()));
        match fs::rename(lock_path, &parked).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        let taken = fs::read_to_string(&parked).await.unwrap_or_default();
        let discarded = taken == seen;
        if discarded {
            warn!(path = %lock_path.display(), owner = seen.trim(), "broke stale state lock");
        } else if let Err(e) = fs::hard_link(&parked, lock_path).await {
            // Only fails if yet another lock was created; that one stays.
            warn!(path = %lock_path.display(), error = %e, "could not restore a live state lock");
        } else {
            debug!(path = %lock_path.display(), "state lock was re-acquired, restored it");
        }

        if let Err(e) = fs::remove_file(&parked).await {
            warn!(path = %parked.display(), error = %e, "failed to remove parked state lock");
        }
        Ok(discarded)
    }

    async fn is_stale(&self, lock_path: &Path) -> bool {
        let Ok(meta) = fs::metadata(lock_path).await else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age >= self.policy.stale_after)
            .unwrap_or(false)
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StateError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StateError> {
        let path = self.path_for(key)?;
        // Readers never lock, so they must only ever see a complete file.
        let tmp = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(value.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn append(&self, key: &str, line: &str) -> Result<(), StateError> {
        let path = self.path_for(key)?;
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        // One write per record so concurrent appenders do not interleave.
        file.write_all(record.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StateError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock(&self, key: &str) -> Result<LockGuard, StateError> {
        let lock_path = self.path_for(&format!("{key}.lock"))?;
        let mut backoff = self.policy.initial_backoff;
        let attempts = self.policy.retries + 1;

        for attempt in 0..attempts {
            if let Some(file) = create_lock_file(&lock_path).await? {
                debug!(key, attempt, "state lock acquired");
                return Ok(LockGuard {
                    _inner: GuardInner::File(file),
                });
            }
            if self.break_if_stale(key, &lock_path).await? {
                continue;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.policy.max_backoff);
            }
        }

        Err(StateError::LockTimeout {
            key: key.to_owned(),
            attempts,
        })
    }
}

/// Create `path` exclusively and stamp it with a unique owner line.
/// `None` when the file already exists.
async fn create_lock_file(path: &Path) -> Result<Option<LockFile>, StateError> {
    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let owner = format!(
        "{} {} {}\n",
        std::process::id(),
        Uuid::new_v4(),
        Utc::now().to_rfc3339()
    );
    let written = async {
        file.write_all(owner.as_bytes()).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = written {
        let _ = fs::remove_file(path).await;
        return Err(e.into());
    }

    Ok(Some(LockFile {
        path: path.to_path_buf(),
        owner,
    }))
}

// ---------------------------------------------------------------------------
// Memory backend
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use memory::MemoryBackend;
