//! Per-IP failed password attempts and the lockouts they trigger.
//!
//! The table lives in one JSON document shared by every server process.
//! Updates run under the backend's advisory lock; when the lock cannot be
//! taken the update is skipped rather than blocking the request. A table
//! that no longer parses is replaced by an empty one on the next update, so
//! a damaged file can never switch failure counting off.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use portier_shared::constants::{LOCKOUT_MINUTES, MAX_FAILED_ATTEMPTS};

use crate::clock::Clock;
use crate::state_store::{StateBackend, StateError};

pub const FAILED_ATTEMPTS_KEY: &str = "failed_attempts.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAttemptRecord {
    pub count: u32,
    /// Lockout expiry in Unix milliseconds, `0` when not locked out.
    #[serde(default)]
    pub lock_until: i64,
}

impl FailedAttemptRecord {
    fn is_locked_at(&self, now_ms: i64) -> bool {
        self.lock_until > now_ms
    }

    fn is_idle_at(&self, now_ms: i64) -> bool {
        self.count == 0 && !self.is_locked_at(now_ms)
    }
}

pub type AttemptTable = BTreeMap<String, FailedAttemptRecord>;

#[derive(Debug, Clone, Copy)]
pub struct AttemptPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_FAILED_ATTEMPTS,
            lockout: Duration::minutes(i64::from(LOCKOUT_MINUTES)),
        }
    }
}

/// What a call to [`FailedAttemptTracker::record_failure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The failure was counted and no lockout started.
    Counted { count: u32 },
    /// This failure reached the limit and started a lockout.
    LockedOut { until: DateTime<Utc> },
    /// A lockout was already running. Nothing changed.
    AlreadyLocked { until: DateTime<Utc> },
    /// The shared table could not be locked or saved.
    Skipped,
}

pub struct FailedAttemptTracker {
    backend: Arc<dyn StateBackend>,
    clock: Arc<dyn Clock>,
    policy: AttemptPolicy,
}

impl FailedAttemptTracker {
    pub fn new(backend: Arc<dyn StateBackend>, clock: Arc<dyn Clock>, policy: AttemptPolicy) -> Self {
        Self {
            backend,
            clock,
            policy,
        }
    }

    pub async fn record_failure(&self, ip: &str) -> FailureOutcome {
        let _guard = match self.backend.lock(FAILED_ATTEMPTS_KEY).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(ip, error = %e, "could not lock attempt table, failure not recorded");
                return FailureOutcome::Skipped;
            }
        };

        let mut table = match self.load_for_update().await {
            Ok(table) => table,
            Err(e) => {
                warn!(ip, error = %e, "could not read attempt table, failure not recorded");
                return FailureOutcome::Skipped;
            }
        };

        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let record = table.entry(ip.to_owned()).or_default();

        if record.is_locked_at(now_ms) {
            let until = millis_to_datetime(record.lock_until);
            debug!(ip, %until, "failure during active lockout");
            return FailureOutcome::AlreadyLocked { until };
        }
        if record.lock_until != 0 {
            *record = FailedAttemptRecord::default();
        }

        record.count += 1;
        let outcome = if record.count >= self.policy.max_attempts {
            let until = now + self.policy.lockout;
            record.count = 0;
            record.lock_until = until.timestamp_millis();
            info!(ip, %until, "too many failed attempts, locking out");
            FailureOutcome::LockedOut { until }
        } else {
            debug!(ip, count = record.count, "failed attempt recorded");
            FailureOutcome::Counted {
                count: record.count,
            }
        };

        table.retain(|_, r| !r.is_idle_at(now_ms));
        if let Err(e) = self.save(&table).await {
            warn!(ip, error = %e, "could not save attempt table");
            return FailureOutcome::Skipped;
        }
        outcome
    }

    /// Read-only check, taken without the advisory lock.
    pub async fn is_locked(&self, ip: &str) -> bool {
        match self.load().await {
            Ok(table) => table
                .get(ip)
                .is_some_and(|r| r.is_locked_at(self.clock.now().timestamp_millis())),
            Err(e) => {
                warn!(ip, error = %e, "could not read attempt table");
                false
            }
        }
    }

    /// Forget every failure recorded for `ip`.
    pub async fn reset(&self, ip: &str) {
        let _guard = match self.backend.lock(FAILED_ATTEMPTS_KEY).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(ip, error = %e, "could not lock attempt table, reset skipped");
                return;
            }
        };

        let result = async {
            let mut table = self.load_for_update().await?;
            if table.remove(ip).is_some() {
                self.save(&table).await?;
                debug!(ip, "failed attempts reset");
            }
            Ok::<_, StateError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(ip, error = %e, "could not reset failed attempts");
        }
    }

    async fn load(&self) -> Result<AttemptTable, StateError> {
        match self.backend.read(FAILED_ATTEMPTS_KEY).await? {
            None => Ok(AttemptTable::new()),
            Some(raw) if raw.trim().is_empty() => Ok(AttemptTable::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StateError::Corrupt {
                key: FAILED_ATTEMPTS_KEY.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    /// [`load`](Self::load) for callers holding the lock. A corrupt table is
    /// logged and treated as empty so the caller's write replaces it.
    async fn load_for_update(&self) -> Result<AttemptTable, StateError> {
        match self.load().await {
            Err(StateError::Corrupt { key, reason }) => {
                error!(%key, %reason, "attempt table is corrupt, starting a fresh one");
                Ok(AttemptTable::new())
            }
            other => other,
        }
    }

    async fn save(&self, table: &AttemptTable) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(table).map_err(|e| StateError::Corrupt {
            key: FAILED_ATTEMPTS_KEY.to_owned(),
            reason: e.to_string(),
        })?;
        self.backend.write(FAILED_ATTEMPTS_KEY, &json).await
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
