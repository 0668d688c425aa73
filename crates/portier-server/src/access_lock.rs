//! The global unlock window.
//!
//! A single `{ "timestamp": <ms> }` record. While it lies in the future every
//! caller is authorized. Writers race freely and the last one wins; the
//! window is minutes long and only someone who already passed the gate can
//! open it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::state_store::{StateBackend, StateError};

pub const ACCESS_LOCK_KEY: &str = "auth_lock.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLock {
    /// Expiry, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

pub struct AccessLockManager {
    backend: Arc<dyn StateBackend>,
    clock: Arc<dyn Clock>,
}

impl AccessLockManager {
    pub fn new(backend: Arc<dyn StateBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// `true` while an unexpired lock exists. An expired or unreadable
    /// record is removed on sight.
    pub async fn is_locked(&self) -> bool {
        let raw = match self.backend.read(ACCESS_LOCK_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "failed to read access lock");
                return false;
            }
        };

        let now = self.clock.now().timestamp_millis();
        match serde_json::from_str::<AccessLock>(&raw) {
            Ok(lock) if now < lock.timestamp => true,
            Ok(lock) => {
                debug!(expired_at = lock.timestamp, "access lock expired");
                self.clear().await;
                false
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable access lock");
                self.clear().await;
                false
            }
        }
    }

    /// Open the gate for `minutes` from now, replacing any existing window.
    pub async fn set_lock(&self, minutes: u32) -> Result<DateTime<Utc>, StateError> {
        let expires = self.clock.now() + Duration::minutes(i64::from(minutes));
        let record = AccessLock {
            timestamp: expires.timestamp_millis(),
        };
        let json = serde_json::to_string(&record).map_err(|e| StateError::Corrupt {
            key: ACCESS_LOCK_KEY.to_owned(),
            reason: e.to_string(),
        })?;
        self.backend.write(ACCESS_LOCK_KEY, &json).await?;

        info!(minutes, until = %expires, "access unlocked");
        Ok(expires)
    }

    async fn clear(&self) {
        if let Err(e) = self.backend.remove(ACCESS_LOCK_KEY).await {
            warn!(error = %e, "failed to clear access lock");
        }
    }
}
