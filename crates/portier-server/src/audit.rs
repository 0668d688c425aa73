//! Append-only authentication audit trail.
//!
//! One line per decision, written to `auth_log.txt` in the state directory.
//! Failures to write are logged and otherwise ignored.

use std::sync::Arc;

use chrono::SecondsFormat;
use tracing::warn;

use crate::clock::Clock;
use crate::state_store::StateBackend;

pub const AUDIT_LOG_KEY: &str = "auth_log.txt";

#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub ip: &'a str,
    /// Already masked.
    pub credential: &'a str,
    pub outcome: &'a str,
    pub path: &'a str,
    pub unlock_minutes: Option<u32>,
}

pub struct AuditLog {
    backend: Arc<dyn StateBackend>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(backend: Arc<dyn StateBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub async fn record(&self, entry: AuditEntry<'_>) {
        let line = self.format(&entry);
        if let Err(e) = self.backend.append(AUDIT_LOG_KEY, &line).await {
            warn!(error = %e, ip = entry.ip, "failed to write audit entry");
        }
    }

    fn format(&self, entry: &AuditEntry<'_>) -> String {
        let ts = self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut line = format!(
            "{ts} | IP: {} | Credential: {} | Outcome: {} | Path: {}",
            single_line(entry.ip),
            single_line(entry.credential),
            entry.outcome,
            entry.path,
        );
        if let Some(minutes) = entry.unlock_minutes {
            line.push_str(&format!(" | Unlock: {minutes}m"));
        }
        line
    }
}

fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { '?' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state_store::MemoryBackend;
    use chrono::{TimeZone, Utc};

    fn audit() -> (AuditLog, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let log = AuditLog::new(backend.clone(), Arc::new(ManualClock::new(at)));
        (log, backend)
    }

    #[tokio::test]
    async fn entries_are_appended_one_per_line() {
        let (log, backend) = audit();

        log.record(AuditEntry {
            ip: "1.2.3.4",
            credential: "hu***",
            outcome: "success",
            path: "password",
            unlock_minutes: Some(30),
        })
        .await;
        log.record(AuditEntry {
            ip: "1.2.3.4",
            credential: "-",
            outcome: "success",
            path: "timer-unlock",
            unlock_minutes: None,
        })
        .await;

        let raw = backend.read(AUDIT_LOG_KEY).await.unwrap().unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(
            lines,
            [
                "2024-05-01T12:00:00.000Z | IP: 1.2.3.4 | Credential: hu*** | Outcome: success | Path: password | Unlock: 30m",
                "2024-05-01T12:00:00.000Z | IP: 1.2.3.4 | Credential: - | Outcome: success | Path: timer-unlock",
            ]
        );
    }

    #[tokio::test]
    async fn control_characters_cannot_forge_lines() {
        let (log, backend) = audit();
        log.record(AuditEntry {
            ip: "unknown\nfake",
            credential: "x***",
            outcome: "failure",
            path: "password",
            unlock_minutes: None,
        })
        .await;

        let raw = backend.read(AUDIT_LOG_KEY).await.unwrap().unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(raw.contains("IP: unknown?fake"));
    }
}
