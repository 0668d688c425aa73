//! The authorization gate.
//!
//! Policies are tried in order and the first match wins:
//!
//! 1. an unexpired global unlock window authorizes everyone;
//! 2. an allow-listed IP inside a weekly window is authorized and opens a
//!    fresh unlock window;
//! 3. an IP in lockout is rate limited;
//! 4. otherwise a password is required.
//!
//! A correct password must carry the unlock duration in trailing digits.
//! Without them nothing is unlocked, so the caller is told to add one
//! instead of being handed an authorization that no later request honours.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, error, info};

use portier_shared::constants::{IP_WINDOW_UNLOCK_MINUTES, MAX_UNLOCK_MINUTES};

use crate::access_lock::AccessLockManager;
use crate::attempts::{AttemptPolicy, FailedAttemptTracker, FailureOutcome};
use crate::audit::{AuditEntry, AuditLog};
use crate::clock::Clock;
use crate::credentials::{self, AuthError};
use crate::schedule::Schedule;
use crate::state_store::StateBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    TimerUnlock,
    IpWindow,
    Password,
}

impl AuthPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthPath::TimerUnlock => "timer-unlock",
            AuthPath::IpWindow => "ip-window",
            AuthPath::Password => "password",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Authorized(AuthPath),
    RateLimited,
    CredentialsRequired,
    InvalidCredentials,
    /// The password matched but asked for zero minutes.
    DurationRequired,
}

impl Decision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Decision::Authorized(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Authorized(AuthPath::TimerUnlock) => "unlocked-by-timer",
            Decision::Authorized(AuthPath::IpWindow) => "ip-window",
            Decision::Authorized(AuthPath::Password) => "password",
            Decision::RateLimited => "rate-limited",
            Decision::CredentialsRequired => "credentials-required",
            Decision::InvalidCredentials => "invalid-credentials",
            Decision::DurationRequired => "duration-required",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Decision::Authorized(AuthPath::TimerUnlock) => "Authorized (Auto)",
            Decision::Authorized(AuthPath::IpWindow) => "Authorized (IP window)",
            Decision::Authorized(AuthPath::Password) => "Authorized",
            Decision::RateLimited => "Too many attempts, try again later",
            Decision::CredentialsRequired => "Password required",
            Decision::InvalidCredentials => "Incorrect password",
            Decision::DurationRequired => {
                "Append the number of minutes to unlock for to the password"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub allowed_ips: Vec<IpAddr>,
    pub schedule: Schedule,
    pub ip_window_minutes: u32,
    pub max_unlock_minutes: u32,
    /// bcrypt hash of the password. `None` disables the password path.
    pub password_hash: Option<String>,
    pub attempts: AttemptPolicy,
}

impl GatePolicy {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            allowed_ips: Vec::new(),
            schedule,
            ip_window_minutes: IP_WINDOW_UNLOCK_MINUTES,
            max_unlock_minutes: MAX_UNLOCK_MINUTES,
            password_hash: None,
            attempts: AttemptPolicy::default(),
        }
    }
}

pub struct AuthorizationGate {
    access_lock: AccessLockManager,
    attempts: FailedAttemptTracker,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    policy: GatePolicy,
}

impl AuthorizationGate {
    pub fn new(backend: Arc<dyn StateBackend>, clock: Arc<dyn Clock>, policy: GatePolicy) -> Self {
        Self {
            access_lock: AccessLockManager::new(backend.clone(), clock.clone()),
            attempts: FailedAttemptTracker::new(backend.clone(), clock.clone(), policy.attempts),
            audit: AuditLog::new(backend, clock.clone()),
            clock,
            policy,
        }
    }

    pub fn is_ip_allowed(&self, ip: Option<IpAddr>) -> bool {
        ip.is_some_and(|ip| self.policy.allowed_ips.contains(&ip))
    }

    /// Current status for `ip`, recorded in the audit trail when it
    /// authorizes or refuses outright.
    pub async fn check(&self, ip: Option<IpAddr>) -> Decision {
        let key = ip_key(ip);
        let decision = self.evaluate(ip, &key).await;
        match decision {
            Decision::Authorized(path) => self.audit(&key, "-", "success", path, None).await,
            Decision::RateLimited => {
                self.audit(&key, "-", "rate-limited", AuthPath::Password, None)
                    .await
            }
            _ => {}
        }
        decision
    }

    /// Like [`check`](Self::check) but without the audit entry, for
    /// guarding individual API calls.
    pub async fn allows(&self, ip: Option<IpAddr>) -> bool {
        self.evaluate(ip, &ip_key(ip)).await.is_authorized()
    }

    /// Try a password. The non-credential policies still take precedence.
    pub async fn submit(&self, ip: Option<IpAddr>, password: &str) -> Result<Decision, AuthError> {
        let key = ip_key(ip);
        let masked = credentials::mask(password);

        match self.evaluate(ip, &key).await {
            Decision::Authorized(path) => {
                self.audit(&key, &masked, "success", path, None).await;
                return Ok(Decision::Authorized(path));
            }
            Decision::RateLimited => {
                self.audit(&key, &masked, "rate-limited", AuthPath::Password, None)
                    .await;
                return Ok(Decision::RateLimited);
            }
            _ => {}
        }

        let Some(hash) = self.policy.password_hash.as_deref() else {
            error!("AUTH_PASSWORD_HASH is not set, password login unavailable");
            return Err(AuthError::Configuration("no password hash configured".into()));
        };

        let credential = credentials::parse(password, self.policy.max_unlock_minutes);
        if credentials::verify(&credential.secret, hash).await? {
            self.attempts.reset(&key).await;
            if credential.minutes == 0 {
                self.audit(&key, &masked, "duration-required", AuthPath::Password, None)
                    .await;
                debug!(ip = %key, "password accepted without unlock duration");
                return Ok(Decision::DurationRequired);
            }
            if let Err(e) = self.access_lock.set_lock(credential.minutes).await {
                error!(error = %e, "failed to persist unlock window");
            }
            self.audit(
                &key,
                &masked,
                "success",
                AuthPath::Password,
                Some(credential.minutes),
            )
            .await;
            info!(ip = %key, minutes = credential.minutes, "password accepted");
            return Ok(Decision::Authorized(AuthPath::Password));
        }

        let outcome = self.attempts.record_failure(&key).await;
        self.audit(&key, &masked, "failure", AuthPath::Password, None)
            .await;
        Ok(match outcome {
            FailureOutcome::AlreadyLocked { until } => {
                debug!(ip = %key, %until, "password rejected during lockout");
                Decision::RateLimited
            }
            FailureOutcome::LockedOut { until } => {
                info!(ip = %key, %until, "password rejected, lockout started");
                Decision::InvalidCredentials
            }
            FailureOutcome::Counted { count } => {
                debug!(ip = %key, count, "password rejected");
                Decision::InvalidCredentials
            }
            FailureOutcome::Skipped => Decision::InvalidCredentials,
        })
    }

    async fn evaluate(&self, ip: Option<IpAddr>, key: &str) -> Decision {
        if self.access_lock.is_locked().await {
            return Decision::Authorized(AuthPath::TimerUnlock);
        }

        if self.is_ip_allowed(ip) && self.policy.schedule.is_open(self.clock.now()) {
            if let Err(e) = self.access_lock.set_lock(self.policy.ip_window_minutes).await {
                error!(error = %e, "failed to persist ip-window unlock");
            }
            info!(ip = %key, "allow-listed IP inside access window");
            return Decision::Authorized(AuthPath::IpWindow);
        }

        if self.attempts.is_locked(key).await {
            return Decision::RateLimited;
        }

        Decision::CredentialsRequired
    }

    async fn audit(
        &self,
        ip: &str,
        credential: &str,
        outcome: &str,
        path: AuthPath,
        unlock_minutes: Option<u32>,
    ) {
        self.audit
            .record(AuditEntry {
                ip,
                credential,
                outcome,
                path: path.as_str(),
                unlock_minutes,
            })
            .await;
    }
}

fn ip_key(ip: Option<IpAddr>) -> String {
    ip.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_lock::ACCESS_LOCK_KEY;
    use crate::audit::AUDIT_LOG_KEY;
    use crate::clock::ManualClock;
    use crate::schedule::parse_windows;
    use crate::state_store::MemoryBackend;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        gate: AuthorizationGate,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    fn fixture(configure: impl FnOnce(&mut GatePolicy)) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        // Wednesday 2024-05-08 07:00 in Zurich.
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 8, 5, 0, 0).unwrap(),
        ));
        let schedule = Schedule::new(
            chrono_tz::Europe::Zurich,
            parse_windows("3@09:00-17:00").unwrap(),
        );
        let mut policy = GatePolicy::new(schedule);
        policy.password_hash = Some(bcrypt::hash("secret", 4).unwrap());
        policy.allowed_ips = vec!["10.0.0.1".parse().unwrap()];
        configure(&mut policy);

        let gate = AuthorizationGate::new(backend.clone(), clock.clone(), policy);
        Fixture {
            gate,
            backend,
            clock,
        }
    }

    #[tokio::test]
    async fn anonymous_caller_needs_credentials() {
        let f = fixture(|_| {});
        assert_eq!(
            f.gate.check(ip("1.2.3.4")).await,
            Decision::CredentialsRequired
        );
        assert!(!f.gate.allows(ip("1.2.3.4")).await);
    }

    #[tokio::test]
    async fn password_with_minutes_opens_the_window() {
        let f = fixture(|_| {});

        let decision = f.gate.submit(ip("1.2.3.4"), "secret30").await.unwrap();
        assert_eq!(decision, Decision::Authorized(AuthPath::Password));

        assert_eq!(
            f.gate.check(ip("5.6.7.8")).await,
            Decision::Authorized(AuthPath::TimerUnlock)
        );

        f.clock.advance(Duration::minutes(31));
        assert_eq!(
            f.gate.check(ip("5.6.7.8")).await,
            Decision::CredentialsRequired
        );
    }

    #[tokio::test]
    async fn password_without_minutes_asks_for_a_duration() {
        let f = fixture(|_| {});
        let caller = ip("1.2.3.4");

        for attempt in ["secret", "secret0"] {
            let decision = f.gate.submit(caller, attempt).await.unwrap();
            assert_eq!(decision, Decision::DurationRequired);
            assert!(!decision.is_authorized());
        }
        assert!(f.backend.read(ACCESS_LOCK_KEY).await.unwrap().is_none());
        assert!(!f.gate.allows(caller).await);
        assert_eq!(f.gate.check(caller).await, Decision::CredentialsRequired);

        let log = f.backend.read(AUDIT_LOG_KEY).await.unwrap().unwrap();
        assert!(log.contains("Outcome: duration-required"));

        // Repeating it never counts towards a lockout.
        for _ in 0..5 {
            f.gate.submit(caller, "secret").await.unwrap();
        }
        assert_eq!(f.gate.check(caller).await, Decision::CredentialsRequired);
    }

    #[tokio::test]
    async fn default_policy_caps_unlock_minutes() {
        let f = fixture(|_| {});
        assert_eq!(f.gate.policy.max_unlock_minutes, MAX_UNLOCK_MINUTES);

        f.gate.submit(ip("1.2.3.4"), "secret999999").await.unwrap();
        f.clock
            .advance(Duration::minutes(i64::from(MAX_UNLOCK_MINUTES) - 1));
        assert!(f.gate.allows(ip("5.6.7.8")).await);
        f.clock.advance(Duration::minutes(2));
        assert!(!f.gate.allows(ip("5.6.7.8")).await);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_then_rate_limited() {
        let f = fixture(|_| {});
        let caller = ip("1.2.3.4");

        for _ in 0..5 {
            assert_eq!(
                f.gate.submit(caller, "nope").await.unwrap(),
                Decision::InvalidCredentials
            );
        }
        assert_eq!(f.gate.check(caller).await, Decision::RateLimited);
        // Even the right password is refused during the lockout.
        assert_eq!(
            f.gate.submit(caller, "secret").await.unwrap(),
            Decision::RateLimited
        );
        assert_eq!(
            f.gate.check(ip("5.6.7.8")).await,
            Decision::CredentialsRequired
        );
    }

    #[tokio::test]
    async fn timer_unlock_takes_precedence_over_failures() {
        let f = fixture(|_| {});

        f.gate.submit(ip("1.2.3.4"), "secret60").await.unwrap();
        assert_eq!(
            f.gate.submit(ip("9.9.9.9"), "wrong").await.unwrap(),
            Decision::Authorized(AuthPath::TimerUnlock)
        );
        assert_eq!(
            f.gate.check(ip("5.6.7.8")).await,
            Decision::Authorized(AuthPath::TimerUnlock)
        );
    }

    #[tokio::test]
    async fn allow_listed_ip_inside_window_unlocks_for_everyone() {
        let f = fixture(|_| {});
        f.clock.advance(Duration::hours(3));

        assert_eq!(
            f.gate.check(ip("10.0.0.1")).await,
            Decision::Authorized(AuthPath::IpWindow)
        );
        assert!(f.backend.read(ACCESS_LOCK_KEY).await.unwrap().is_some());
        assert_eq!(
            f.gate.check(ip("1.2.3.4")).await,
            Decision::Authorized(AuthPath::TimerUnlock)
        );
    }

    #[tokio::test]
    async fn allow_listed_ip_outside_window_needs_password() {
        let f = fixture(|_| {});
        assert_eq!(
            f.gate.check(ip("10.0.0.1")).await,
            Decision::CredentialsRequired
        );
    }

    #[tokio::test]
    async fn missing_hash_is_a_configuration_error() {
        let f = fixture(|policy| policy.password_hash = None);
        assert!(matches!(
            f.gate.submit(ip("1.2.3.4"), "secret").await,
            Err(AuthError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn success_clears_earlier_failures() {
        let f = fixture(|_| {});
        let caller = ip("1.2.3.4");

        for _ in 0..4 {
            f.gate.submit(caller, "nope").await.unwrap();
        }
        f.gate.submit(caller, "secret").await.unwrap();
        for _ in 0..4 {
            f.gate.submit(caller, "nope").await.unwrap();
        }
        assert_eq!(f.gate.check(caller).await, Decision::CredentialsRequired);
    }

    #[tokio::test]
    async fn unknown_peer_is_tracked_as_unknown() {
        let f = fixture(|_| {});
        f.gate.submit(None, "nope").await.unwrap();

        let log = f.backend.read(AUDIT_LOG_KEY).await.unwrap().unwrap();
        assert!(log.contains("IP: unknown | Credential: no*** | Outcome: failure"));
        assert!(!log.contains("nope"));
    }
}
