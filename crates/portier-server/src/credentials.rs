//! Password parsing and verification.
//!
//! A submitted password is the secret followed by an optional run of ASCII
//! digits giving the unlock duration in minutes, e.g. `hunter230`.

use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password authentication is not configured: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret: String,
    /// Requested unlock duration, already capped.
    pub minutes: u32,
}

/// Split `input` into its secret and its trailing minutes, capping the
/// duration at `max_minutes`. No trailing digits means zero minutes.
pub fn parse(input: &str, max_minutes: u32) -> Credential {
    let secret = input.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &input[secret.len()..];

    let minutes = digits
        .bytes()
        .fold(0u32, |acc, b| {
            acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))
        })
        .min(max_minutes);

    Credential {
        secret: secret.to_owned(),
        minutes,
    }
}

/// Check `secret` against a bcrypt `hash` off the async runtime.
pub async fn verify(secret: &str, hash: &str) -> Result<bool, AuthError> {
    let secret = secret.to_owned();
    let hash = hash.to_owned();

    let result = tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash))
        .await
        .map_err(|e| AuthError::Configuration(format!("verification task failed: {e}")))?;

    result.map_err(|e| {
        error!(error = %e, "configured password hash is unusable");
        AuthError::Configuration(e.to_string())
    })
}

/// Audit-safe rendering of a credential: the first two characters and a
/// fixed suffix, so neither the secret nor its length is recorded.
pub fn mask(input: &str) -> String {
    let visible: String = input
        .chars()
        .take(2)
        .map(|c| if c.is_control() { '?' } else { c })
        .collect();
    format!("{visible}***")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_digits_become_minutes() {
        assert_eq!(
            parse("secret30", 1440),
            Credential {
                secret: "secret".into(),
                minutes: 30
            }
        );
    }

    #[test]
    fn no_digits_means_zero_minutes() {
        assert_eq!(parse("secret", 1440).minutes, 0);
        assert_eq!(parse("", 1440).secret, "");
    }

    #[test]
    fn only_the_trailing_run_is_stripped() {
        let credential = parse("s3cret15", 1440);
        assert_eq!(credential.secret, "s3cret");
        assert_eq!(credential.minutes, 15);
    }

    #[test]
    fn huge_durations_are_capped() {
        assert_eq!(parse("secret99999999999999999999", 1440).minutes, 1440);
        assert_eq!(parse("secret2000", 1440).minutes, 1440);
    }

    #[test]
    fn mask_hides_all_but_two_chars() {
        assert_eq!(mask("hunter230"), "hu***");
        assert_eq!(mask("a"), "a***");
        assert_eq!(mask("\n\tabc"), "??***");
    }

    #[tokio::test]
    async fn verify_against_bcrypt_hash() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        assert!(verify("secret", &hash).await.unwrap());
        assert!(!verify("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_a_configuration_error() {
        assert!(matches!(
            verify("secret", "not-a-hash").await,
            Err(AuthError::Configuration(_))
        ));
    }
}
