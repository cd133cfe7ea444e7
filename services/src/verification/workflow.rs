//! Issuing and checking passcodes.

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use super::storage::VerificationStore;
use super::{AttemptKind, Verification, VerificationAttempt};
use crate::config::OtpRateLimitConfig;
use crate::database::StorageError;
use crate::email::{MailError, Mailer, normalize_address, parse_address, templates};

/// Number of digits in a passcode.
pub const CODE_LENGTH: usize = 6;

/// Produces passcodes. Swapped out in tests to pin a known code.
pub type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// A uniformly random six digit code, zero padded.
pub fn random_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{value:0width$}", width = CODE_LENGTH)
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code has expired")]
    CodeExpired,

    #[error("Failed to send verification code: {0}")]
    Dispatch(#[source] MailError),

    #[error("Too many verification attempts ({0}), try again later")]
    TooManyAttempts(AttemptKind),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A code that was stored and delivered.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Ties the passcode store to the mailer.
#[derive(Clone)]
pub struct VerificationWorkflow<S, M> {
    store: S,
    mailer: M,
    ttl: TimeDelta,
    limits: OtpRateLimitConfig,
    generate: CodeGenerator,
}

impl<S, M> VerificationWorkflow<S, M>
where
    S: VerificationStore,
    M: Mailer,
{
    pub fn new(store: S, mailer: M, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::minutes(5));
        Self {
            store,
            mailer,
            ttl,
            limits: OtpRateLimitConfig::default(),
            generate: Arc::new(random_code),
        }
    }

    /// Replaces the random generator, e.g. with one returning a fixed code.
    pub fn with_code_generator(
        mut self,
        generate: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.generate = Arc::new(generate);
        self
    }

    pub fn with_rate_limit(mut self, limits: OtpRateLimitConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Stores a fresh code for `email` and emails it.
    ///
    /// Any earlier pending code for the address is replaced. If delivery
    /// fails the stored code is removed again. At most `max_requests` codes
    /// are issued per address within the rate window.
    #[tracing::instrument(skip_all)]
    pub async fn request_code(&self, email: &str) -> Result<IssuedCode, VerificationError> {
        let email = normalize_email(email)?;
        let now = Utc::now();
        self.ensure_below_limit(&email, AttemptKind::Request, now)
            .await?;
        self.record(&email, AttemptKind::Request, now).await?;

        let code = (self.generate)();
        let expires_at = now + self.ttl;

        self.store
            .upsert_verification(&email, &code, expires_at)
            .await?;

        if let Err(err) = self
            .mailer
            .send(templates::otp_email(&email, &code, expires_at))
            .await
        {
            tracing::warn!(error = %err, "Verification email failed, discarding code");
            if let Err(cleanup) = self.store.delete_verification(&email).await {
                tracing::error!(error = %cleanup, "Failed to discard undelivered code");
            }
            return Err(VerificationError::Dispatch(err));
        }

        tracing::info!(expires_at = %expires_at, "Verification code issued");

        Ok(IssuedCode {
            email,
            code,
            expires_at,
        })
    }

    /// Consumes the pending code for `email` if `code` matches and has not
    /// expired.
    ///
    /// A failed check leaves the pending code untouched and is logged as a
    /// failure. Once `max_failures` failures fall within the rate window,
    /// every check for the address is refused until they age out, even with
    /// the right code.
    #[tracing::instrument(skip_all)]
    pub async fn validate_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Verification, VerificationError> {
        let email = normalize_email(email)?;
        let now = Utc::now();
        self.ensure_below_limit(&email, AttemptKind::Failure, now)
            .await?;

        let code = code.trim();
        let outcome = if code.len() != CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
            Err(VerificationError::InvalidCode)
        } else {
            self.check_code(&email, code, now).await?
        };

        match outcome {
            Ok(consumed) => {
                self.store
                    .clear_attempts(&email, AttemptKind::Failure)
                    .await?;
                tracing::info!("Verification code accepted");
                Ok(consumed)
            }
            Err(err) => {
                self.record(&email, AttemptKind::Failure, now).await?;
                Err(err)
            }
        }
    }

    async fn check_code(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Result<Verification, VerificationError>, VerificationError> {
        if let Some(consumed) = self.store.consume_verification(email, code, now).await? {
            return Ok(Ok(consumed));
        }

        Ok(match self.store.get_verification(email).await? {
            Some(pending) if pending.otp == code && pending.is_expired_at(now) => {
                Err(VerificationError::CodeExpired)
            }
            _ => Err(VerificationError::InvalidCode),
        })
    }

    async fn ensure_below_limit(
        &self,
        email: &str,
        kind: AttemptKind,
        now: DateTime<Utc>,
    ) -> Result<(), VerificationError> {
        let limit = match kind {
            AttemptKind::Request => self.limits.max_requests,
            AttemptKind::Failure => self.limits.max_failures,
        };
        let window = TimeDelta::from_std(self.limits.window).unwrap_or(TimeDelta::minutes(15));

        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let seen = self.store.count_attempts(email, kind, since).await?;
        if seen >= limit {
            tracing::warn!(kind = %kind, seen, limit, "Verification attempts throttled");
            return Err(VerificationError::TooManyAttempts(kind));
        }
        Ok(())
    }

    async fn record(
        &self,
        email: &str,
        kind: AttemptKind,
        attempted_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.store
            .record_attempt(VerificationAttempt {
                email: email.to_owned(),
                kind,
                attempted_at,
            })
            .await
    }
}

fn normalize_email(raw: &str) -> Result<String, VerificationError> {
    parse_address(raw)
        .map(|address| normalize_address(&address.to_string()))
        .map_err(|e| VerificationError::InvalidEmail(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockStorage;
    use crate::email::MockMailer;

    fn pinned(
        storage: &MockStorage,
        mailer: &MockMailer,
        ttl: Duration,
    ) -> VerificationWorkflow<MockStorage, MockMailer> {
        VerificationWorkflow::new(storage.clone(), mailer.clone(), ttl)
            .with_code_generator(|| "482913".to_owned())
    }

    #[test]
    fn test_random_code_shape() {
        for _ in 0..100 {
            let code = random_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_request_then_validate_succeeds_once() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));

        let issued = workflow
            .request_code("user@example.com")
            .await
            .expect("should issue code");
        assert_eq!(issued.code, "482913");
        assert_eq!(mailer.sent_to("user@example.com").len(), 1);
        assert!(mailer.sent()[0].body.contains("482913"));

        workflow
            .validate_code("user@example.com", "482913")
            .await
            .expect("first use should succeed");
        let second = workflow.validate_code("user@example.com", "482913").await;

        assert!(matches!(second, Err(VerificationError::InvalidCode)));
        assert_eq!(storage.verification_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_code_does_not_mutate() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));
        workflow
            .request_code("user@example.com")
            .await
            .expect("should issue code");
        let before = storage
            .get_verification("user@example.com")
            .await
            .expect("should not error");

        let result = workflow.validate_code("user@example.com", "000000").await;

        assert!(matches!(result, Err(VerificationError::InvalidCode)));
        let after = storage
            .get_verification("user@example.com")
            .await
            .expect("should not error");
        assert_eq!(before, after);

        workflow
            .validate_code("user@example.com", "482913")
            .await
            .expect("correct code should still work");
    }

    #[tokio::test]
    async fn test_expired_code() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));
        storage
            .upsert_verification("user@example.com", "482913", Utc::now() - TimeDelta::seconds(1))
            .await
            .expect("should upsert");

        let result = workflow.validate_code("user@example.com", "482913").await;

        assert!(matches!(result, Err(VerificationError::CodeExpired)));
    }

    #[tokio::test]
    async fn test_unknown_email_is_invalid_code() {
        let storage = MockStorage::new();
        let workflow = pinned(&storage, &MockMailer::new(), Duration::from_secs(300));

        let result = workflow.validate_code("ghost@example.com", "482913").await;

        assert!(matches!(result, Err(VerificationError::InvalidCode)));
    }

    #[tokio::test]
    async fn test_malformed_email_rejected() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));

        let result = workflow.request_code("not-an-email").await;

        assert!(matches!(result, Err(VerificationError::InvalidEmail(_))));
        assert_eq!(storage.verification_count(), 0);
        assert!(mailer.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_discards_code() {
        let storage = MockStorage::new();
        let mailer = MockMailer::failing();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));

        let result = workflow.request_code("user@example.com").await;

        assert!(matches!(result, Err(VerificationError::Dispatch(_))));
        assert_eq!(storage.verification_count(), 0);
    }

    #[tokio::test]
    async fn test_later_request_replaces_earlier_code() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let next = counter.clone();
        let workflow =
            VerificationWorkflow::new(storage.clone(), mailer.clone(), Duration::from_secs(300))
                .with_code_generator(move || {
                    let n = next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    format!("{:06}", 100_000 + n)
                });

        workflow
            .request_code("user@example.com")
            .await
            .expect("should issue code");
        workflow
            .request_code("user@example.com")
            .await
            .expect("should issue code");

        let stale = workflow.validate_code("user@example.com", "100000").await;
        assert!(matches!(stale, Err(VerificationError::InvalidCode)));
        workflow
            .validate_code("user@example.com", "100001")
            .await
            .expect("latest code should validate");
    }

    #[tokio::test]
    async fn test_repeated_wrong_codes_lock_out_the_address() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));
        workflow
            .request_code("user@example.com")
            .await
            .expect("should issue code");
        let before = storage
            .get_verification("user@example.com")
            .await
            .expect("should not error");

        for _ in 0..5 {
            let result = workflow.validate_code("user@example.com", "000000").await;
            assert!(matches!(result, Err(VerificationError::InvalidCode)));
        }
        let locked = workflow.validate_code("user@example.com", "482913").await;

        assert!(matches!(
            locked,
            Err(VerificationError::TooManyAttempts(AttemptKind::Failure))
        ));
        let after = storage
            .get_verification("user@example.com")
            .await
            .expect("should not error");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));
        workflow
            .request_code("user@example.com")
            .await
            .expect("should issue code");
        for _ in 0..4 {
            let result = workflow.validate_code("user@example.com", "000000").await;
            assert!(result.is_err());
        }

        workflow
            .validate_code("user@example.com", "482913")
            .await
            .expect("code should validate below the limit");

        let failures = storage
            .count_attempts(
                "user@example.com",
                AttemptKind::Failure,
                Utc::now() - TimeDelta::hours(1),
            )
            .await
            .expect("should count");
        assert_eq!(failures, 0);
    }

    #[tokio::test]
    async fn test_code_requests_are_throttled_per_address() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300)).with_rate_limit(
            OtpRateLimitConfig {
                max_requests: 2,
                ..OtpRateLimitConfig::default()
            },
        );

        for _ in 0..2 {
            workflow
                .request_code("user@example.com")
                .await
                .expect("should issue code");
        }
        let third = workflow.request_code("User@Example.com").await;
        let other = workflow.request_code("other@example.com").await;

        assert!(matches!(
            third,
            Err(VerificationError::TooManyAttempts(AttemptKind::Request))
        ));
        assert!(other.is_ok());
        assert_eq!(mailer.sent_to("user@example.com").len(), 2);
    }

    #[tokio::test]
    async fn test_old_failures_age_out_of_the_window() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));
        workflow
            .request_code("user@example.com")
            .await
            .expect("should issue code");
        for _ in 0..5 {
            storage
                .record_attempt(VerificationAttempt {
                    email: "user@example.com".to_owned(),
                    kind: AttemptKind::Failure,
                    attempted_at: Utc::now() - TimeDelta::hours(1),
                })
                .await
                .expect("should record");
        }

        workflow
            .validate_code("user@example.com", "482913")
            .await
            .expect("stale failures should not count");
    }

    #[tokio::test]
    async fn test_mixed_case_email_shares_one_code() {
        let storage = MockStorage::new();
        let mailer = MockMailer::new();
        let workflow = pinned(&storage, &mailer, Duration::from_secs(300));

        let issued = workflow
            .request_code("  User@Example.COM ")
            .await
            .expect("should issue code");
        assert_eq!(issued.email, "user@example.com");

        let verified = workflow
            .validate_code("USER@example.com", "482913")
            .await
            .expect("case should not matter");
        assert_eq!(verified.email, "user@example.com");
    }
}
