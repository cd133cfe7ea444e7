//! Pending passcode storage.
//!
//! One record per email. A new request replaces the previous record; a
//! successful check deletes it in the same statement that matches it.
//! Requests and failed checks are logged in a separate attempt table used
//! for throttling.

use chrono::{DateTime, Utc};
use std::future::Future;

use super::{AttemptKind, Verification, VerificationAttempt};
use crate::database::{MockStorage, PgStorage, StorageError};

/// Trait for passcode storage operations.
pub trait VerificationStore: Clone + Send + Sync + 'static {
    /// Inserts or replaces the record for `email`.
    fn upsert_verification(
        &self,
        email: &str,
        otp: &str,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Verification, StorageError>> + Send;

    fn get_verification(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<Verification>, StorageError>> + Send;

    /// Deletes and returns the record if `otp` matches and it is still valid
    /// at `now`. Anything else returns `None` and leaves the record alone.
    fn consume_verification(
        &self,
        email: &str,
        otp: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Verification>, StorageError>> + Send;

    fn delete_verification(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Appends one entry to the attempt log.
    fn record_attempt(
        &self,
        attempt: VerificationAttempt,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Attempts of `kind` for `email` at or after `since`.
    fn count_attempts(
        &self,
        email: &str,
        kind: AttemptKind,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<u32, StorageError>> + Send;

    fn clear_attempts(
        &self,
        email: &str,
        kind: AttemptKind,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl VerificationStore for MockStorage {
    async fn upsert_verification(
        &self,
        email: &str,
        otp: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Verification, StorageError> {
        let record = Verification {
            email: email.to_owned(),
            otp: otp.to_owned(),
            expires_at,
            created_at: Utc::now(),
        };
        self.write()
            .verifications
            .insert(record.email.clone(), record.clone());
        Ok(record)
    }

    async fn get_verification(&self, email: &str) -> Result<Option<Verification>, StorageError> {
        Ok(self.read().verifications.get(email).cloned())
    }

    async fn consume_verification(
        &self,
        email: &str,
        otp: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>, StorageError> {
        let mut tables = self.write();

        let matches = tables
            .verifications
            .get(email)
            .is_some_and(|record| record.otp == otp && !record.is_expired_at(now));
        if !matches {
            return Ok(None);
        }

        Ok(tables.verifications.remove(email))
    }

    async fn delete_verification(&self, email: &str) -> Result<bool, StorageError> {
        Ok(self.write().verifications.remove(email).is_some())
    }

    async fn record_attempt(&self, attempt: VerificationAttempt) -> Result<(), StorageError> {
        self.write().verification_attempts.push(attempt);
        Ok(())
    }

    async fn count_attempts(
        &self,
        email: &str,
        kind: AttemptKind,
        since: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let count = self
            .read()
            .verification_attempts
            .iter()
            .filter(|a| a.email == email && a.kind == kind && a.attempted_at >= since)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn clear_attempts(&self, email: &str, kind: AttemptKind) -> Result<(), StorageError> {
        self.write()
            .verification_attempts
            .retain(|a| !(a.email == email && a.kind == kind));
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct VerificationRow {
    email: String,
    otp: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<VerificationRow> for Verification {
    fn from(row: VerificationRow) -> Self {
        Self {
            email: row.email,
            otp: row.otp,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

impl VerificationStore for PgStorage {
    async fn upsert_verification(
        &self,
        email: &str,
        otp: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Verification, StorageError> {
        let row = sqlx::query_as::<_, VerificationRow>(
            r#"
            INSERT INTO verifications (email, otp, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (email)
            DO UPDATE SET otp = EXCLUDED.otp,
                          expires_at = EXCLUDED.expires_at,
                          created_at = now()
            RETURNING email, otp, expires_at, created_at
            "#,
        )
        .bind(email)
        .bind(otp)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_verification(&self, email: &str) -> Result<Option<Verification>, StorageError> {
        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT email, otp, expires_at, created_at FROM verifications WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.map(Verification::from))
    }

    async fn consume_verification(
        &self,
        email: &str,
        otp: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>, StorageError> {
        let row = sqlx::query_as::<_, VerificationRow>(
            r#"
            DELETE FROM verifications
            WHERE email = $1 AND otp = $2 AND expires_at > $3
            RETURNING email, otp, expires_at, created_at
            "#,
        )
        .bind(email)
        .bind(otp)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.map(Verification::from))
    }

    async fn delete_verification(&self, email: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM verifications WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_attempt(&self, attempt: VerificationAttempt) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO verification_attempts (email, kind, attempted_at) VALUES ($1, $2, $3)",
        )
        .bind(&attempt.email)
        .bind(attempt.kind.as_str())
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    async fn count_attempts(
        &self,
        email: &str,
        kind: AttemptKind,
        since: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM verification_attempts
            WHERE email = $1 AND kind = $2 AND attempted_at >= $3
            "#,
        )
        .bind(email)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn clear_attempts(&self, email: &str, kind: AttemptKind) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM verification_attempts WHERE email = $1 AND kind = $2")
            .bind(email)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_mock_upsert_replaces_previous_code() {
        let storage = MockStorage::new();
        let expires_at = Utc::now() + Duration::minutes(5);

        storage
            .upsert_verification("a@example.com", "111111", expires_at)
            .await
            .expect("should upsert");
        storage
            .upsert_verification("a@example.com", "222222", expires_at)
            .await
            .expect("should upsert");

        let stored = storage
            .get_verification("a@example.com")
            .await
            .expect("should not error")
            .expect("record should exist");
        assert_eq!(stored.otp, "222222");
        assert_eq!(storage.verification_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_consume_once() {
        let storage = MockStorage::new();
        let now = Utc::now();
        storage
            .upsert_verification("a@example.com", "123456", now + Duration::minutes(5))
            .await
            .expect("should upsert");

        let first = storage
            .consume_verification("a@example.com", "123456", now)
            .await
            .expect("should not error");
        let second = storage
            .consume_verification("a@example.com", "123456", now)
            .await
            .expect("should not error");

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_mock_consume_wrong_code_keeps_record() {
        let storage = MockStorage::new();
        let now = Utc::now();
        storage
            .upsert_verification("a@example.com", "123456", now + Duration::minutes(5))
            .await
            .expect("should upsert");

        let result = storage
            .consume_verification("a@example.com", "000000", now)
            .await
            .expect("should not error");

        assert!(result.is_none());
        assert_eq!(storage.verification_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_consume_expired_keeps_record() {
        let storage = MockStorage::new();
        let now = Utc::now();
        storage
            .upsert_verification("a@example.com", "123456", now - Duration::seconds(1))
            .await
            .expect("should upsert");

        let result = storage
            .consume_verification("a@example.com", "123456", now)
            .await
            .expect("should not error");

        assert!(result.is_none());
        assert_eq!(storage.verification_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_attempts_counted_per_kind_and_window() {
        let storage = MockStorage::new();
        let now = Utc::now();
        let log = |kind, attempted_at| VerificationAttempt {
            email: "a@example.com".to_owned(),
            kind,
            attempted_at,
        };
        for attempt in [
            log(AttemptKind::Failure, now - Duration::hours(1)),
            log(AttemptKind::Failure, now),
            log(AttemptKind::Failure, now),
            log(AttemptKind::Request, now),
        ] {
            storage.record_attempt(attempt).await.expect("should record");
        }

        let since = now - Duration::minutes(15);
        let failures = storage
            .count_attempts("a@example.com", AttemptKind::Failure, since)
            .await
            .expect("should count");
        let other = storage
            .count_attempts("b@example.com", AttemptKind::Failure, since)
            .await
            .expect("should count");
        assert_eq!(failures, 2);
        assert_eq!(other, 0);

        storage
            .clear_attempts("a@example.com", AttemptKind::Failure)
            .await
            .expect("should clear");
        let requests = storage
            .count_attempts("a@example.com", AttemptKind::Request, since)
            .await
            .expect("should count");
        assert_eq!(requests, 1);
        assert_eq!(storage.attempt_count("a@example.com"), 1);
    }

    #[test]
    fn test_debug_redacts_code() {
        let record = Verification {
            email: "a@example.com".to_owned(),
            otp: "123456".to_owned(),
            expires_at: Utc::now(),
            created_at: Utc::now(),
        };

        let rendered = format!("{record:?}");

        assert!(!rendered.contains("123456"));
    }
}
