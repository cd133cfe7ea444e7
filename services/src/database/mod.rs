//! Relational storage plumbing.
//!
//! - [`create_pool`] / [`run_migrations`]: PostgreSQL pool setup and the
//!   versioned schema under `migrations/`.
//! - [`PgStorage`]: the production repository. Each domain module
//!   (`users`, `plans`, `admins`, `verification`) implements its storage
//!   trait for it.
//! - [`MockStorage`]: in-memory repository implementing the same traits,
//!   used by unit and integration tests.

mod mock;

pub use mock::MockStorage;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;

use crate::admins::storage::AdminStorage;
use crate::config::Config;
use crate::plans::storage::PlanStorage;
use crate::users::storage::UserStorage;
use crate::verification::storage::VerificationStore;

/// Initialize a PostgreSQL connection pool
pub async fn create_pool(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(config.database_url())
        .await?;

    tracing::info!("Database connection pool established");

    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    tracing::info!("Database migrations applied");

    Ok(())
}

/// Error type shared by every repository trait.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The addressed record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness, foreign-key or check constraint was violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The input was rejected before reaching the database.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Any other database failure.
    #[error("Storage error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }
}

/// Classify a sqlx error, turning constraint violations into
/// [`StorageError::Constraint`] with `context` as the message.
pub(crate) fn map_sqlx_error(err: sqlx::Error, context: impl Into<String>) -> StorageError {
    if let Some(db_err) = err.as_database_error()
        && (db_err.is_unique_violation()
            || db_err.is_foreign_key_violation()
            || db_err.is_check_violation())
    {
        return StorageError::Constraint(context.into());
    }

    StorageError::Database(err.to_string())
}

/// Connectivity check used by `/is-health`.
pub trait SqlStorage: Clone + Send + Sync + 'static {
    fn is_connected(&self) -> impl Future<Output = bool> + Send;
}

/// Everything the HTTP layer needs from the repository.
pub trait Storage: SqlStorage + UserStorage + PlanStorage + AdminStorage + VerificationStore {}

impl<T> Storage for T where
    T: SqlStorage + UserStorage + PlanStorage + AdminStorage + VerificationStore
{
}

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SqlStorage for PgStorage {
    async fn is_connected(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
