//! Admin storage trait and implementations.

use chrono::{DateTime, Utc};
use std::future::Future;

use super::Admin;
use crate::database::{MockStorage, PgStorage, StorageError, map_sqlx_error};

/// Trait for admin storage operations.
pub trait AdminStorage: Clone + Send + Sync + 'static {
    /// Stores an admin with an already hashed password.
    ///
    /// Fails with [`StorageError::Constraint`] if the username is taken.
    fn create_admin(
        &self,
        username: &str,
        password_hash: &str,
    ) -> impl Future<Output = Result<Admin, StorageError>> + Send;

    fn get_admin(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<Admin>, StorageError>> + Send;

    fn count_admins(&self) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn list_admins(&self) -> impl Future<Output = Result<Vec<Admin>, StorageError>> + Send;

    /// Returns `true` if the admin was deleted, `false` if it didn't exist.
    fn delete_admin(&self, username: &str)
    -> impl Future<Output = Result<bool, StorageError>> + Send;
}

impl AdminStorage for MockStorage {
    async fn create_admin(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Admin, StorageError> {
        if username.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "Username cannot be empty".to_owned(),
            ));
        }

        let mut tables = self.write();
        if tables.admins.contains_key(username) {
            return Err(StorageError::Constraint(format!(
                "admin username already exists: {username}"
            )));
        }

        let admin = Admin {
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
            created_at: Utc::now(),
        };
        tables.admins.insert(admin.username.clone(), admin.clone());

        Ok(admin)
    }

    async fn get_admin(&self, username: &str) -> Result<Option<Admin>, StorageError> {
        Ok(self.read().admins.get(username).cloned())
    }

    async fn count_admins(&self) -> Result<u64, StorageError> {
        Ok(self.read().admins.len() as u64)
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, StorageError> {
        let mut admins: Vec<Admin> = self.read().admins.values().cloned().collect();
        admins.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(admins)
    }

    async fn delete_admin(&self, username: &str) -> Result<bool, StorageError> {
        Ok(self.write().admins.remove(username).is_some())
    }
}

#[derive(sqlx::FromRow)]
struct AdminRow {
    username: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<AdminRow> for Admin {
    fn from(row: AdminRow) -> Self {
        Self {
            username: row.username,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

impl AdminStorage for PgStorage {
    async fn create_admin(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Admin, StorageError> {
        if username.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "Username cannot be empty".to_owned(),
            ));
        }

        let row = sqlx::query_as::<_, AdminRow>(
            r#"
            INSERT INTO admins (username, password_hash)
            VALUES ($1, $2)
            RETURNING username, password_hash, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, format!("admin username already exists: {username}")))?;

        Ok(row.into())
    }

    async fn get_admin(&self, username: &str) -> Result<Option<Admin>, StorageError> {
        let row = sqlx::query_as::<_, AdminRow>(
            "SELECT username, password_hash, created_at FROM admins WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.map(Admin::from))
    }

    async fn count_admins(&self) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admins")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(count.max(0) as u64)
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, StorageError> {
        let rows = sqlx::query_as::<_, AdminRow>(
            "SELECT username, password_hash, created_at FROM admins ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Admin::from).collect())
    }

    async fn delete_admin(&self, username: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM admins WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
