//! User storage trait and implementations.
//!
//! The trait follows the repository pattern used across the crate:
//! - `UserStorage`: user records plus their ordered plan links
//! - `PgStorage`: PostgreSQL implementation (`users` and `user_plans` tables)
//! - `MockStorage`: in-memory implementation for tests
//!
//! Plan links live in the `user_plans` join table, so linking a plan that
//! does not exist, or linking the same plan twice, is a constraint error.

use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;

use super::{NewUser, User, UserUpdate};
use crate::database::{MockStorage, PgStorage, StorageError, map_sqlx_error};
use crate::email::normalize_address;

/// Trait for user storage operations.
pub trait UserStorage: Clone + Send + Sync + 'static {
    /// Creates a user.
    ///
    /// Fails with [`StorageError::Constraint`] if the user id or email is
    /// already taken, and [`StorageError::InvalidInput`] if either is empty.
    fn create_user(
        &self,
        input: NewUser,
    ) -> impl Future<Output = Result<User, StorageError>> + Send;

    fn get_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>, StorageError>> + Send;

    fn get_user_by_id(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<User>, StorageError>> + Send;

    /// Applies a partial profile update and returns the stored user.
    fn update_user(
        &self,
        email: &str,
        changes: UserUpdate,
    ) -> impl Future<Output = Result<User, StorageError>> + Send;

    /// Deletes a user and its plan links.
    ///
    /// Returns `true` if the user was deleted, `false` if it didn't exist.
    fn delete_user(&self, email: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Lists all users, oldest first.
    fn list_users(&self) -> impl Future<Output = Result<Vec<User>, StorageError>> + Send;

    /// Appends a plan to the user's plan list.
    fn add_plan_to_user(
        &self,
        email: &str,
        plan_id: &str,
    ) -> impl Future<Output = Result<User, StorageError>> + Send;

    /// Removes a plan from the user's plan list, keeping the order of the rest.
    fn remove_plan_from_user(
        &self,
        email: &str,
        plan_id: &str,
    ) -> impl Future<Output = Result<User, StorageError>> + Send;
}

fn validate_new_user(input: &NewUser) -> Result<(), StorageError> {
    if input.user_id.trim().is_empty() {
        return Err(StorageError::InvalidInput(
            "User id cannot be empty".to_owned(),
        ));
    }
    if input.email.trim().is_empty() {
        return Err(StorageError::InvalidInput("Email cannot be empty".to_owned()));
    }
    Ok(())
}

impl UserStorage for MockStorage {
    async fn create_user(&self, mut input: NewUser) -> Result<User, StorageError> {
        validate_new_user(&input)?;
        input.email = normalize_address(&input.email);

        let mut tables = self.write();

        if tables.users.contains_key(&input.user_id) {
            return Err(StorageError::Constraint(format!(
                "user id already exists: {}",
                input.user_id
            )));
        }
        if tables.user_id_for_email(&input.email).is_some() {
            return Err(StorageError::Constraint(format!(
                "email already registered: {}",
                input.email
            )));
        }

        let user = input.into_user(Utc::now());
        tables.users.insert(user.user_id.clone(), user.clone());

        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let email = normalize_address(email);
        let tables = self.read();
        Ok(tables
            .users
            .values()
            .find(|u| u.email == email)
            .map(|u| tables.hydrate_user(u)))
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        let tables = self.read();
        Ok(tables.users.get(user_id).map(|u| tables.hydrate_user(u)))
    }

    async fn update_user(&self, email: &str, changes: UserUpdate) -> Result<User, StorageError> {
        let mut tables = self.write();

        let user_id = tables
            .user_id_for_email(email)
            .ok_or_else(|| StorageError::not_found("user", email))?;

        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StorageError::not_found("user", email))?;
        changes.apply(user);
        user.updated_at = Utc::now();
        let user = user.clone();

        Ok(tables.hydrate_user(&user))
    }

    async fn delete_user(&self, email: &str) -> Result<bool, StorageError> {
        let mut tables = self.write();

        let Some(user_id) = tables.user_id_for_email(email) else {
            return Ok(false);
        };

        tables.users.remove(&user_id);
        tables.user_plans.retain(|(owner, _)| *owner != user_id);
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let tables = self.read();
        let mut users: Vec<User> = tables
            .users
            .values()
            .map(|u| tables.hydrate_user(u))
            .collect();
        users.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(users)
    }

    async fn add_plan_to_user(&self, email: &str, plan_id: &str) -> Result<User, StorageError> {
        let mut tables = self.write();

        let user_id = tables
            .user_id_for_email(email)
            .ok_or_else(|| StorageError::not_found("user", email))?;

        if !tables.plans.contains_key(plan_id) {
            return Err(StorageError::Constraint(format!(
                "plan does not exist: {plan_id}"
            )));
        }

        let already_linked = tables
            .user_plans
            .iter()
            .any(|(owner, linked)| *owner == user_id && linked == plan_id);
        if already_linked {
            return Err(StorageError::Constraint(format!(
                "plan already linked to user: {plan_id}"
            )));
        }

        tables
            .user_plans
            .push((user_id.clone(), plan_id.to_owned()));

        let user = tables
            .users
            .get(&user_id)
            .ok_or_else(|| StorageError::not_found("user", email))?;
        Ok(tables.hydrate_user(user))
    }

    async fn remove_plan_from_user(
        &self,
        email: &str,
        plan_id: &str,
    ) -> Result<User, StorageError> {
        let mut tables = self.write();

        let user_id = tables
            .user_id_for_email(email)
            .ok_or_else(|| StorageError::not_found("user", email))?;

        let position = tables
            .user_plans
            .iter()
            .position(|(owner, linked)| *owner == user_id && linked == plan_id)
            .ok_or_else(|| StorageError::not_found("user plan", plan_id))?;
        tables.user_plans.remove(position);

        let user = tables
            .users
            .get(&user_id)
            .ok_or_else(|| StorageError::not_found("user", email))?;
        Ok(tables.hydrate_user(user))
    }
}

/// Row type for user queries, with plan links aggregated in link order.
#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: String,
    email: String,
    username: String,
    firstname: String,
    lastname: String,
    tel: String,
    date_of_birth: Option<NaiveDate>,
    gender: String,
    image: String,
    plan_ids: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.user_id,
            email: row.email,
            username: row.username,
            firstname: row.firstname,
            lastname: row.lastname,
            tel: row.tel,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            image: row.image,
            plan_ids: row.plan_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_USER: &str = r#"
    SELECT u.user_id, u.email, u.username, u.firstname, u.lastname, u.tel,
           u.date_of_birth, u.gender, u.image,
           ARRAY(
               SELECT up.plan_id FROM user_plans up
               WHERE up.user_id = u.user_id
               ORDER BY up.seq
           ) AS plan_ids,
           u.created_at, u.updated_at
    FROM users u
"#;

impl PgStorage {
    async fn fetch_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} WHERE lower(u.email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.map(User::from))
    }
}

impl UserStorage for PgStorage {
    async fn create_user(&self, mut input: NewUser) -> Result<User, StorageError> {
        validate_new_user(&input)?;
        input.email = normalize_address(&input.email);

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (user_id, email, username, firstname, lastname, tel,
                               date_of_birth, gender, image)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING user_id, email, username, firstname, lastname, tel,
                      date_of_birth, gender, image, ARRAY[]::TEXT[] AS plan_ids,
                      created_at, updated_at
            "#,
        )
        .bind(&input.user_id)
        .bind(&input.email)
        .bind(&input.username)
        .bind(&input.firstname)
        .bind(&input.lastname)
        .bind(&input.tel)
        .bind(input.date_of_birth)
        .bind(&input.gender)
        .bind(&input.image)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_sqlx_error(
                e,
                format!(
                    "user id or email already exists: {} / {}",
                    input.user_id, input.email
                ),
            )
        })?;

        Ok(row.into())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        self.fetch_user_by_email(email).await
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.user_id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.map(User::from))
    }

    async fn update_user(&self, email: &str, changes: UserUpdate) -> Result<User, StorageError> {
        if changes.is_empty() {
            return self
                .fetch_user_by_email(email)
                .await?
                .ok_or_else(|| StorageError::not_found("user", email));
        }

        let (set_dob, dob) = match changes.date_of_birth {
            Some(value) => (true, value),
            None => (false, None),
        };

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            WITH updated AS (
                UPDATE users
                SET username = COALESCE($2, username),
                    firstname = COALESCE($3, firstname),
                    lastname = COALESCE($4, lastname),
                    tel = COALESCE($5, tel),
                    date_of_birth = CASE WHEN $6 THEN $7 ELSE date_of_birth END,
                    gender = COALESCE($8, gender),
                    image = COALESCE($9, image),
                    updated_at = now()
                WHERE lower(email) = lower($1)
                RETURNING *
            )
            SELECT u.user_id, u.email, u.username, u.firstname, u.lastname, u.tel,
                   u.date_of_birth, u.gender, u.image,
                   ARRAY(
                       SELECT up.plan_id FROM user_plans up
                       WHERE up.user_id = u.user_id
                       ORDER BY up.seq
                   ) AS plan_ids,
                   u.created_at, u.updated_at
            FROM updated u
            "#,
        )
        .bind(email)
        .bind(changes.username)
        .bind(changes.firstname)
        .bind(changes.lastname)
        .bind(changes.tel)
        .bind(set_dob)
        .bind(dob)
        .bind(changes.gender)
        .bind(changes.image)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(User::from)
            .ok_or_else(|| StorageError::not_found("user", email))
    }

    async fn delete_user(&self, email: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} ORDER BY u.created_at, u.user_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn add_plan_to_user(&self, email: &str, plan_id: &str) -> Result<User, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_plans (user_id, plan_id)
            SELECT user_id, $2 FROM users WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .bind(plan_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_sqlx_error(
                e,
                format!("plan missing or already linked to user: {plan_id}"),
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("user", email));
        }

        self.fetch_user_by_email(email)
            .await?
            .ok_or_else(|| StorageError::not_found("user", email))
    }

    async fn remove_plan_from_user(
        &self,
        email: &str,
        plan_id: &str,
    ) -> Result<User, StorageError> {
        let user = self
            .fetch_user_by_email(email)
            .await?
            .ok_or_else(|| StorageError::not_found("user", email))?;

        let result = sqlx::query("DELETE FROM user_plans WHERE user_id = $1 AND plan_id = $2")
            .bind(&user.user_id)
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("user plan", plan_id));
        }

        self.fetch_user_by_email(email)
            .await?
            .ok_or_else(|| StorageError::not_found("user", email))
    }
}
