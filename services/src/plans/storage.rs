//! Plan storage trait and implementations.

use chrono::{DateTime, Utc};
use std::future::Future;

use super::{NewPlan, Plan, PlanUpdate, remove_last_occurrence};
use crate::database::{MockStorage, PgStorage, StorageError, map_sqlx_error};
use crate::email::normalize_address;

/// Trait for plan storage operations.
pub trait PlanStorage: Clone + Send + Sync + 'static {
    /// Stores a new plan.
    ///
    /// Fails with [`StorageError::Constraint`] on a duplicate plan id or
    /// when `end_at` is before `start_at`.
    fn create_plan(&self, input: NewPlan)
    -> impl Future<Output = Result<Plan, StorageError>> + Send;

    fn get_plan(
        &self,
        plan_id: &str,
    ) -> impl Future<Output = Result<Option<Plan>, StorageError>> + Send;

    fn update_plan(
        &self,
        plan_id: &str,
        changes: PlanUpdate,
    ) -> impl Future<Output = Result<Plan, StorageError>> + Send;

    /// Deletes a plan and every user link to it.
    ///
    /// Returns `true` if the plan was deleted, `false` if it didn't exist.
    fn delete_plan(&self, plan_id: &str) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// All plans regardless of visibility, oldest first.
    fn list_plans(&self) -> impl Future<Output = Result<Vec<Plan>, StorageError>> + Send;

    /// Public plans only, oldest first.
    fn list_visible_plans(&self) -> impl Future<Output = Result<Vec<Plan>, StorageError>> + Send;

    fn list_plans_by_author(
        &self,
        author_email: &str,
    ) -> impl Future<Output = Result<Vec<Plan>, StorageError>> + Send;

    /// Appends a location to the plan's sequence.
    fn add_trip_location(
        &self,
        plan_id: &str,
        location: &str,
    ) -> impl Future<Output = Result<Plan, StorageError>> + Send;

    /// Removes the last occurrence of a location from the plan's sequence.
    fn delete_trip_location(
        &self,
        plan_id: &str,
        location: &str,
    ) -> impl Future<Output = Result<Plan, StorageError>> + Send;

    /// Sets `author_img` on every plan by `author_email`; returns the count.
    fn update_author_img(
        &self,
        author_email: &str,
        author_img: &str,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Sets `author_name` on every plan by `author_email`; returns the count.
    fn update_author_name(
        &self,
        author_email: &str,
        author_name: &str,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

fn validate_new_plan(input: &NewPlan) -> Result<(), StorageError> {
    if input.plan_id.trim().is_empty() {
        return Err(StorageError::InvalidInput(
            "Plan id cannot be empty".to_owned(),
        ));
    }
    if input.end_at < input.start_at {
        return Err(StorageError::Constraint(
            "plan end must not be before its start".to_owned(),
        ));
    }
    Ok(())
}

impl MockStorage {
    fn plans_in_order(&self, keep: impl Fn(&Plan) -> bool) -> Vec<Plan> {
        let tables = self.read();
        tables
            .plan_order
            .iter()
            .filter_map(|id| tables.plans.get(id))
            .filter(|plan| keep(plan))
            .cloned()
            .collect()
    }
}

impl PlanStorage for MockStorage {
    async fn create_plan(&self, mut input: NewPlan) -> Result<Plan, StorageError> {
        validate_new_plan(&input)?;
        input.author_email = normalize_address(&input.author_email);

        let mut tables = self.write();
        if tables.plans.contains_key(&input.plan_id) {
            return Err(StorageError::Constraint(format!(
                "plan id already exists: {}",
                input.plan_id
            )));
        }

        let plan = input.into_plan(Utc::now());
        tables.plan_order.push(plan.plan_id.clone());
        tables.plans.insert(plan.plan_id.clone(), plan.clone());

        Ok(plan)
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>, StorageError> {
        Ok(self.read().plans.get(plan_id).cloned())
    }

    async fn update_plan(&self, plan_id: &str, changes: PlanUpdate) -> Result<Plan, StorageError> {
        let mut tables = self.write();
        let plan = tables
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::not_found("plan", plan_id))?;

        let (start_at, end_at) = changes.merged_dates(plan);
        if end_at < start_at {
            return Err(StorageError::Constraint(
                "plan end must not be before its start".to_owned(),
            ));
        }

        changes.apply(plan);
        plan.updated_at = Utc::now();
        Ok(plan.clone())
    }

    async fn delete_plan(&self, plan_id: &str) -> Result<bool, StorageError> {
        let mut tables = self.write();
        if tables.plans.remove(plan_id).is_none() {
            return Ok(false);
        }

        tables.plan_order.retain(|id| id != plan_id);
        tables.user_plans.retain(|(_, linked)| linked != plan_id);
        Ok(true)
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, StorageError> {
        Ok(self.plans_in_order(|_| true))
    }

    async fn list_visible_plans(&self) -> Result<Vec<Plan>, StorageError> {
        Ok(self.plans_in_order(|plan| plan.visibility))
    }

    async fn list_plans_by_author(&self, author_email: &str) -> Result<Vec<Plan>, StorageError> {
        let author_email = normalize_address(author_email);
        Ok(self.plans_in_order(|plan| plan.author_email == author_email))
    }

    async fn add_trip_location(&self, plan_id: &str, location: &str) -> Result<Plan, StorageError> {
        let mut tables = self.write();
        let plan = tables
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::not_found("plan", plan_id))?;

        plan.trip_location.push(location.to_owned());
        plan.updated_at = Utc::now();
        Ok(plan.clone())
    }

    async fn delete_trip_location(
        &self,
        plan_id: &str,
        location: &str,
    ) -> Result<Plan, StorageError> {
        let mut tables = self.write();
        let plan = tables
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| StorageError::not_found("plan", plan_id))?;

        if !remove_last_occurrence(&mut plan.trip_location, location) {
            return Err(StorageError::not_found("trip location", location));
        }
        plan.updated_at = Utc::now();
        Ok(plan.clone())
    }

    async fn update_author_img(
        &self,
        author_email: &str,
        author_img: &str,
    ) -> Result<u64, StorageError> {
        let author_email = normalize_address(author_email);
        let mut tables = self.write();
        let now = Utc::now();
        let mut count = 0;
        for plan in tables
            .plans
            .values_mut()
            .filter(|p| p.author_email == author_email)
        {
            plan.author_img = author_img.to_owned();
            plan.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn update_author_name(
        &self,
        author_email: &str,
        author_name: &str,
    ) -> Result<u64, StorageError> {
        let author_email = normalize_address(author_email);
        let mut tables = self.write();
        let now = Utc::now();
        let mut count = 0;
        for plan in tables
            .plans
            .values_mut()
            .filter(|p| p.author_email == author_email)
        {
            plan.author_name = author_name.to_owned();
            plan.updated_at = now;
            count += 1;
        }
        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    plan_id: String,
    author_email: String,
    author_name: String,
    author_img: String,
    trip_name: String,
    region_label: String,
    province_label: String,
    province_id: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    trip_location: Vec<String>,
    visibility: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Self {
            plan_id: row.plan_id,
            author_email: row.author_email,
            author_name: row.author_name,
            author_img: row.author_img,
            trip_name: row.trip_name,
            region_label: row.region_label,
            province_label: row.province_label,
            province_id: row.province_id,
            start_at: row.start_at,
            end_at: row.end_at,
            trip_location: row.trip_location,
            visibility: row.visibility,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const PLAN_COLUMNS: &str = "plan_id, author_email, author_name, author_img, trip_name, \
     region_label, province_label, province_id, start_at, end_at, trip_location, \
     visibility, created_at, updated_at";

impl PgStorage {
    async fn fetch_plans(
        &self,
        filter: &str,
        bind: Option<&str>,
    ) -> Result<Vec<Plan>, StorageError> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM plans {filter} ORDER BY created_at, plan_id");
        let mut query = sqlx::query_as::<_, PlanRow>(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Plan::from).collect())
    }
}

impl PlanStorage for PgStorage {
    async fn create_plan(&self, mut input: NewPlan) -> Result<Plan, StorageError> {
        validate_new_plan(&input)?;
        input.author_email = normalize_address(&input.author_email);

        let row = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            INSERT INTO plans (plan_id, author_email, author_name, author_img, trip_name,
                               region_label, province_label, province_id, start_at, end_at,
                               trip_location, visibility)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(&input.plan_id)
        .bind(&input.author_email)
        .bind(&input.author_name)
        .bind(&input.author_img)
        .bind(&input.trip_name)
        .bind(&input.region_label)
        .bind(&input.province_label)
        .bind(&input.province_id)
        .bind(input.start_at)
        .bind(input.end_at)
        .bind(&input.trip_location)
        .bind(input.visibility)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, format!("plan id already exists: {}", input.plan_id)))?;

        Ok(row.into())
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>, StorageError> {
        let row = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE plan_id = $1"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.map(Plan::from))
    }

    async fn update_plan(&self, plan_id: &str, changes: PlanUpdate) -> Result<Plan, StorageError> {
        let row = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            UPDATE plans
            SET trip_name = COALESCE($2, trip_name),
                region_label = COALESCE($3, region_label),
                province_label = COALESCE($4, province_label),
                province_id = COALESCE($5, province_id),
                start_at = COALESCE($6, start_at),
                end_at = COALESCE($7, end_at),
                trip_location = COALESCE($8, trip_location),
                visibility = COALESCE($9, visibility),
                updated_at = now()
            WHERE plan_id = $1
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan_id)
        .bind(changes.trip_name)
        .bind(changes.region_label)
        .bind(changes.province_label)
        .bind(changes.province_id)
        .bind(changes.start_at)
        .bind(changes.end_at)
        .bind(changes.trip_location)
        .bind(changes.visibility)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, "plan end must not be before its start"))?;

        row.map(Plan::from)
            .ok_or_else(|| StorageError::not_found("plan", plan_id))
    }

    async fn delete_plan(&self, plan_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM plans WHERE plan_id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, StorageError> {
        self.fetch_plans("", None).await
    }

    async fn list_visible_plans(&self) -> Result<Vec<Plan>, StorageError> {
        self.fetch_plans("WHERE visibility", None).await
    }

    async fn list_plans_by_author(&self, author_email: &str) -> Result<Vec<Plan>, StorageError> {
        self.fetch_plans("WHERE lower(author_email) = lower($1)", Some(author_email))
            .await
    }

    async fn add_trip_location(&self, plan_id: &str, location: &str) -> Result<Plan, StorageError> {
        let row = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            UPDATE plans
            SET trip_location = array_append(trip_location, $2), updated_at = now()
            WHERE plan_id = $1
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan_id)
        .bind(location)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        row.map(Plan::from)
            .ok_or_else(|| StorageError::not_found("plan", plan_id))
    }

    async fn delete_trip_location(
        &self,
        plan_id: &str,
        location: &str,
    ) -> Result<Plan, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let current: Option<(Vec<String>,)> =
            sqlx::query_as("SELECT trip_location FROM plans WHERE plan_id = $1 FOR UPDATE")
                .bind(plan_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StorageError::Database(e.to_string()))?;

        let Some((mut locations,)) = current else {
            return Err(StorageError::not_found("plan", plan_id));
        };

        if !remove_last_occurrence(&mut locations, location) {
            return Err(StorageError::not_found("trip location", location));
        }

        let row = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            UPDATE plans SET trip_location = $2, updated_at = now()
            WHERE plan_id = $1
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan_id)
        .bind(&locations)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(row.into())
    }

    async fn update_author_img(
        &self,
        author_email: &str,
        author_img: &str,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE plans SET author_img = $2, updated_at = now() \
             WHERE lower(author_email) = lower($1)",
        )
        .bind(author_email)
        .bind(author_img)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn update_author_name(
        &self,
        author_email: &str,
        author_name: &str,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE plans SET author_name = $2, updated_at = now() \
             WHERE lower(author_email) = lower($1)",
        )
        .bind(author_email)
        .bind(author_name)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
