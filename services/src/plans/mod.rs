//! Trip plans.
//!
//! A plan is authored by one user (identified by email), carries an ordered
//! sequence of location identifiers, and is either public or private to its
//! author.

pub mod routes;
pub mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use routes::plan_routes;
pub use storage::PlanStorage;

/// A stored trip plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub author_email: String,
    pub author_name: String,
    pub author_img: String,
    pub trip_name: String,
    pub region_label: String,
    pub province_label: String,
    pub province_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// Location identifiers in visiting order. Duplicates are allowed.
    pub trip_location: Vec<String>,
    /// `true` when the plan is listed publicly.
    pub visibility: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub plan_id: String,
    pub author_email: String,
    pub author_name: String,
    pub author_img: String,
    pub trip_name: String,
    pub region_label: String,
    pub province_label: String,
    pub province_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub trip_location: Vec<String>,
    pub visibility: bool,
}

impl NewPlan {
    pub(crate) fn into_plan(self, now: DateTime<Utc>) -> Plan {
        Plan {
            plan_id: self.plan_id,
            author_email: self.author_email,
            author_name: self.author_name,
            author_img: self.author_img,
            trip_name: self.trip_name,
            region_label: self.region_label,
            province_label: self.province_label,
            province_id: self.province_id,
            start_at: self.start_at,
            end_at: self.end_at,
            trip_location: self.trip_location,
            visibility: self.visibility,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial plan update. `None` keeps the stored value.
///
/// Authorship is not updatable here; see the bulk author operations on
/// [`PlanStorage`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdate {
    pub trip_name: Option<String>,
    pub region_label: Option<String>,
    pub province_label: Option<String>,
    pub province_id: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub trip_location: Option<Vec<String>>,
    pub visibility: Option<bool>,
}

impl PlanUpdate {
    pub fn is_empty(&self) -> bool {
        self.trip_name.is_none()
            && self.region_label.is_none()
            && self.province_label.is_none()
            && self.province_id.is_none()
            && self.start_at.is_none()
            && self.end_at.is_none()
            && self.trip_location.is_none()
            && self.visibility.is_none()
    }

    /// Start and end dates after applying this update to `plan`.
    pub fn merged_dates(&self, plan: &Plan) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.start_at.unwrap_or(plan.start_at),
            self.end_at.unwrap_or(plan.end_at),
        )
    }

    pub(crate) fn apply(self, plan: &mut Plan) {
        if let Some(trip_name) = self.trip_name {
            plan.trip_name = trip_name;
        }
        if let Some(region_label) = self.region_label {
            plan.region_label = region_label;
        }
        if let Some(province_label) = self.province_label {
            plan.province_label = province_label;
        }
        if let Some(province_id) = self.province_id {
            plan.province_id = province_id;
        }
        if let Some(start_at) = self.start_at {
            plan.start_at = start_at;
        }
        if let Some(end_at) = self.end_at {
            plan.end_at = end_at;
        }
        if let Some(trip_location) = self.trip_location {
            plan.trip_location = trip_location;
        }
        if let Some(visibility) = self.visibility {
            plan.visibility = visibility;
        }
    }
}

/// Removes the last occurrence of `location` from `locations`.
///
/// Returns `false` if `location` is absent, leaving `locations` untouched.
pub(crate) fn remove_last_occurrence(locations: &mut Vec<String>, location: &str) -> bool {
    match locations.iter().rposition(|l| l == location) {
        Some(index) => {
            locations.remove(index);
            true
        }
        None => false,
    }
}
