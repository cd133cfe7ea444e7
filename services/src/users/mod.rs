//! User accounts.
//!
//! - Profile records and their ordered list of linked plan identifiers
//! - Registration, profile and plan-link endpoints
//! - Storage abstraction over PostgreSQL and the in-memory mock

pub mod routes;
pub mod storage;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use routes::user_routes;
pub use storage::UserStorage;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Globally unique identifier, fixed at creation.
    #[serde(rename = "userid")]
    pub user_id: String,
    /// Unique email address, also the login identity.
    pub email: String,
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub tel: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: String,
    pub image: String,
    /// Linked plan identifiers in the order they were added.
    #[serde(rename = "userplan_id")]
    pub plan_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub tel: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: String,
    pub image: String,
}

impl NewUser {
    pub(crate) fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            user_id: self.user_id,
            email: self.email,
            username: self.username,
            firstname: self.firstname,
            lastname: self.lastname,
            tel: self.tel,
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            image: self.image,
            plan_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial profile update. `None` keeps the stored value.
///
/// `date_of_birth` uses `Some(None)` to clear the stored date.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub tel: Option<String>,
    pub date_of_birth: Option<Option<NaiveDate>>,
    pub gender: Option<String>,
    pub image: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.firstname.is_none()
            && self.lastname.is_none()
            && self.tel.is_none()
            && self.date_of_birth.is_none()
            && self.gender.is_none()
            && self.image.is_none()
    }

    pub(crate) fn apply(self, user: &mut User) {
        if let Some(username) = self.username {
            user.username = username;
        }
        if let Some(firstname) = self.firstname {
            user.firstname = firstname;
        }
        if let Some(lastname) = self.lastname {
            user.lastname = lastname;
        }
        if let Some(tel) = self.tel {
            user.tel = tel;
        }
        if let Some(date_of_birth) = self.date_of_birth {
            user.date_of_birth = date_of_birth;
        }
        if let Some(gender) = self.gender {
            user.gender = gender;
        }
        if let Some(image) = self.image {
            user.image = image;
        }
    }
}
