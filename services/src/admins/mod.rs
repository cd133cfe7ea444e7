//! Administrator accounts.
//!
//! Admins authenticate with a username and password, independently of
//! email-verified users, and can list or remove any user or plan.

pub mod password;
pub mod routes;
pub mod storage;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use routes::admin_routes;
pub use storage::AdminStorage;

/// A stored administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admin {
    pub username: String,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
