//! Email one-time passcodes.
//!
//! A user proves control of an email address by requesting a six digit code
//! and sending it back before it expires. A successful check consumes the
//! code and yields a user session token.

pub mod routes;
pub mod storage;
pub mod workflow;

use chrono::{DateTime, Utc};

pub use routes::verification_routes;
pub use storage::VerificationStore;
pub use workflow::{IssuedCode, VerificationError, VerificationWorkflow};

/// A pending passcode for one email address.
#[derive(Clone, PartialEq, Eq)]
pub struct Verification {
    pub email: String,
    pub otp: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Verification {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verification")
            .field("email", &self.email)
            .field("otp", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// What a logged attempt counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// A code was requested for the address.
    Request,
    /// A submitted code did not match.
    Failure,
}

impl AttemptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Failure => "failure",
        }
    }
}

impl std::fmt::Display for AttemptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the per-address attempt log, kept apart from [`Verification`]
/// so counting failures never rewrites the pending code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub email: String,
    pub kind: AttemptKind,
    pub attempted_at: DateTime<Utc>,
}
