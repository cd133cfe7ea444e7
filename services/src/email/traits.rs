use super::{MailError, OutgoingEmail};
use std::future::Future;

/// Delivers a single message. No retries; the caller decides what a
/// failure means.
pub trait Mailer: Clone + Send + Sync + 'static {
    fn send(&self, email: OutgoingEmail) -> impl Future<Output = Result<(), MailError>> + Send;
}
