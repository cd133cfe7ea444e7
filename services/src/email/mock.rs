//! Mock mailer for testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::traits::Mailer;
use super::{MailError, OutgoingEmail, parse_address};

/// In-memory mailer. Clones share the outbox.
#[derive(Clone, Default)]
pub struct MockMailer {
    sent: Arc<RwLock<Vec<OutgoingEmail>>>,
    failing: Arc<AtomicBool>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails with a transport error.
    pub fn failing() -> Self {
        let mailer = Self::default();
        mailer.set_failing(true);
        mailer
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.read().expect("lock poisoned").clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        self.sent
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|m| m.to == address)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sent.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Mailer for MockMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        parse_address(&email.to)?;

        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Transport(
                "mock transport is configured to fail".to_owned(),
            ));
        }

        self.sent.write().expect("lock poisoned").push(email);
        Ok(())
    }
}
