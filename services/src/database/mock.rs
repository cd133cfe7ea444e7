//! In-memory repository for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::SqlStorage;
use crate::admins::Admin;
use crate::email::normalize_address;
use crate::plans::Plan;
use crate::users::User;
use crate::verification::{Verification, VerificationAttempt};

/// In-memory implementation of every storage trait.
///
/// Clones share the same tables, so a test can keep a handle and inspect
/// what the router wrote.
///
/// ```
/// use tiawpao_services::database::MockStorage;
///
/// let storage = MockStorage::new();
/// assert_eq!(storage.user_count(), 0);
/// ```
#[derive(Clone)]
pub struct MockStorage {
    tables: Arc<RwLock<MockTables>>,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct MockTables {
    /// Keyed by `user_id`.
    pub(crate) users: HashMap<String, User>,
    /// `(user_id, plan_id)` links in insertion order.
    pub(crate) user_plans: Vec<(String, String)>,
    /// Keyed by `plan_id`.
    pub(crate) plans: HashMap<String, Plan>,
    /// Insertion order of plans, for stable listings.
    pub(crate) plan_order: Vec<String>,
    /// Keyed by `username`.
    pub(crate) admins: HashMap<String, Admin>,
    /// Keyed by `email`.
    pub(crate) verifications: HashMap<String, Verification>,
    pub(crate) verification_attempts: Vec<VerificationAttempt>,
}

impl MockTables {
    pub(crate) fn user_id_for_email(&self, email: &str) -> Option<String> {
        let email = normalize_address(email);
        self.users
            .values()
            .find(|u| u.email == email)
            .map(|u| u.user_id.clone())
    }

    /// Copy of the user with its plan links filled in.
    pub(crate) fn hydrate_user(&self, user: &User) -> User {
        let mut user = user.clone();
        user.plan_ids = self
            .user_plans
            .iter()
            .filter(|(user_id, _)| *user_id == user.user_id)
            .map(|(_, plan_id)| plan_id.clone())
            .collect();
        user
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self {
            tables: Arc::new(RwLock::new(MockTables::default())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A storage whose health check reports the database as unreachable.
    pub fn disconnected() -> Self {
        let storage = Self::default();
        storage.set_connected(false);
        storage
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn user_count(&self) -> usize {
        self.read().users.len()
    }

    pub fn plan_count(&self) -> usize {
        self.read().plans.len()
    }

    pub fn admin_count(&self) -> usize {
        self.read().admins.len()
    }

    pub fn verification_count(&self) -> usize {
        self.read().verifications.len()
    }

    /// Logged passcode attempts of any kind for `email`.
    pub fn attempt_count(&self, email: &str) -> usize {
        self.read()
            .verification_attempts
            .iter()
            .filter(|a| a.email == email)
            .count()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, MockTables> {
        self.tables.read().expect("lock poisoned")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, MockTables> {
        self.tables.write().expect("lock poisoned")
    }
}

impl SqlStorage for MockStorage {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
