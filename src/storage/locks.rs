use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::UserId;

/// Per-user write locks shared by every unit of work of one repository.
///
/// A guard plays the role of a row lock on the user's balance: units touching
/// the same user run their read-check-write one after another, units on
/// disjoint users never wait for each other.
#[derive(Clone, Default)]
pub struct UserLocks {
    table: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`. Released when the guard drops.
    pub async fn acquire(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = self.table.entry(user_id).or_default().clone();
        lock.lock_owned().await
    }
}
