//! Process-local user lock.
//!
//! Suits single-process deployments and tests; multi-process deployments
//! plug a distributed lock behind the same [`UserLock`] trait.

use std::collections::BTreeSet;
use std::sync::Mutex;

use murmur_contract::{UserId, UserLock};

#[derive(Debug, Default)]
/// Public struct `MemoryUserLock` used across Murmur components.
pub struct MemoryUserLock {
    held: Mutex<BTreeSet<String>>,
}

impl MemoryUserLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserLock for MemoryUserLock {
    fn try_lock(&self, user_id: &UserId) -> bool {
        let mut held = self.held.lock().expect("user lock set poisoned");
        held.insert(user_id.as_str().to_string())
    }

    fn release(&self, user_id: &UserId) {
        let mut held = self.held.lock().expect("user lock set poisoned");
        held.remove(user_id.as_str());
    }
}
