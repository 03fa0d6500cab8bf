//! Accounts rejected during the current sweep.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Accounts the tool rejected since the last reset.
///
/// The scheduler resets it at the start of every sweep; both the scheduler
/// and the queue worker consult it before spending a session on an account.
#[derive(Debug, Default)]
pub struct InvalidAccountSet {
    accounts: Mutex<HashSet<String>>,
}

impl InvalidAccountSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, account: &str) -> bool {
        self.lock().insert(account.to_string())
    }

    pub fn contains(&self, account: &str) -> bool {
        self.lock().contains(account)
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
