//! Matched-transaction store
//!
//! Append-only list behind a mutex; the only piece of state shared between
//! the pairing task and the consumer side.

use std::sync::{Arc, Mutex, MutexGuard};

use super::adu::Transaction;

/// Cloneable handle to the shared transaction list
#[derive(Debug, Clone, Default)]
pub struct TransactionStore {
    inner: Arc<Mutex<Vec<Transaction>>>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Transaction>> {
        // A panic while holding this lock leaves the list intact
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, transaction: Transaction) {
        self.lock().push(transaction);
    }

    /// Take the current list, leaving the store empty
    pub fn drain(&self) -> Vec<Transaction> {
        std::mem::take(&mut *self.lock())
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }
}
