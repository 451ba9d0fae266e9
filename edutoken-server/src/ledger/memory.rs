use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use edutoken_shared::domain::{Balance, Reward, Severity};

use super::LedgerBackend;
use crate::storage::{Increment, StorageError};
use crate::storage::models::{BalanceRow, Notification};

/// In-memory ledger with switchable failures.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    balances: Mutex<HashMap<String, BalanceRow>>,
    notes: Mutex<Vec<Notification>>,
    next_note: AtomicI32,
    fail_lookup: AtomicBool,
    fail_writes: AtomicBool,
    fail_notifications: AtomicBool,
}

fn injected(what: &str) -> StorageError {
    StorageError::InvalidInput(format!("injected {what} failure"))
}

fn row(user_id: &str, b: Balance) -> BalanceRow {
    BalanceRow {
        user_id: user_id.to_string(),
        academic: b.academic,
        social: b.social,
        updated_at: Utc::now().naive_utc(),
    }
}

impl MemoryLedger {
    pub fn put(&self, user_id: &str, b: Balance) {
        self.inner
            .balances
            .lock()
            .unwrap()
            .insert(user_id.to_string(), row(user_id, b));
    }

    pub fn get(&self, user_id: &str) -> Option<Balance> {
        self.inner
            .balances
            .lock()
            .unwrap()
            .get(user_id)
            .map(|r| r.balance())
    }

    pub fn rows(&self) -> usize {
        self.inner.balances.lock().unwrap().len()
    }

    pub fn notifications(&self, user_id: &str) -> usize {
        self.inner
            .notes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .count()
    }

    pub fn fail_lookup(&self, on: bool) {
        self.inner.fail_lookup.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.inner.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_notifications(&self, on: bool) {
        self.inner.fail_notifications.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerBackend for MemoryLedger {
    async fn find_balance(&self, user_id: &str) -> Result<Option<BalanceRow>, StorageError> {
        if self.inner.fail_lookup.load(Ordering::SeqCst) {
            return Err(injected("lookup"));
        }
        let found = self.inner.balances.lock().unwrap().get(user_id).cloned();
        // Let concurrent callers observe the same missing row.
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn insert_balance(
        &self,
        user_id: &str,
        balance: Balance,
    ) -> Result<Option<BalanceRow>, StorageError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("insert"));
        }
        let mut map = self.inner.balances.lock().unwrap();
        if map.contains_key(user_id) {
            return Ok(None);
        }
        let r = row(user_id, balance);
        map.insert(user_id.to_string(), r.clone());
        Ok(Some(r))
    }

    async fn increment_balance(
        &self,
        user_id: &str,
        reward: Reward,
    ) -> Result<Increment, StorageError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("increment"));
        }
        let mut map = self.inner.balances.lock().unwrap();
        let Some(existing) = map.get_mut(user_id) else {
            return Ok(Increment::Missing);
        };
        let Some(next) = existing.balance().credited(reward) else {
            return Ok(Increment::Overflow);
        };
        *existing = row(user_id, next);
        Ok(Increment::Applied(existing.clone()))
    }

    async fn append_notification(
        &self,
        user_id: &str,
        message: &str,
        severity: Severity,
    ) -> Result<Notification, StorageError> {
        if self.inner.fail_notifications.load(Ordering::SeqCst) {
            return Err(injected("notification"));
        }
        let n = Notification {
            id: self.inner.next_note.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: user_id.to_string(),
            message: message.to_string(),
            severity: severity.as_str().to_string(),
            is_read: false,
            created_at: Utc::now().naive_utc(),
        };
        self.inner.notes.lock().unwrap().push(n.clone());
        Ok(n)
    }
}
