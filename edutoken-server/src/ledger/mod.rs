//! Token ledger reconciler.
//!
//! Applies a reward to a user's balance in three steps: look the row up,
//! insert it for first-time earners or increment it in place otherwise,
//! then append a notification to the user's feed. The balance returned is
//! the one the backend confirmed, so callers can mirror it without doing
//! their own arithmetic.

#[cfg(test)]
mod memory;

use async_trait::async_trait;
use edutoken_shared::domain::{Balance, Reward, Severity, earn_message};
use tracing::{debug, error, info, warn};

use crate::storage::models::{BalanceRow, Notification};
use crate::storage::{Increment, StorageError, Store};

/// Persistence operations the reconciler needs.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    async fn find_balance(&self, user_id: &str) -> Result<Option<BalanceRow>, StorageError>;

    /// `Ok(None)` when a row for the user already exists.
    async fn insert_balance(
        &self,
        user_id: &str,
        balance: Balance,
    ) -> Result<Option<BalanceRow>, StorageError>;

    /// Atomically adds `reward` to the matching counter, refusing to move
    /// it past `i32::MAX`.
    async fn increment_balance(
        &self,
        user_id: &str,
        reward: Reward,
    ) -> Result<Increment, StorageError>;

    async fn append_notification(
        &self,
        user_id: &str,
        message: &str,
        severity: Severity,
    ) -> Result<Notification, StorageError>;
}

#[async_trait]
impl LedgerBackend for Store {
    async fn find_balance(&self, user_id: &str) -> Result<Option<BalanceRow>, StorageError> {
        Store::find_balance(self, user_id).await
    }

    async fn insert_balance(
        &self,
        user_id: &str,
        balance: Balance,
    ) -> Result<Option<BalanceRow>, StorageError> {
        Store::insert_balance(self, user_id, balance).await
    }

    async fn increment_balance(
        &self,
        user_id: &str,
        reward: Reward,
    ) -> Result<Increment, StorageError> {
        Store::increment_balance(self, user_id, reward).await
    }

    async fn append_notification(
        &self,
        user_id: &str,
        message: &str,
        severity: Severity,
    ) -> Result<Notification, StorageError> {
        Store::append_notification(self, user_id, message, severity).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("user identifier is empty")]
    MissingUser,
    #[error("reward amount must be positive, got {0}")]
    InvalidAmount(i32),
    #[error("balance would overflow")]
    Overflow,
    #[error("balance lookup failed: {0}")]
    Lookup(#[source] StorageError),
    #[error("balance write failed: {0}")]
    Write(#[source] StorageError),
}

/// Outcome of a successful earn.
#[derive(Debug, Clone)]
pub struct Earned {
    pub balance: BalanceRow,
    pub reward: Reward,
    /// `None` when the balance changed but the feed write failed.
    pub notification: Option<Notification>,
}

#[derive(Clone)]
pub struct Reconciler<B> {
    backend: B,
}

impl<B: LedgerBackend> Reconciler<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Credits `reward` to `user_id`, attributing it to `source` in the
    /// notification text.
    pub async fn earn(
        &self,
        user_id: &str,
        reward: Reward,
        source: &str,
    ) -> Result<Earned, LedgerError> {
        if user_id.trim().is_empty() {
            warn!("earn rejected: empty user id");
            return Err(LedgerError::MissingUser);
        }
        if !reward.is_valid() {
            warn!(user_id, amount = reward.amount, "earn rejected: non-positive amount");
            return Err(LedgerError::InvalidAmount(reward.amount));
        }

        let existing = self.backend.find_balance(user_id).await.map_err(|e| {
            error!(user_id, error = %e, "balance lookup failed");
            LedgerError::Lookup(e)
        })?;

        let balance = match existing {
            Some(_) => self.increment(user_id, reward).await?,
            None => self.insert_first(user_id, reward).await?,
        };

        info!(
            user_id,
            source,
            amount = reward.amount,
            kind = %reward.kind,
            academic = balance.academic,
            social = balance.social,
            "tokens earned"
        );

        let message = earn_message(&reward, source);
        let notification = match self
            .backend
            .append_notification(user_id, &message, Severity::Success)
            .await
        {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(user_id, error = %e, "earn notification not recorded");
                None
            }
        };

        Ok(Earned {
            balance,
            reward,
            notification,
        })
    }

    async fn insert_first(&self, user_id: &str, reward: Reward) -> Result<BalanceRow, LedgerError> {
        let initial = Balance::zero()
            .credited(reward)
            .ok_or(LedgerError::Overflow)?;
        let inserted = self
            .backend
            .insert_balance(user_id, initial)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "balance insert failed");
                LedgerError::Write(e)
            })?;
        match inserted {
            Some(row) => Ok(row),
            None => {
                // Lost the race to a concurrent first earn.
                debug!(user_id, "balance row appeared concurrently, incrementing");
                self.increment(user_id, reward).await
            }
        }
    }

    async fn increment(&self, user_id: &str, reward: Reward) -> Result<BalanceRow, LedgerError> {
        match self.backend.increment_balance(user_id, reward).await {
            Ok(Increment::Applied(row)) => Ok(row),
            Ok(Increment::Overflow) => {
                warn!(user_id, kind = %reward.kind, "earn rejected: counter overflow");
                Err(LedgerError::Overflow)
            }
            Ok(Increment::Missing) => {
                error!(user_id, "balance row vanished before increment");
                Err(LedgerError::Write(StorageError::InvalidInput(format!(
                    "no balance row for {user_id}"
                ))))
            }
            Err(e) => {
                error!(user_id, error = %e, "balance increment failed");
                Err(LedgerError::Write(e))
            }
        }
    }
}
