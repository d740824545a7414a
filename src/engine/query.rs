//! Read side of the ledger. Nothing here writes.

use serde::Serialize;

use super::{Ledger, LedgerError};
use crate::Points;
use crate::model::{ReferredUser, Transaction, TransactionId, TransactionStatus, User, UserId, UserSummary};

/// Balance report row for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub user: UserId,
    /// Cached balance, completed transactions only.
    pub balance: Points,
    /// Sum of pending transactions, not yet spendable.
    pub pending: Points,
}

impl Ledger {
    pub async fn user_balance(&self, user: UserId) -> Result<Points, LedgerError> {
        Ok(self.user(user).await?.bonus_balance)
    }

    pub async fn user(&self, user: UserId) -> Result<User, LedgerError> {
        self.store
            .user(user)
            .await?
            .ok_or(LedgerError::UnknownUser(user))
    }

    /// Transactions of `user`, most recent first. Empty for unknown users.
    pub async fn user_transactions(&self, user: UserId) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.user_transactions(user).await?)
    }

    /// Every transaction, most recent first.
    pub async fn all_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.all_transactions().await?)
    }

    pub async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.transaction(id).await?)
    }

    /// Users referred by `referrer`, in registration order.
    pub async fn referred_users(&self, referrer: UserId) -> Result<Vec<ReferredUser>, LedgerError> {
        let users = self.store.referred_users(referrer).await?;
        Ok(users
            .iter()
            .map(|user| ReferredUser {
                user: user.summary(),
                created_at: user.created_at,
            })
            .collect())
    }

    /// Who referred `user`, if anyone.
    pub async fn referrer(&self, user: UserId) -> Result<Option<UserSummary>, LedgerError> {
        let Some(referrer) = self.user(user).await?.referred_by else {
            return Ok(None);
        };
        Ok(Some(self.user(referrer).await?.summary()))
    }

    /// One row per registered user, ordered by id.
    pub async fn account_summaries(&self) -> Result<Vec<AccountSummary>, LedgerError> {
        let users = self.store.users().await?;
        let mut rows = Vec::with_capacity(users.len());
        for user in users {
            let pending = self
                .store
                .user_transactions(user.id)
                .await?
                .iter()
                .filter(|tx| tx.status == TransactionStatus::Pending)
                .map(|tx| tx.amount)
                .sum();
            rows.push(AccountSummary {
                user: user.id,
                balance: user.bonus_balance,
                pending,
            });
        }
        Ok(rows)
    }
}
