//! Balance reconciliation.
//!
//! A user's cached balance must equal the sum of their completed transactions.
//! The audit recomputes that sum from the log and reports any user whose cache
//! drifted. It never repairs anything.

use serde::Serialize;
use tracing::{debug, warn};

use super::{Ledger, LedgerError};
use crate::Points;
use crate::model::{Transaction, User, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceDrift {
    pub user: UserId,
    pub cached: Points,
    pub recomputed: Points,
}

/// Exact sum of completed amounts. Partial sums of a valid log may leave the
/// `i64` range when taken out of recording order.
fn completed_sum(txs: &[Transaction]) -> i128 {
    txs.iter()
        .filter(|tx| tx.is_completed())
        .map(|tx| i128::from(tx.amount.value()))
        .sum()
}

fn clamp(total: i128) -> Points {
    let clamped = total.clamp(i128::from(i64::MIN), i128::from(i64::MAX));
    Points::new(i64::try_from(clamped).unwrap_or_default())
}

impl Ledger {
    /// Compare one user's cached balance with their transaction log.
    pub async fn reconcile_user(&self, user: UserId) -> Result<Option<BalanceDrift>, LedgerError> {
        let user = self.user(user).await?;
        self.reconcile(&user).await
    }

    /// Reconcile every registered user, returning the ones that drifted.
    pub async fn audit(&self) -> Result<Vec<BalanceDrift>, LedgerError> {
        let users = self.store.users().await?;
        let checked = users.len();
        let mut drifts = Vec::new();
        for user in &users {
            if let Some(drift) = self.reconcile(user).await? {
                drifts.push(drift);
            }
        }
        debug!(checked, drifted = drifts.len(), "balance audit finished");
        Ok(drifts)
    }

    async fn reconcile(&self, user: &User) -> Result<Option<BalanceDrift>, LedgerError> {
        let txs = self.store.user_transactions(user.id).await?;
        let total = completed_sum(&txs);
        if total == i128::from(user.bonus_balance.value()) {
            return Ok(None);
        }
        let recomputed = clamp(total);

        warn!(
            user = user.id,
            cached = %user.bonus_balance,
            recomputed = %recomputed,
            "cached balance drifted from transaction log"
        );
        Ok(Some(BalanceDrift {
            user: user.id,
            cached: user.bonus_balance,
            recomputed,
        }))
    }
}
