//! Reward triggers called by the appointment, registration, and checkout flows.

use chrono::Utc;
use tracing::{info, warn};

use super::{Ledger, LedgerError};
use crate::Points;
use crate::model::{
    AppointmentId, NewTransaction, ReferralPair, Transaction, TransactionKind, TransactionStatus,
    UserId,
};
use crate::store::WriteBatch;

impl Ledger {
    /// Issue a pending booking reward for `appointment`, sized by the current settings.
    ///
    /// Settle it with [`complete_booking`](Self::complete_booking) once the service
    /// was rendered, or drop it with [`cancel_booking`](Self::cancel_booking).
    pub async fn add_booking_bonus(
        &self,
        user: UserId,
        appointment: AppointmentId,
    ) -> Result<Transaction, LedgerError> {
        let settings = self.settings().await?;
        let new = NewTransaction::new(
            user,
            settings.booking_reward,
            TransactionKind::Booking,
            TransactionStatus::Pending,
        )
        .with_appointment(appointment)
        .with_description(format!("Booking reward for appointment {appointment}"));

        let (tx, _) = self.record(new, None).await?;
        Ok(tx)
    }

    /// Credit both sides of a referral immediately, as one unit.
    ///
    /// Also links `referred` to `referrer` if the registration flow has not.
    pub async fn add_referral_bonus(
        &self,
        referrer: UserId,
        referred: UserId,
    ) -> Result<ReferralPair, LedgerError> {
        if referrer == referred {
            return Err(LedgerError::SelfReferral(referrer));
        }

        let settings = self.settings().await?;
        let now = Utc::now();
        let referrer_tx = Transaction::create(
            NewTransaction::new(
                referrer,
                settings.referrer_reward,
                TransactionKind::Referral,
                TransactionStatus::Completed,
            )
            .with_referred_user(referred)
            .with_description(format!("Reward for referring user {referred}")),
            now,
        );
        let referred_tx = Transaction::create(
            NewTransaction::new(
                referred,
                settings.referral_reward,
                TransactionKind::Referral,
                TransactionStatus::Completed,
            )
            .with_description(format!("Welcome reward for joining through user {referrer}")),
            now,
        );

        let mut batch = WriteBatch::new();
        batch
            .link_referrer(referred, referrer)
            .insert(referrer_tx.clone())
            .adjust_balance(referrer, referrer_tx.amount, None)
            .insert(referred_tx.clone())
            .adjust_balance(referred, referred_tx.amount, None);
        self.store.commit(batch).await?;

        info!(
            referrer,
            referred,
            referrer_amount = %referrer_tx.amount,
            referred_amount = %referred_tx.amount,
            "referral rewards credited"
        );

        Ok(ReferralPair {
            referrer: referrer_tx,
            referred: referred_tx,
        })
    }

    /// Debit `amount` points redeemed against `appointment`. The sign of `amount` is ignored.
    ///
    /// Fails with [`LedgerError::InsufficientBalance`] when the balance does not
    /// cover the spend, unless the ledger was configured to allow overdrafts.
    pub async fn spend_bonus(
        &self,
        user: UserId,
        amount: Points,
        appointment: AppointmentId,
    ) -> Result<Transaction, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(amount, TransactionKind::Spent));
        }

        let debit = amount
            .checked_abs()
            .ok_or(LedgerError::AmountOverflow(user))?;
        let new = NewTransaction::new(
            user,
            -debit,
            TransactionKind::Spent,
            TransactionStatus::Completed,
        )
        .with_appointment(appointment)
        .with_description(format!("Redeemed against appointment {appointment}"));

        let (tx, committed) = self.record(new, self.spend_floor()).await?;

        if let Some(balance) = committed.balance(user) {
            if balance.is_negative() {
                warn!(user, balance = %balance, "spend left a negative balance");
            }
        }
        Ok(tx)
    }

    /// Administrator correction, applied immediately. `amount` may be negative.
    pub async fn manual_adjustment(
        &self,
        user: UserId,
        amount: Points,
        description: impl Into<String>,
    ) -> Result<Transaction, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(amount, TransactionKind::Manual));
        }

        let new = NewTransaction::new(
            user,
            amount,
            TransactionKind::Manual,
            TransactionStatus::Completed,
        )
        .with_description(description);

        let (tx, _) = self.record(new, None).await?;
        Ok(tx)
    }

    /// The booking reward issued for `appointment`, if any.
    pub async fn booking_transaction(
        &self,
        appointment: AppointmentId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .store
            .find_transaction(appointment, TransactionKind::Booking)
            .await?)
    }

    /// Settle the booking reward of a completed appointment.
    pub async fn complete_booking(
        &self,
        appointment: AppointmentId,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.move_booking(appointment, TransactionStatus::Completed)
            .await
    }

    /// Cancel the booking reward of a cancelled appointment, reversing it if it was settled.
    pub async fn cancel_booking(
        &self,
        appointment: AppointmentId,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.move_booking(appointment, TransactionStatus::Cancelled)
            .await
    }

    async fn move_booking(
        &self,
        appointment: AppointmentId,
        status: TransactionStatus,
    ) -> Result<Option<Transaction>, LedgerError> {
        match self.booking_transaction(appointment).await? {
            Some(tx) => self.update_transaction_status(tx.id, status).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::LedgerConfig;
    use crate::engine::{Ledger, LedgerError};
    use crate::model::{NewUser, SettingsUpdate, TransactionKind, TransactionStatus, UserId};
    use crate::store::{LedgerStore, MemoryStore};
    use crate::Points;

    async fn ledger_with(config: LedgerConfig, ids: &[UserId]) -> Ledger {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), &config);
        ledger.initialize().await.unwrap();
        for id in ids {
            ledger
                .register_user(NewUser::new(*id, format!("user {id}")))
                .await
                .unwrap();
        }
        ledger
    }

    async fn ledger(ids: &[UserId]) -> Ledger {
        ledger_with(LedgerConfig::default(), ids).await
    }

    // Booking

    #[tokio::test]
    async fn booking_bonus_lifecycle() {
        let ledger = ledger(&[1]).await;

        let tx = ledger.add_booking_bonus(1, 100).await.unwrap();
        assert_eq!(tx.kind, TransactionKind::Booking);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount, Points::new(300));
        assert_eq!(tx.appointment_id, Some(100));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::ZERO);

        ledger
            .update_transaction_status(tx.id, TransactionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(300));

        ledger
            .update_transaction_status(tx.id, TransactionStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::ZERO);
    }

    #[tokio::test]
    async fn booking_bonus_uses_current_settings() {
        let ledger = ledger(&[1]).await;
        ledger
            .update_settings(SettingsUpdate {
                booking_reward: Some(Points::new(500)),
                ..Default::default()
            })
            .await
            .unwrap();

        let tx = ledger.add_booking_bonus(1, 7).await.unwrap();
        assert_eq!(tx.amount, Points::new(500));
    }

    #[tokio::test]
    async fn booking_bonus_requires_initialized_settings() {
        let ledger = Ledger::in_memory();
        ledger.register_user(NewUser::new(1, "a")).await.unwrap();
        assert!(matches!(
            ledger.add_booking_bonus(1, 7).await,
            Err(LedgerError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn one_booking_reward_per_appointment() {
        let ledger = ledger(&[1, 2]).await;
        ledger.add_booking_bonus(1, 100).await.unwrap();

        let retry = ledger.add_booking_bonus(1, 100).await;
        assert!(matches!(
            retry,
            Err(LedgerError::DuplicateReward {
                kind: TransactionKind::Booking,
                ..
            })
        ));
        assert_eq!(ledger.user_transactions(1).await.unwrap().len(), 1);

        // also across users
        assert!(ledger.add_booking_bonus(2, 100).await.is_err());
    }

    #[tokio::test]
    async fn complete_and_cancel_by_appointment() {
        let ledger = ledger(&[1]).await;
        ledger.add_booking_bonus(1, 100).await.unwrap();
        ledger.add_booking_bonus(1, 101).await.unwrap();

        let settled = ledger.complete_booking(100).await.unwrap().unwrap();
        assert_eq!(settled.status, TransactionStatus::Completed);

        let voided = ledger.cancel_booking(101).await.unwrap().unwrap();
        assert_eq!(voided.status, TransactionStatus::Cancelled);

        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(300));
        assert_eq!(ledger.complete_booking(999).await.unwrap(), None);
        assert_eq!(
            ledger.booking_transaction(100).await.unwrap(),
            Some(settled)
        );
    }

    // Referral

    #[tokio::test]
    async fn referral_credits_both_users() {
        let ledger = ledger(&[1, 2]).await;

        let pair = ledger.add_referral_bonus(1, 2).await.unwrap();

        assert_eq!(pair.referrer.user_id, 1);
        assert_eq!(pair.referrer.referred_user_id, Some(2));
        assert_eq!(pair.referred.user_id, 2);
        assert_eq!(pair.referred.referred_user_id, None);
        for tx in [&pair.referrer, &pair.referred] {
            assert_eq!(tx.kind, TransactionKind::Referral);
            assert_eq!(tx.status, TransactionStatus::Completed);
        }

        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(2000));
        assert_eq!(ledger.user_balance(2).await.unwrap(), Points::new(2000));
        assert_eq!(ledger.referrer(2).await.unwrap().map(|u| u.id), Some(1));
    }

    #[tokio::test]
    async fn referral_pair_is_atomic() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), &LedgerConfig::default());
        ledger.initialize().await.unwrap();
        for id in [1, 2] {
            ledger
                .register_user(NewUser::new(id, format!("user {id}")))
                .await
                .unwrap();
        }

        // link, insert + credit referrer, then fail on the referred side
        store.fail_after(3);
        let result = ledger.add_referral_bonus(1, 2).await;

        assert!(matches!(result, Err(LedgerError::Store(_))));
        assert!(store.all_transactions().await.unwrap().is_empty());
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::ZERO);
        assert_eq!(ledger.user_balance(2).await.unwrap(), Points::ZERO);
        assert_eq!(ledger.referrer(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn referral_for_unknown_user_changes_nothing() {
        let ledger = ledger(&[1]).await;
        assert!(matches!(
            ledger.add_referral_bonus(1, 2).await,
            Err(LedgerError::UnknownUser(2))
        ));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::ZERO);
        assert!(ledger.all_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn referral_rules() {
        let ledger = ledger(&[1, 2, 3]).await;

        assert!(matches!(
            ledger.add_referral_bonus(1, 1).await,
            Err(LedgerError::SelfReferral(1))
        ));

        ledger.add_referral_bonus(1, 3).await.unwrap();
        // a user can only be referred once
        assert!(matches!(
            ledger.add_referral_bonus(2, 3).await,
            Err(LedgerError::AlreadyReferred {
                user: 3,
                existing: 1
            })
        ));
        assert!(matches!(
            ledger.add_referral_bonus(1, 3).await,
            Err(LedgerError::DuplicateReward {
                kind: TransactionKind::Referral,
                ..
            })
        ));
        assert_eq!(ledger.user_balance(3).await.unwrap(), Points::new(2000));
    }

    #[tokio::test]
    async fn referral_respects_registration_link() {
        let ledger = ledger(&[1]).await;
        ledger
            .register_user(NewUser::new(2, "invited").referred_by(1))
            .await
            .unwrap();

        ledger.add_referral_bonus(1, 2).await.unwrap();
        assert_eq!(ledger.referred_users(1).await.unwrap().len(), 1);
    }

    // Spend

    #[tokio::test]
    async fn spend_debits_immediately() {
        let ledger = ledger(&[1]).await;
        ledger
            .manual_adjustment(1, Points::new(500), "seed")
            .await
            .unwrap();

        let tx = ledger.spend_bonus(1, Points::new(200), 9).await.unwrap();
        assert_eq!(tx.kind, TransactionKind::Spent);
        assert_eq!(tx.amount, Points::new(-200));
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.appointment_id, Some(9));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(300));
    }

    #[tokio::test]
    async fn spend_sign_is_normalized() {
        let ledger = ledger(&[1]).await;
        ledger
            .manual_adjustment(1, Points::new(500), "seed")
            .await
            .unwrap();
        let tx = ledger.spend_bonus(1, Points::new(-200), 9).await.unwrap();
        assert_eq!(tx.amount, Points::new(-200));
    }

    #[tokio::test]
    async fn spend_rejects_overdraft() {
        let ledger = ledger(&[1]).await;
        ledger
            .manual_adjustment(1, Points::new(500), "seed")
            .await
            .unwrap();

        let result = ledger.spend_bonus(1, Points::new(700), 9).await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { user: 1, available, requested })
                if available == Points::new(500) && requested == Points::new(700)
        ));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(500));
        assert_eq!(ledger.user_transactions(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn spend_exact_balance_succeeds() {
        let ledger = ledger(&[1]).await;
        ledger
            .manual_adjustment(1, Points::new(500), "seed")
            .await
            .unwrap();
        ledger.spend_bonus(1, Points::new(500), 9).await.unwrap();
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::ZERO);
    }

    #[tokio::test]
    async fn spend_overdraft_when_allowed() {
        let config = LedgerConfig {
            allow_overdraft: true,
            ..Default::default()
        };
        let ledger = ledger_with(config, &[1]).await;
        ledger
            .manual_adjustment(1, Points::new(500), "seed")
            .await
            .unwrap();

        let tx = ledger.spend_bonus(1, Points::new(700), 1).await.unwrap();
        assert_eq!(tx.amount, Points::new(-700));
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(-200));
    }

    #[tokio::test]
    async fn spend_of_min_amount_is_rejected() {
        let config = LedgerConfig {
            allow_overdraft: true,
            ..Default::default()
        };
        let ledger = ledger_with(config, &[1]).await;

        assert!(matches!(
            ledger.spend_bonus(1, Points::new(i64::MIN), 9).await,
            Err(LedgerError::AmountOverflow(1))
        ));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::ZERO);
        assert!(ledger.user_transactions(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_credit_past_max_is_rejected() {
        let ledger = ledger(&[1]).await;
        ledger
            .manual_adjustment(1, Points::new(i64::MAX), "max")
            .await
            .unwrap();

        assert!(matches!(
            ledger.manual_adjustment(1, Points::new(1), "one more").await,
            Err(LedgerError::AmountOverflow(1))
        ));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(i64::MAX));
        assert_eq!(ledger.user_transactions(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overdraft_debit_past_min_is_rejected() {
        let config = LedgerConfig {
            allow_overdraft: true,
            ..Default::default()
        };
        let ledger = ledger_with(config, &[1]).await;
        ledger
            .manual_adjustment(1, Points::new(-10), "debt")
            .await
            .unwrap();

        assert!(matches!(
            ledger.spend_bonus(1, Points::new(i64::MAX), 9).await,
            Err(LedgerError::AmountOverflow(1))
        ));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(-10));
    }

    #[tokio::test]
    async fn zero_amounts_are_rejected() {
        let ledger = ledger(&[1]).await;
        assert!(matches!(
            ledger.spend_bonus(1, Points::ZERO, 1).await,
            Err(LedgerError::InvalidAmount(_, TransactionKind::Spent))
        ));
        assert!(matches!(
            ledger.manual_adjustment(1, Points::ZERO, "nothing").await,
            Err(LedgerError::InvalidAmount(_, TransactionKind::Manual))
        ));
    }

    #[tokio::test]
    async fn cancelling_a_spend_refunds_it() {
        let ledger = ledger(&[1]).await;
        ledger
            .manual_adjustment(1, Points::new(500), "seed")
            .await
            .unwrap();
        let tx = ledger.spend_bonus(1, Points::new(200), 9).await.unwrap();

        ledger
            .update_transaction_status(tx.id, TransactionStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(500));
    }

    // Manual

    #[tokio::test]
    async fn manual_adjustment_can_debit() {
        let ledger = ledger(&[1]).await;
        let tx = ledger
            .manual_adjustment(1, Points::new(-100), "support correction")
            .await
            .unwrap();

        assert_eq!(tx.kind, TransactionKind::Manual);
        assert_eq!(tx.description.as_deref(), Some("support correction"));
        assert_eq!(ledger.user_balance(1).await.unwrap(), Points::new(-100));
    }
}
