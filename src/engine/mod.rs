//! Bonus ledger engine.
//!
//! The engine is the only writer of the transaction log and of cached user
//! balances. Every write goes through one [`WriteBatch`] so a transaction row
//! and its balance effect land together or not at all.
//! It can also replay an async stream of [`LedgerEvent`]s.

use chrono::Utc;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Points;
use crate::config::{LedgerConfig, RewardDefaults};
use crate::model::{
    LedgerEvent, NewTransaction, NewUser, Settings, SettingsUpdate, Transaction, TransactionId,
    TransactionStatus, User,
};
use crate::model::TransactionKind;
use crate::store::{Committed, LedgerStore, MemoryStore, SqliteStore, WriteBatch};

mod audit;
mod error;
mod query;
mod rewards;
pub mod state;

pub use audit::BalanceDrift;
pub use error::LedgerError;
pub use query::AccountSummary;
use state::Transition;

/// The bonus ledger.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    defaults: RewardDefaults,
    allow_overdraft: bool,
}

/// Public API
impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> Self {
        Self {
            store,
            defaults: config.rewards,
            allow_overdraft: config.allow_overdraft,
        }
    }

    /// Ledger over a fresh in-memory store with default configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), &LedgerConfig::default())
    }

    /// Build the store named by `config`: SQLite when `database_url` is set, memory otherwise.
    pub async fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let store: Arc<dyn LedgerStore> = match &config.database_url {
            Some(url) => Arc::new(SqliteStore::connect(url).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.store)
    }

    /// Create the settings row from the configured defaults if it does not exist yet.
    /// Run once at startup, before any reward is issued.
    ///
    /// Negative configured defaults are rejected even when the row already exists.
    pub async fn initialize(&self) -> Result<Settings, LedgerError> {
        check_rewards([
            self.defaults.booking,
            self.defaults.referrer,
            self.defaults.referral,
        ])?;

        let settings = self
            .store
            .insert_settings_if_absent(&Settings::from_defaults(&self.defaults, Utc::now()))
            .await?;
        info!(
            booking = %settings.booking_reward,
            referrer = %settings.referrer_reward,
            referral = %settings.referral_reward,
            "bonus settings ready"
        );
        Ok(settings)
    }

    pub async fn settings(&self) -> Result<Settings, LedgerError> {
        self.store
            .load_settings()
            .await?
            .ok_or(LedgerError::NotInitialized)
    }

    /// Merge `update` over the current settings and stamp `updated_at`.
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<Settings, LedgerError> {
        let mut settings = self.settings().await?;
        check_rewards(
            [
                update.booking_reward,
                update.referrer_reward,
                update.referral_reward,
            ]
            .into_iter()
            .flatten(),
        )?;

        if let Some(amount) = update.booking_reward {
            settings.booking_reward = amount;
        }
        if let Some(amount) = update.referrer_reward {
            settings.referrer_reward = amount;
        }
        if let Some(amount) = update.referral_reward {
            settings.referral_reward = amount;
        }
        settings.updated_at = Utc::now();

        self.store.save_settings(&settings).await?;
        info!(
            booking = %settings.booking_reward,
            referrer = %settings.referrer_reward,
            referral = %settings.referral_reward,
            "bonus settings updated"
        );
        Ok(settings)
    }

    /// Add a user with an empty balance.
    pub async fn register_user(&self, new: NewUser) -> Result<User, LedgerError> {
        if new.referred_by == Some(new.id) {
            return Err(LedgerError::SelfReferral(new.id));
        }

        let user = User {
            id: new.id,
            name: new.name,
            email: new.email,
            referred_by: new.referred_by,
            bonus_balance: Points::ZERO,
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;
        info!(user = user.id, referrer = ?user.referred_by, "user registered");
        Ok(user)
    }

    /// Record a transaction. A `completed` transaction is credited in the same unit.
    ///
    /// `spent` transactions get the same overdraft check as [`spend_bonus`](Self::spend_bonus).
    pub async fn create_transaction(&self, new: NewTransaction) -> Result<Transaction, LedgerError> {
        let floor = match new.kind {
            TransactionKind::Spent => self.spend_floor(),
            _ => None,
        };
        let (tx, _) = self.record(new, floor).await?;
        Ok(tx)
    }

    /// Move a transaction to `status`, applying the balance effect of the transition.
    ///
    /// Returns `Ok(None)` for an unknown id. Transitions outside the state machine
    /// fail with [`LedgerError::InvalidTransition`] and change nothing.
    pub async fn update_transaction_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<Option<Transaction>, LedgerError> {
        let Some(current) = self.store.transaction(id).await? else {
            return Ok(None);
        };

        let transition =
            Transition::between(current.status, status).ok_or(LedgerError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            })?;
        if transition == Transition::Noop {
            return Ok(Some(current));
        }

        let now = Utc::now();
        let delta = transition
            .delta(current.amount)
            .ok_or(LedgerError::AmountOverflow(current.user_id))?;
        let mut batch = WriteBatch::new();
        batch
            .set_status(id, current.status, status, now)
            .adjust_balance(current.user_id, delta, None);
        self.store.commit(batch).await?;

        info!(
            transaction = %id,
            user = current.user_id,
            from = %current.status,
            to = %status,
            delta = %delta,
            "transaction status updated"
        );

        Ok(Some(Transaction {
            status,
            updated_at: now,
            ..current
        }))
    }

    /// Apply events from `stream` until it ends. Failed events are logged and skipped.
    pub async fn run(&self, mut stream: impl Stream<Item = LedgerEvent> + Unpin) {
        while let Some(event) = stream.next().await {
            // a failed event must not stop the replay
            let _ = self.apply(event).await;
        }
    }

    /// Apply a single business event.
    pub async fn apply(&self, event: LedgerEvent) -> Result<(), LedgerError> {
        let kind = event.name();
        let result = match event {
            LedgerEvent::Register {
                user,
                name,
                referrer,
            } => {
                let mut new = NewUser::new(user, name);
                new.referred_by = referrer;
                self.register_user(new).await.map(drop)
            }
            LedgerEvent::Booking { user, appointment } => {
                self.add_booking_bonus(user, appointment).await.map(drop)
            }
            LedgerEvent::Complete { appointment } => self
                .complete_booking(appointment)
                .await
                .and_then(|tx| tx.map(drop).ok_or(LedgerError::NoBookingReward(appointment))),
            LedgerEvent::Cancel { appointment } => self
                .cancel_booking(appointment)
                .await
                .and_then(|tx| tx.map(drop).ok_or(LedgerError::NoBookingReward(appointment))),
            LedgerEvent::Referral { referrer, referred } => {
                self.add_referral_bonus(referrer, referred).await.map(drop)
            }
            LedgerEvent::Spend {
                user,
                amount,
                appointment,
            } => self.spend_bonus(user, amount, appointment).await.map(drop),
            LedgerEvent::Manual {
                user,
                amount,
                description,
            } => self
                .manual_adjustment(user, amount, description)
                .await
                .map(drop),
        };
        Self::log_result(kind, &result);
        result
    }
}

/// Private API
impl Ledger {
    fn log_result(event: &str, result: &Result<(), LedgerError>) {
        match result {
            Ok(()) => info!(event, "event applied"),
            Err(e) => warn!(event, reason = %e, "event skipped"),
        }
    }

    /// Lowest balance a spend may leave behind.
    fn spend_floor(&self) -> Option<Points> {
        (!self.allow_overdraft).then_some(Points::ZERO)
    }

    /// Write `new` and its creation-time balance effect as one unit.
    /// `floor` bounds the resulting balance.
    async fn record(
        &self,
        new: NewTransaction,
        floor: Option<Points>,
    ) -> Result<(Transaction, Committed), LedgerError> {
        let delta = state::creation_delta(new.status, new.amount)
            .ok_or(LedgerError::InvalidInitialStatus(new.status))?;

        let tx = Transaction::create(new, Utc::now());
        let mut batch = WriteBatch::new();
        batch
            .insert(tx.clone())
            .adjust_balance(tx.user_id, delta, floor);
        let committed = self.store.commit(batch).await?;

        info!(
            transaction = %tx.id,
            user = tx.user_id,
            kind = %tx.kind,
            status = %tx.status,
            amount = %tx.amount,
            "transaction recorded"
        );
        Ok((tx, committed))
    }
}

fn check_rewards(amounts: impl IntoIterator<Item = Points>) -> Result<(), LedgerError> {
    match amounts.into_iter().find(|amount| amount.is_negative()) {
        Some(amount) => Err(LedgerError::NegativeReward(amount)),
        None => Ok(()),
    }
}
