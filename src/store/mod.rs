//! Persistence seam for the ledger.
//!
//! The engine never talks to a database directly. It reads through
//! [`LedgerStore`] and writes by handing a [`WriteBatch`] to
//! [`LedgerStore::commit`], which applies every op or none of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::Points;
use crate::model::{
    AppointmentId, Settings, Transaction, TransactionId, TransactionKind, TransactionStatus, User,
    UserId,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("user {0} already exists")]
    UserExists(UserId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("transaction {0} already exists")]
    TransactionExists(TransactionId),

    #[error("a {kind} transaction already exists for {reference}")]
    Duplicate {
        kind: TransactionKind,
        reference: String,
    },

    #[error("transaction {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: TransactionId,
        expected: TransactionStatus,
        actual: TransactionStatus,
    },

    #[error("user {user} has {available} points, {required} required")]
    InsufficientBalance {
        user: UserId,
        available: Points,
        required: Points,
    },

    #[error("balance of user {user} would overflow")]
    BalanceOverflow { user: UserId },

    #[error("user {user} was already referred by {existing}")]
    ReferrerConflict { user: UserId, existing: UserId },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// A single mutation inside an atomic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Append a transaction row.
    InsertTransaction(Transaction),
    /// Move a transaction from `from` to `to`; fails if it is not currently `from`.
    SetStatus {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        updated_at: DateTime<Utc>,
    },
    /// Add `delta` to a user's cached balance, rejecting results below `floor`.
    AdjustBalance {
        user: UserId,
        delta: Points,
        floor: Option<Points>,
    },
    /// Record who referred `user`. A no-op if already linked to the same referrer.
    LinkReferrer { user: UserId, referrer: UserId },
}

/// Ordered ops committed as one all-or-nothing unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tx: Transaction) -> &mut Self {
        self.ops.push(WriteOp::InsertTransaction(tx));
        self
    }

    pub fn set_status(
        &mut self,
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
        updated_at: DateTime<Utc>,
    ) -> &mut Self {
        self.ops.push(WriteOp::SetStatus {
            id,
            from,
            to,
            updated_at,
        });
        self
    }

    /// Adjust a balance. Zero deltas are dropped.
    pub fn adjust_balance(
        &mut self,
        user: UserId,
        delta: Points,
        floor: Option<Points>,
    ) -> &mut Self {
        if !delta.is_zero() {
            self.ops.push(WriteOp::AdjustBalance { user, delta, floor });
        }
        self
    }

    pub fn link_referrer(&mut self, user: UserId, referrer: UserId) -> &mut Self {
        self.ops.push(WriteOp::LinkReferrer { user, referrer });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Balances left behind by a committed batch, for every user it adjusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Committed {
    balances: BTreeMap<UserId, Points>,
}

impl Committed {
    pub(crate) fn record(&mut self, user: UserId, balance: Points) {
        self.balances.insert(user, balance);
    }

    pub fn balance(&self, user: UserId) -> Option<Points> {
        self.balances.get(&user).copied()
    }
}

/// Storage backend for settings, users, and the transaction log.
///
/// Transaction lists are returned most recent first.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_settings(&self) -> StoreResult<Option<Settings>>;

    /// Store `settings` unless a row exists; returns whatever is stored afterwards.
    async fn insert_settings_if_absent(&self, settings: &Settings) -> StoreResult<Settings>;

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()>;

    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    async fn user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// All users, ordered by id.
    async fn users(&self) -> StoreResult<Vec<User>>;

    /// Users whose referrer is `referrer`, ordered by registration time.
    async fn referred_users(&self, referrer: UserId) -> StoreResult<Vec<User>>;

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    async fn find_transaction(
        &self,
        appointment: AppointmentId,
        kind: TransactionKind,
    ) -> StoreResult<Option<Transaction>>;

    async fn user_transactions(&self, user: UserId) -> StoreResult<Vec<Transaction>>;

    async fn all_transactions(&self) -> StoreResult<Vec<Transaction>>;

    /// Apply every op in `batch` atomically.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<Committed>;
}

/// Dedupe key of a transaction, if its kind has one.
pub(crate) fn dedupe_key(tx: &Transaction) -> Option<String> {
    match (tx.kind, tx.appointment_id, tx.referred_user_id) {
        (TransactionKind::Booking | TransactionKind::Spent, Some(appointment), _) => {
            Some(format!("appointment {appointment}"))
        }
        (TransactionKind::Referral, _, Some(referred)) => Some(format!("referred user {referred}")),
        _ => None,
    }
}
