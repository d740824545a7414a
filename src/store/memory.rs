//! In-memory store.
//!
//! Commits are staged against the current state first and only applied once
//! every op has validated, so a failing op leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::{Committed, LedgerStore, StoreError, StoreResult, WriteBatch, WriteOp, dedupe_key};
use crate::Points;
use crate::model::{
    AppointmentId, Settings, Transaction, TransactionId, TransactionKind, TransactionStatus, User,
    UserId,
};

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    settings: Option<Settings>,
    users: BTreeMap<UserId, User>,
    /// Recording order, oldest first
    transactions: Vec<Transaction>,
    index: HashMap<TransactionId, usize>,
    dedupe: HashSet<(TransactionKind, String)>,
    /// Number of ops allowed to succeed before one fails
    fail_after: Option<usize>,
}

#[derive(Default)]
struct Staged {
    inserts: Vec<Transaction>,
    statuses: HashMap<TransactionId, (TransactionStatus, DateTime<Utc>)>,
    balances: HashMap<UserId, Points>,
    links: HashMap<UserId, UserId>,
    dedupe: HashSet<(TransactionKind, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the write op after the next `ops` ones fail, simulating a store
    /// failure in the middle of a commit. The fault fires once.
    pub fn fail_after(&self, ops: usize) {
        self.state.lock().fail_after = Some(ops);
    }

    /// Overwrite a cached balance without touching the transaction log.
    #[cfg(test)]
    pub(crate) fn corrupt_balance(&self, user: UserId, balance: Points) {
        if let Some(u) = self.state.lock().users.get_mut(&user) {
            u.bonus_balance = balance;
        }
    }
}

impl State {
    fn tick_fault(&mut self) -> StoreResult<()> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                Err(StoreError::Backend("injected write failure".to_string()))
            }
            Some(n) => {
                self.fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn user(&self, id: UserId) -> StoreResult<&User> {
        self.users.get(&id).ok_or(StoreError::UserNotFound(id))
    }

    fn stage(&mut self, ops: Vec<WriteOp>) -> StoreResult<Staged> {
        let mut staged = Staged::default();

        for op in ops {
            self.tick_fault()?;
            match op {
                WriteOp::InsertTransaction(tx) => {
                    if self.index.contains_key(&tx.id) || staged.inserts.iter().any(|t| t.id == tx.id)
                    {
                        return Err(StoreError::TransactionExists(tx.id));
                    }
                    self.user(tx.user_id)?;
                    if let Some(reference) = dedupe_key(&tx) {
                        let key = (tx.kind, reference);
                        if self.dedupe.contains(&key) || !staged.dedupe.insert(key.clone()) {
                            return Err(StoreError::Duplicate {
                                kind: key.0,
                                reference: key.1,
                            });
                        }
                    }
                    staged.inserts.push(tx);
                }
                WriteOp::SetStatus {
                    id,
                    from,
                    to,
                    updated_at,
                } => {
                    let actual = staged
                        .statuses
                        .get(&id)
                        .map(|(status, _)| *status)
                        .or_else(|| staged.inserts.iter().find(|t| t.id == id).map(|t| t.status))
                        .or_else(|| self.index.get(&id).map(|&i| self.transactions[i].status))
                        .ok_or(StoreError::TransactionNotFound(id))?;
                    if actual != from {
                        return Err(StoreError::StatusConflict {
                            id,
                            expected: from,
                            actual,
                        });
                    }
                    staged.statuses.insert(id, (to, updated_at));
                }
                WriteOp::AdjustBalance { user, delta, floor } => {
                    let available = match staged.balances.get(&user) {
                        Some(balance) => *balance,
                        None => self.user(user)?.bonus_balance,
                    };
                    let next = available
                        .checked_add(delta)
                        .ok_or(StoreError::BalanceOverflow { user })?;
                    if let Some(floor) = floor {
                        if next < floor {
                            return Err(StoreError::InsufficientBalance {
                                user,
                                available,
                                required: delta.checked_abs().unwrap_or(Points::new(i64::MAX)),
                            });
                        }
                    }
                    staged.balances.insert(user, next);
                }
                WriteOp::LinkReferrer { user, referrer } => {
                    self.user(referrer)?;
                    let existing = match staged.links.get(&user) {
                        Some(linked) => Some(*linked),
                        None => self.user(user)?.referred_by,
                    };
                    match existing {
                        Some(existing) if existing != referrer => {
                            return Err(StoreError::ReferrerConflict { user, existing });
                        }
                        _ => {
                            staged.links.insert(user, referrer);
                        }
                    }
                }
            }
        }

        Ok(staged)
    }

    fn apply(&mut self, staged: Staged) -> Committed {
        let mut committed = Committed::default();
        for tx in staged.inserts {
            self.index.insert(tx.id, self.transactions.len());
            self.transactions.push(tx);
        }
        for (id, (status, updated_at)) in staged.statuses {
            if let Some(&i) = self.index.get(&id) {
                let tx = &mut self.transactions[i];
                tx.status = status;
                tx.updated_at = updated_at;
            }
        }
        for (id, balance) in staged.balances {
            if let Some(user) = self.users.get_mut(&id) {
                user.bonus_balance = balance;
                committed.record(id, balance);
            }
        }
        for (id, referrer) in staged.links {
            if let Some(user) = self.users.get_mut(&id) {
                user.referred_by = Some(referrer);
            }
        }
        self.dedupe.extend(staged.dedupe);
        committed
    }
}

fn newest_first<'a>(txs: impl DoubleEndedIterator<Item = &'a Transaction>) -> Vec<Transaction> {
    txs.rev().cloned().collect()
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_settings(&self) -> StoreResult<Option<Settings>> {
        Ok(self.state.lock().settings.clone())
    }

    async fn insert_settings_if_absent(&self, settings: &Settings) -> StoreResult<Settings> {
        let mut state = self.state.lock();
        Ok(state.settings.get_or_insert_with(|| settings.clone()).clone())
    }

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.state.lock().settings = Some(settings.clone());
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.users.contains_key(&user.id) {
            return Err(StoreError::UserExists(user.id));
        }
        if let Some(referrer) = user.referred_by {
            state.user(referrer)?;
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.state.lock().users.get(&id).cloned())
    }

    async fn users(&self) -> StoreResult<Vec<User>> {
        Ok(self.state.lock().users.values().cloned().collect())
    }

    async fn referred_users(&self, referrer: UserId) -> StoreResult<Vec<User>> {
        let state = self.state.lock();
        let mut referred: Vec<User> = state
            .users
            .values()
            .filter(|u| u.referred_by == Some(referrer))
            .cloned()
            .collect();
        referred.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(referred)
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        let state = self.state.lock();
        Ok(state.index.get(&id).map(|&i| state.transactions[i].clone()))
    }

    async fn find_transaction(
        &self,
        appointment: AppointmentId,
        kind: TransactionKind,
    ) -> StoreResult<Option<Transaction>> {
        let state = self.state.lock();
        Ok(state
            .transactions
            .iter()
            .find(|t| t.kind == kind && t.appointment_id == Some(appointment))
            .cloned())
    }

    async fn user_transactions(&self, user: UserId) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock();
        Ok(newest_first(
            state.transactions.iter().filter(|t| t.user_id == user),
        ))
    }

    async fn all_transactions(&self) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock();
        Ok(newest_first(state.transactions.iter()))
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<Committed> {
        let ops = batch.len();
        let mut state = self.state.lock();
        let staged = state.stage(batch.into_ops())?;
        let committed = state.apply(staged);
        debug!(ops, "memory store commit applied");
        Ok(committed)
    }
}
