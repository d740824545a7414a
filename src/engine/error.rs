//! Error types for ledger operations.

use thiserror::Error;

use crate::Points;
use crate::model::{AppointmentId, TransactionId, TransactionKind, TransactionStatus, UserId};
use crate::store::StoreError;

/// Error returned by [`Ledger`](super::Ledger) operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("bonus settings have not been initialized")]
    NotInitialized,

    #[error("user {0} not found")]
    UnknownUser(UserId),

    #[error("user {0} is already registered")]
    UserExists(UserId),

    #[error("user {0} cannot refer themselves")]
    SelfReferral(UserId),

    #[error("user {user} was already referred by {existing}")]
    AlreadyReferred { user: UserId, existing: UserId },

    #[error("reward amounts cannot be negative, got {0}")]
    NegativeReward(Points),

    #[error("invalid amount {0} for a {1} transaction")]
    InvalidAmount(Points, TransactionKind),

    #[error("transactions cannot be created as {0}")]
    InvalidInitialStatus(TransactionStatus),

    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("user {user} has {available} points, cannot spend {requested}")]
    InsufficientBalance {
        user: UserId,
        available: Points,
        requested: Points,
    },

    #[error("point amount out of range for user {0}")]
    AmountOverflow(UserId),

    #[error("a {kind} reward already exists for {reference}")]
    DuplicateReward {
        kind: TransactionKind,
        reference: String,
    },

    #[error("no booking reward recorded for appointment {0}")]
    NoBookingReward(AppointmentId),

    #[error("store failure: {0}")]
    Store(StoreError),
}

/// Lifts store errors that carry a ledger meaning into their own variants.
impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(user) => LedgerError::UnknownUser(user),
            StoreError::UserExists(user) => LedgerError::UserExists(user),
            StoreError::ReferrerConflict { user, existing } => {
                LedgerError::AlreadyReferred { user, existing }
            }
            StoreError::InsufficientBalance {
                user,
                available,
                required,
            } => LedgerError::InsufficientBalance {
                user,
                available,
                requested: required,
            },
            StoreError::BalanceOverflow { user } => LedgerError::AmountOverflow(user),
            StoreError::Duplicate { kind, reference } => {
                LedgerError::DuplicateReward { kind, reference }
            }
            other => LedgerError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_store_errors_are_lifted() {
        assert!(matches!(
            LedgerError::from(StoreError::UserNotFound(3)),
            LedgerError::UnknownUser(3)
        ));
        assert!(matches!(
            LedgerError::from(StoreError::Duplicate {
                kind: TransactionKind::Booking,
                reference: "appointment 1".to_string(),
            }),
            LedgerError::DuplicateReward {
                kind: TransactionKind::Booking,
                ..
            }
        ));
    }

    #[test]
    fn balance_overflow_is_lifted() {
        let err = LedgerError::from(StoreError::BalanceOverflow { user: 7 });
        assert!(matches!(err, LedgerError::AmountOverflow(7)));
        assert_eq!(err.to_string(), "point amount out of range for user 7");
    }

    #[test]
    fn backend_errors_stay_store_errors() {
        let err = LedgerError::from(StoreError::Backend("disk full".to_string()));
        assert!(matches!(err, LedgerError::Store(StoreError::Backend(_))));
        assert_eq!(err.to_string(), "store failure: backend failure: disk full");
    }

    #[test]
    fn insufficient_balance_message() {
        let err = LedgerError::from(StoreError::InsufficientBalance {
            user: 4,
            available: Points::new(500),
            required: Points::new(700),
        });
        assert_eq!(err.to_string(), "user 4 has 500 points, cannot spend 700");
    }
}
