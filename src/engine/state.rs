//! Transaction status state machine.
//!
//! ```text
//! pending ──► completed ──► cancelled
//!    └──────────────────────►┘
//! ```
//! `cancelled` is terminal. A transaction's amount reaches the balance when it
//! becomes `completed` and leaves it again if it is later cancelled.

use crate::Points;
use crate::model::TransactionStatus::{self, Cancelled, Completed, Pending};

/// An allowed status change and its effect on the owner's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already completed; nothing to do.
    Noop,
    /// pending → completed: credit the amount.
    Settle,
    /// pending → cancelled: never credited, nothing to undo.
    Void,
    /// completed → cancelled: undo the credit.
    Reverse,
}

impl Transition {
    /// Look up `from → to`. `None` means the change is not allowed.
    pub fn between(from: TransactionStatus, to: TransactionStatus) -> Option<Self> {
        match (from, to) {
            (Pending, Completed) => Some(Transition::Settle),
            (Pending, Cancelled) => Some(Transition::Void),
            (Completed, Cancelled) => Some(Transition::Reverse),
            (Completed, Completed) => Some(Transition::Noop),
            _ => None,
        }
    }

    /// Balance delta for a transaction of `amount`. `None` when reversing
    /// `i64::MIN`, which cannot be negated.
    pub fn delta(self, amount: Points) -> Option<Points> {
        match self {
            Transition::Settle => Some(amount),
            Transition::Reverse => amount.checked_neg(),
            Transition::Noop | Transition::Void => Some(Points::ZERO),
        }
    }
}

/// Balance delta of creating a transaction directly in `status`, or `None` if
/// transactions cannot start there.
pub fn creation_delta(status: TransactionStatus, amount: Points) -> Option<Points> {
    match status {
        Pending => Some(Points::ZERO),
        Completed => Some(amount),
        Cancelled => None,
    }
}
