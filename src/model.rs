//! Core domain types for the bonus ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Points;
use crate::config::RewardDefaults;

/// User identifier, owned by the user directory.
pub type UserId = u64;

/// Appointment identifier, owned by the appointment lifecycle.
pub type AppointmentId = u64;

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TransactionId)
    }
}

/// The business event a transaction was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Booking,
    Referral,
    Manual,
    Spent,
}

/// Lifecycle status of a transaction. Only `Completed` transactions count towards a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Returned when a stored kind or status string is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {field} '{value}'")]
pub struct ParseEnumError {
    field: &'static str,
    value: String,
}

macro_rules! str_enum {
    ($ty:ident, $field:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(ParseEnumError {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

str_enum!(TransactionKind, "transaction kind", {
    Booking => "booking",
    Referral => "referral",
    Manual => "manual",
    Spent => "spent",
});

str_enum!(TransactionStatus, "transaction status", {
    Pending => "pending",
    Completed => "completed",
    Cancelled => "cancelled",
});

/// One recorded reward or debit event.
///
/// Everything except `status` and `updated_at` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Points,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub description: Option<String>,
    /// Set for `booking` and `spent` transactions.
    pub appointment_id: Option<AppointmentId>,
    /// Set on the referrer's side of a referral pair.
    pub referred_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Materialize a new transaction with a fresh identity.
    pub fn create(new: NewTransaction, now: DateTime<Utc>) -> Self {
        Self {
            id: TransactionId::new(),
            user_id: new.user_id,
            amount: new.amount,
            kind: new.kind,
            status: new.status,
            description: new.description,
            appointment_id: new.appointment_id,
            referred_user_id: new.referred_user_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

/// Request to create a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub amount: Points,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub appointment_id: Option<AppointmentId>,
    pub referred_user_id: Option<UserId>,
}

impl NewTransaction {
    pub fn new(
        user_id: UserId,
        amount: Points,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> Self {
        Self {
            user_id,
            amount,
            kind,
            status,
            description: None,
            appointment_id: None,
            referred_user_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_appointment(mut self, appointment_id: AppointmentId) -> Self {
        self.appointment_id = Some(appointment_id);
        self
    }

    pub fn with_referred_user(mut self, referred_user_id: UserId) -> Self {
        self.referred_user_id = Some(referred_user_id);
        self
    }
}

/// The singleton reward configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub booking_reward: Points,
    pub referrer_reward: Points,
    pub referral_reward: Points,
    pub updated_at: DateTime<Utc>,
}

impl Settings {
    /// Fixed identity of the single settings row.
    pub const SINGLETON_ID: &'static str = "default";

    pub fn from_defaults(defaults: &RewardDefaults, now: DateTime<Utc>) -> Self {
        Self {
            booking_reward: defaults.booking,
            referrer_reward: defaults.referrer,
            referral_reward: defaults.referral,
            updated_at: now,
        }
    }
}

/// Partial settings update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub booking_reward: Option<Points>,
    pub referrer_reward: Option<Points>,
    pub referral_reward: Option<Points>,
}

/// A user record as far as the ledger is concerned, including the cached balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub referred_by: Option<UserId>,
    pub bonus_balance: Points,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Registration request for a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub referred_by: Option<UserId>,
}

impl NewUser {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: None,
            referred_by: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn referred_by(mut self, referrer: UserId) -> Self {
        self.referred_by = Some(referrer);
        self
    }
}

/// Public view of a user, without the balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
}

/// A user referred by someone, with the time they joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferredUser {
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
}

/// Both sides of a referral reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralPair {
    pub referrer: Transaction,
    pub referred: Transaction,
}

/// Business events the ledger reacts to, as produced by external collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// A user signed up, optionally through a referral link.
    Register {
        user: UserId,
        name: String,
        referrer: Option<UserId>,
    },
    /// An appointment was booked; issues a pending booking reward.
    Booking {
        user: UserId,
        appointment: AppointmentId,
    },
    /// An appointment was completed; settles its booking reward.
    Complete { appointment: AppointmentId },
    /// An appointment was cancelled; cancels its booking reward.
    Cancel { appointment: AppointmentId },
    /// A referred user's signup was confirmed.
    Referral { referrer: UserId, referred: UserId },
    /// Points were redeemed against an appointment.
    Spend {
        user: UserId,
        amount: Points,
        appointment: AppointmentId,
    },
    /// Administrator correction.
    Manual {
        user: UserId,
        amount: Points,
        description: String,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::Register { .. } => "register",
            LedgerEvent::Booking { .. } => "booking",
            LedgerEvent::Complete { .. } => "complete",
            LedgerEvent::Cancel { .. } => "cancel",
            LedgerEvent::Referral { .. } => "referral",
            LedgerEvent::Spend { .. } => "spend",
            LedgerEvent::Manual { .. } => "manual",
        }
    }
}
