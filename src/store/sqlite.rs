//! SQLite store.
//!
//! Schema: `users` carries the cached `bonus_balance`, `bonus_settings` holds the
//! singleton row, `bonus_transactions` is the log. Each [`WriteBatch`] runs in
//! one SQL transaction that is rolled back on the first failing op.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

use super::{Committed, LedgerStore, StoreError, StoreResult, WriteBatch, WriteOp, dedupe_key};
use crate::Points;
use crate::model::{
    AppointmentId, Settings, Transaction, TransactionId, TransactionKind, TransactionStatus, User,
    UserId,
};

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    referred_by INTEGER REFERENCES users (id),
    bonus_balance INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)"#;

const CREATE_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bonus_settings (
    id TEXT PRIMARY KEY,
    booking_reward_amount INTEGER NOT NULL,
    referrer_reward_amount INTEGER NOT NULL,
    referral_reward_amount INTEGER NOT NULL,
    updated_at TEXT NOT NULL
)"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bonus_transactions (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users (id),
    amount INTEGER NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    description TEXT,
    appointment_id INTEGER,
    referred_user_id INTEGER,
    dedupe_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)"#;

const CREATE_DEDUPE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS bonus_transactions_dedupe \
     ON bonus_transactions (kind, dedupe_key)";

const CREATE_USER_INDEX: &str = "CREATE INDEX IF NOT EXISTS bonus_transactions_user \
     ON bonus_transactions (user_id)";

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, kind, status, description, \
     appointment_id, referred_user_id, created_at, updated_at";

const USER_COLUMNS: &str = "id, name, email, referred_by, bonus_balance, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url` and create the schema.
    ///
    /// In-memory databases get a single long-lived connection, since every
    /// connection would otherwise see its own empty database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(options)
        .await?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> StoreResult<()> {
        for statement in [
            CREATE_USERS_TABLE,
            CREATE_SETTINGS_TABLE,
            CREATE_TRANSACTIONS_TABLE,
            CREATE_DEDUPE_INDEX,
            CREATE_USER_INDEX,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    // fixed width keeps text ordering chronological
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{value}': {e}")))
}

fn parse_field<T>(value: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Corrupt(e.to_string()))
}

fn transaction_from_row(row: &SqliteRow) -> StoreResult<Transaction> {
    Ok(Transaction {
        id: parse_field(row.try_get::<&str, _>("id")?)?,
        user_id: row.try_get::<i64, _>("user_id")? as UserId,
        amount: Points::new(row.try_get("amount")?),
        kind: parse_field(row.try_get::<&str, _>("kind")?)?,
        status: parse_field(row.try_get::<&str, _>("status")?)?,
        description: row.try_get("description")?,
        appointment_id: row
            .try_get::<Option<i64>, _>("appointment_id")?
            .map(|v| v as AppointmentId),
        referred_user_id: row
            .try_get::<Option<i64>, _>("referred_user_id")?
            .map(|v| v as UserId),
        created_at: parse_time(row.try_get("created_at")?)?,
        updated_at: parse_time(row.try_get("updated_at")?)?,
    })
}

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    Ok(User {
        id: row.try_get::<i64, _>("id")? as UserId,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        referred_by: row
            .try_get::<Option<i64>, _>("referred_by")?
            .map(|v| v as UserId),
        bonus_balance: Points::new(row.try_get("bonus_balance")?),
        created_at: parse_time(row.try_get("created_at")?)?,
    })
}

fn settings_from_row(row: &SqliteRow) -> StoreResult<Settings> {
    Ok(Settings {
        booking_reward: Points::new(row.try_get("booking_reward_amount")?),
        referrer_reward: Points::new(row.try_get("referrer_reward_amount")?),
        referral_reward: Points::new(row.try_get("referral_reward_amount")?),
        updated_at: parse_time(row.try_get("updated_at")?)?,
    })
}

async fn ensure_user(conn: &mut SqliteConnection, user: UserId) -> StoreResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
        .bind(user as i64)
        .fetch_optional(&mut *conn)
        .await?;
    found.map(|_| ()).ok_or(StoreError::UserNotFound(user))
}

async fn apply_op(
    conn: &mut SqliteConnection,
    op: WriteOp,
    committed: &mut Committed,
) -> StoreResult<()> {
    match op {
        WriteOp::InsertTransaction(tx) => {
            ensure_user(conn, tx.user_id).await?;
            let reference = dedupe_key(&tx);
            let result = sqlx::query(
                "INSERT INTO bonus_transactions (id, user_id, amount, kind, status, description, \
                 appointment_id, referred_user_id, dedupe_key, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(tx.id.to_string())
            .bind(tx.user_id as i64)
            .bind(tx.amount.value())
            .bind(tx.kind.as_str())
            .bind(tx.status.as_str())
            .bind(tx.description.as_deref())
            .bind(tx.appointment_id.map(|v| v as i64))
            .bind(tx.referred_user_id.map(|v| v as i64))
            .bind(reference.as_deref())
            .bind(format_time(&tx.created_at))
            .bind(format_time(&tx.updated_at))
            .execute(&mut *conn)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => match reference {
                    Some(reference) => Err(StoreError::Duplicate {
                        kind: tx.kind,
                        reference,
                    }),
                    None => Err(StoreError::TransactionExists(tx.id)),
                },
                Err(e) => Err(e.into()),
            }
        }
        WriteOp::SetStatus {
            id,
            from,
            to,
            updated_at,
        } => {
            let updated = sqlx::query(
                "UPDATE bonus_transactions SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            )
            .bind(to.as_str())
            .bind(format_time(&updated_at))
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&mut *conn)
            .await?;

            if updated.rows_affected() == 1 {
                return Ok(());
            }

            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM bonus_transactions WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&mut *conn)
                    .await?;
            match actual {
                None => Err(StoreError::TransactionNotFound(id)),
                Some(actual) => Err(StoreError::StatusConflict {
                    id,
                    expected: from,
                    actual: parse_field::<TransactionStatus>(&actual)?,
                }),
            }
        }
        WriteOp::AdjustBalance { user, delta, floor } => {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT bonus_balance FROM users WHERE id = ?")
                    .bind(user as i64)
                    .fetch_optional(&mut *conn)
                    .await?;
            let available = Points::new(available.ok_or(StoreError::UserNotFound(user))?);

            // checked here, SQLite would silently promote an overflowing sum to REAL
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

            sqlx::query("UPDATE users SET bonus_balance = ? WHERE id = ?")
                .bind(next.value())
                .bind(user as i64)
                .execute(&mut *conn)
                .await?;
            committed.record(user, next);
            Ok(())
        }
        WriteOp::LinkReferrer { user, referrer } => {
            ensure_user(conn, referrer).await?;
            let existing: Option<Option<i64>> =
                sqlx::query_scalar("SELECT referred_by FROM users WHERE id = ?")
                    .bind(user as i64)
                    .fetch_optional(&mut *conn)
                    .await?;

            match existing {
                None => Err(StoreError::UserNotFound(user)),
                Some(Some(existing)) if existing as UserId != referrer => {
                    Err(StoreError::ReferrerConflict {
                        user,
                        existing: existing as UserId,
                    })
                }
                Some(Some(_)) => Ok(()),
                Some(None) => {
                    sqlx::query("UPDATE users SET referred_by = ? WHERE id = ?")
                        .bind(referrer as i64)
                        .bind(user as i64)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                }
            }
        }
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load_settings(&self) -> StoreResult<Option<Settings>> {
        let row = sqlx::query(
            "SELECT booking_reward_amount, referrer_reward_amount, referral_reward_amount, updated_at \
             FROM bonus_settings WHERE id = ?",
        )
        .bind(Settings::SINGLETON_ID)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(settings_from_row).transpose()
    }

    async fn insert_settings_if_absent(&self, settings: &Settings) -> StoreResult<Settings> {
        sqlx::query(
            "INSERT INTO bonus_settings (id, booking_reward_amount, referrer_reward_amount, \
             referral_reward_amount, updated_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(Settings::SINGLETON_ID)
        .bind(settings.booking_reward.value())
        .bind(settings.referrer_reward.value())
        .bind(settings.referral_reward.value())
        .bind(format_time(&settings.updated_at))
        .execute(&self.pool)
        .await?;

        self.load_settings()
            .await?
            .ok_or_else(|| StoreError::Backend("settings row missing after insert".to_string()))
    }

    async fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO bonus_settings (id, booking_reward_amount, referrer_reward_amount, \
             referral_reward_amount, updated_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
             booking_reward_amount = excluded.booking_reward_amount, \
             referrer_reward_amount = excluded.referrer_reward_amount, \
             referral_reward_amount = excluded.referral_reward_amount, \
             updated_at = excluded.updated_at",
        )
        .bind(Settings::SINGLETON_ID)
        .bind(settings.booking_reward.value())
        .bind(settings.referrer_reward.value())
        .bind(settings.referral_reward.value())
        .bind(format_time(&settings.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        if let Some(referrer) = user.referred_by {
            ensure_user(&mut conn, referrer).await?;
        }

        let result = sqlx::query(
            "INSERT INTO users (id, name, email, referred_by, bonus_balance, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id as i64)
        .bind(&user.name)
        .bind(user.email.as_deref())
        .bind(user.referred_by.map(|v| v as i64))
        .bind(user.bonus_balance.value())
        .bind(format_time(&user.created_at))
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::UserExists(user.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn referred_users(&self, referrer: UserId) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE referred_by = ? ORDER BY created_at, id"
        ))
        .bind(referrer as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM bonus_transactions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn find_transaction(
        &self,
        appointment: AppointmentId,
        kind: TransactionKind,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM bonus_transactions \
             WHERE appointment_id = ? AND kind = ? ORDER BY rowid LIMIT 1"
        ))
        .bind(appointment as i64)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn user_transactions(&self, user: UserId) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM bonus_transactions \
             WHERE user_id = ? ORDER BY rowid DESC"
        ))
        .bind(user as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn all_transactions(&self) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM bonus_transactions ORDER BY rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<Committed> {
        let ops = batch.len();
        let mut committed = Committed::default();
        // dropping `tx` on an early return rolls everything back
        let mut tx = self.pool.begin().await?;
        for op in batch.into_ops() {
            apply_op(&mut *tx, op, &mut committed).await?;
        }
        tx.commit().await?;
        debug!(ops, "sqlite commit applied");
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTransaction;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn user(id: UserId) -> User {
        User {
            id,
            name: format!("user {id}"),
            email: Some(format!("user{id}@example.com")),
            referred_by: None,
            bonus_balance: Points::ZERO,
            created_at: Utc::now(),
        }
    }

    fn referral(user: UserId, amount: i64, referred: Option<UserId>) -> Transaction {
        let mut new = NewTransaction::new(
            user,
            Points::new(amount),
            TransactionKind::Referral,
            TransactionStatus::Completed,
        );
        new.referred_user_id = referred;
        Transaction::create(new, Utc::now())
    }

    async fn balance(store: &SqliteStore, id: UserId) -> Points {
        store.user(id).await.unwrap().unwrap().bonus_balance
    }

    #[tokio::test]
    async fn users_round_trip() {
        let store = store().await;
        let alice = user(1);
        store.insert_user(&alice).await.unwrap();

        let mut bob = user(2);
        bob.referred_by = Some(1);
        store.insert_user(&bob).await.unwrap();

        assert_eq!(store.user(1).await.unwrap(), Some(alice));
        assert_eq!(store.referred_users(1).await.unwrap(), vec![bob]);
        assert!(matches!(
            store.insert_user(&user(1)).await,
            Err(StoreError::UserExists(1))
        ));

        let mut orphan = user(3);
        orphan.referred_by = Some(42);
        assert!(matches!(
            store.insert_user(&orphan).await,
            Err(StoreError::UserNotFound(42))
        ));
    }

    #[tokio::test]
    async fn transaction_round_trip() {
        let store = store().await;
        store.insert_user(&user(1)).await.unwrap();

        let tx = Transaction::create(
            NewTransaction::new(
                1,
                Points::new(300),
                TransactionKind::Booking,
                TransactionStatus::Pending,
            )
            .with_appointment(77)
            .with_description("Booking reward"),
            Utc::now(),
        );
        let mut batch = WriteBatch::new();
        batch.insert(tx.clone());
        store.commit(batch).await.unwrap();

        assert_eq!(store.transaction(tx.id).await.unwrap(), Some(tx.clone()));
        assert_eq!(
            store
                .find_transaction(77, TransactionKind::Booking)
                .await
                .unwrap(),
            Some(tx)
        );
        assert_eq!(
            store.find_transaction(77, TransactionKind::Spent).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn failed_batch_rolls_back() {
        let store = store().await;
        store.insert_user(&user(1)).await.unwrap();

        let referrer = referral(1, 2000, Some(2));
        let referred = referral(2, 2000, None);
        let mut batch = WriteBatch::new();
        batch
            .insert(referrer.clone())
            .adjust_balance(1, referrer.amount, None)
            .insert(referred)
            .adjust_balance(2, Points::new(2000), None);

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(2)));
        assert_eq!(store.transaction(referrer.id).await.unwrap(), None);
        assert_eq!(balance(&store, 1).await, Points::ZERO);
    }

    #[tokio::test]
    async fn status_update_and_balance_adjustment() {
        let store = store().await;
        store.insert_user(&user(1)).await.unwrap();
        let tx = referral(1, 500, None);
        let mut batch = WriteBatch::new();
        batch.insert(tx.clone()).adjust_balance(1, tx.amount, None);
        store.commit(batch).await.unwrap();

        let later = Utc::now();
        let mut cancel = WriteBatch::new();
        cancel
            .set_status(
                tx.id,
                TransactionStatus::Completed,
                TransactionStatus::Cancelled,
                later,
            )
            .adjust_balance(1, -tx.amount, None);
        store.commit(cancel.clone()).await.unwrap();

        let stored = store.transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Cancelled);
        assert_eq!(stored.updated_at, later);
        assert_eq!(balance(&store, 1).await, Points::ZERO);

        // replaying the same transition no longer matches the stored status
        assert!(matches!(
            store.commit(cancel).await,
            Err(StoreError::StatusConflict {
                expected: TransactionStatus::Completed,
                actual: TransactionStatus::Cancelled,
                ..
            })
        ));
        assert_eq!(balance(&store, 1).await, Points::ZERO);
    }

    #[tokio::test]
    async fn floor_and_dedupe_are_enforced() {
        let store = store().await;
        store.insert_user(&user(1)).await.unwrap();
        store.insert_user(&user(2)).await.unwrap();

        let mut spend = WriteBatch::new();
        spend.adjust_balance(1, Points::new(-10), Some(Points::ZERO));
        assert!(matches!(
            store.commit(spend).await,
            Err(StoreError::InsufficientBalance { user: 1, available, .. }) if available == Points::ZERO
        ));

        let mut first = WriteBatch::new();
        first.insert(referral(1, 2000, Some(2)));
        store.commit(first).await.unwrap();

        let mut again = WriteBatch::new();
        again.insert(referral(1, 2000, Some(2)));
        assert!(matches!(
            store.commit(again).await,
            Err(StoreError::Duplicate { kind: TransactionKind::Referral, .. })
        ));
    }

    #[tokio::test]
    async fn balance_overflow_rolls_back() {
        let store = store().await;
        store.insert_user(&user(1)).await.unwrap();
        let mut fill = WriteBatch::new();
        fill.adjust_balance(1, Points::new(i64::MAX), None);
        assert_eq!(
            store.commit(fill).await.unwrap().balance(1),
            Some(Points::new(i64::MAX))
        );

        let tx = referral(1, 1, None);
        let mut batch = WriteBatch::new();
        batch.insert(tx.clone()).adjust_balance(1, tx.amount, None);
        assert!(matches!(
            store.commit(batch).await,
            Err(StoreError::BalanceOverflow { user: 1 })
        ));
        assert_eq!(store.transaction(tx.id).await.unwrap(), None);
        assert_eq!(balance(&store, 1).await, Points::new(i64::MAX));
    }

    #[tokio::test]
    async fn link_referrer() {
        let store = store().await;
        for id in 1..=3 {
            store.insert_user(&user(id)).await.unwrap();
        }

        let mut link = WriteBatch::new();
        link.link_referrer(3, 1);
        store.commit(link).await.unwrap();
        assert_eq!(store.user(3).await.unwrap().unwrap().referred_by, Some(1));

        let mut relink = WriteBatch::new();
        relink.link_referrer(3, 2);
        assert!(matches!(
            store.commit(relink).await,
            Err(StoreError::ReferrerConflict { user: 3, existing: 1 })
        ));
    }

    #[tokio::test]
    async fn settings_upsert() {
        let store = store().await;
        assert_eq!(store.load_settings().await.unwrap(), None);

        let defaults = Settings::from_defaults(&Default::default(), Utc::now());
        assert_eq!(
            store.insert_settings_if_absent(&defaults).await.unwrap(),
            defaults
        );

        let mut changed = defaults.clone();
        changed.booking_reward = Points::new(450);
        // insert-if-absent never overwrites
        assert_eq!(
            store.insert_settings_if_absent(&changed).await.unwrap(),
            defaults
        );

        store.save_settings(&changed).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), Some(changed));
    }

    #[tokio::test]
    async fn transactions_newest_first() {
        let store = store().await;
        store.insert_user(&user(1)).await.unwrap();
        store.insert_user(&user(2)).await.unwrap();

        let txs = [referral(1, 1, None), referral(2, 2, None), referral(1, 3, None)];
        for tx in &txs {
            let mut batch = WriteBatch::new();
            batch.insert(tx.clone());
            store.commit(batch).await.unwrap();
        }

        let all = store.all_transactions().await.unwrap();
        assert_eq!(
            all.iter().map(|t| t.id).collect::<Vec<_>>(),
            [txs[2].id, txs[1].id, txs[0].id]
        );
        let mine = store.user_transactions(1).await.unwrap();
        assert_eq!(
            mine.iter().map(|t| t.id).collect::<Vec<_>>(),
            [txs[2].id, txs[0].id]
        );
    }
}
