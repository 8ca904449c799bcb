use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::domain::{Balance, Cents, NewTransaction, TransactionId, UserId};

use super::UserLocks;
use super::repository::fetch_balance;

/// Position of a staged record; resolved to its id once the unit commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSlot(usize);

#[derive(Debug, Clone, Copy)]
struct StagedBalance {
    /// Amount read from the store, `None` when the row does not exist yet
    stored: Option<Cents>,
    amount: Cents,
}

impl StagedBalance {
    fn delta(&self) -> Cents {
        self.amount - self.stored.unwrap_or(0)
    }
}

/// An all-or-nothing scope over the ledger tables.
///
/// A unit first locks the users it works on, then reads their balances and
/// stages changes in memory. Nothing reaches the store until [`commit`],
/// which applies every staged write inside one short `BEGIN IMMEDIATE`
/// transaction. The database write lock is therefore only held while a
/// commit is being written, and units on different users never wait for one
/// another. Dropping a unit or calling [`rollback`] discards the staged
/// writes and releases the user locks.
///
/// Debits are applied with a guarded `UPDATE` so a concurrent writer outside
/// this process can never drive a balance below zero; the commit fails
/// instead.
///
/// [`commit`]: UnitOfWork::commit
/// [`rollback`]: UnitOfWork::rollback
pub struct UnitOfWork {
    pool: SqlitePool,
    locks: UserLocks,
    held: BTreeMap<UserId, OwnedMutexGuard<()>>,
    balances: BTreeMap<UserId, StagedBalance>,
    records: Vec<NewTransaction>,
    finished: bool,
}

/// What a unit of work wrote, as seen by the store after commit.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    balances: BTreeMap<UserId, Cents>,
    transaction_ids: Vec<TransactionId>,
}

impl Committed {
    pub fn balance(&self, user_id: UserId) -> Result<Cents> {
        self.balances
            .get(&user_id)
            .copied()
            .with_context(|| format!("No committed balance for user {}", user_id))
    }

    pub fn transaction_id(&self, slot: RecordSlot) -> Result<TransactionId> {
        self.transaction_ids
            .get(slot.0)
            .copied()
            .with_context(|| format!("No committed record in slot {}", slot.0))
    }
}

impl UnitOfWork {
    pub(super) fn new(pool: SqlitePool, locks: UserLocks) -> Self {
        Self {
            pool,
            locks,
            held: BTreeMap::new(),
            balances: BTreeMap::new(),
            records: Vec::new(),
            finished: false,
        }
    }

    /// Take the locks of every user this unit will touch.
    ///
    /// Locks are acquired in ascending id order, so two units locking the same
    /// pair can never deadlock. All users must be locked in one call.
    pub async fn lock_users(&mut self, user_ids: &[UserId]) -> Result<()> {
        if !self.held.is_empty() {
            bail!("Users of a unit of work must be locked in a single call");
        }

        let mut ordered = user_ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        for user_id in ordered {
            let guard = self.locks.acquire(user_id).await;
            self.held.insert(user_id, guard);
        }
        debug!(users = ?self.held.keys().collect::<Vec<_>>(), "Locked users");
        Ok(())
    }

    pub async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?) AS found")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check user")?;

        Ok(row.get::<i64, _>("found") != 0)
    }

    /// Return the user's balance, staging a zero balance row if none exists.
    /// The user must be locked by this unit.
    pub async fn get_or_create_balance(&mut self, user_id: UserId) -> Result<Balance> {
        self.ensure_locked(user_id)?;

        let amount = match self.balances.get(&user_id) {
            Some(staged) => staged.amount,
            None => {
                let mut conn = self
                    .pool
                    .acquire()
                    .await
                    .context("Failed to acquire database connection")?;
                let stored = fetch_balance(&mut *conn, user_id)
                    .await?
                    .map(|balance| balance.amount_cents);
                let amount = stored.unwrap_or(0);
                self.balances.insert(user_id, StagedBalance { stored, amount });
                amount
            }
        };

        let now = Utc::now();
        Ok(Balance {
            user_id,
            amount_cents: amount,
            created_at: now,
            updated_at: now,
        })
    }

    /// Stage a signed delta on the user's balance and return the new amount.
    /// The balance must already be loaded in this unit of work.
    pub fn adjust_balance(&mut self, user_id: UserId, delta: Cents) -> Result<Cents> {
        let staged = self
            .balances
            .get_mut(&user_id)
            .with_context(|| format!("No balance row for user {}", user_id))?;

        let amount = staged
            .amount
            .checked_add(delta)
            .context("Balance out of range after adjustment")?;
        if amount < 0 {
            bail!("Balance of user {} cannot go negative", user_id);
        }

        staged.amount = amount;
        Ok(amount)
    }

    /// Stage one immutable transaction record. Records are written in the
    /// order they were staged, so consecutive records get consecutive ids.
    pub fn append_transaction(&mut self, record: NewTransaction) -> RecordSlot {
        self.records.push(record);
        RecordSlot(self.records.len() - 1)
    }

    /// Write every staged change atomically. On failure nothing is written.
    pub async fn commit(mut self) -> Result<Committed> {
        self.finished = true;

        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire database connection")?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .context("Failed to begin commit")?;

        match self.apply(&mut *conn).await {
            Ok(committed) => {
                if let Err(err) = sqlx::query("COMMIT").execute(&mut *conn).await {
                    conn.close_on_drop();
                    return Err(err).context("Failed to commit unit of work");
                }
                debug!(records = committed.transaction_ids.len(), "Unit of work committed");
                Ok(committed)
            }
            Err(err) => {
                if sqlx::query("ROLLBACK").execute(&mut *conn).await.is_err() {
                    conn.close_on_drop();
                }
                Err(err)
            }
        }
    }

    /// Discard every staged change and release the user locks.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(records = self.records.len(), "Unit of work rolled back");
    }

    fn ensure_locked(&self, user_id: UserId) -> Result<()> {
        if self.held.contains_key(&user_id) {
            Ok(())
        } else {
            bail!("User {} is not locked by this unit of work", user_id)
        }
    }

    async fn apply(&self, conn: &mut SqliteConnection) -> Result<Committed> {
        let mut committed = Committed::default();
        let now = Utc::now().to_rfc3339();

        for (&user_id, staged) in &self.balances {
            if staged.stored.is_none() {
                sqlx::query(
                    r#"
                    INSERT INTO balances (user_id, amount_cents, created_at, updated_at)
                    VALUES (?, 0, ?, ?)
                    ON CONFLICT(user_id) DO NOTHING
                    "#,
                )
                .bind(user_id)
                .bind(&now)
                .bind(&now)
                .execute(&mut *conn)
                .await
                .context("Failed to create balance")?;
            }

            let delta = staged.delta();
            if delta == 0 {
                committed.balances.insert(user_id, staged.amount);
                continue;
            }

            let row = sqlx::query(
                r#"
                UPDATE balances
                SET amount_cents = amount_cents + ?, updated_at = ?
                WHERE user_id = ? AND amount_cents + ? >= 0
                RETURNING amount_cents
                "#,
            )
            .bind(delta)
            .bind(&now)
            .bind(user_id)
            .bind(delta)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to adjust balance")?
            .with_context(|| format!("Balance of user {} changed by another writer", user_id))?;

            let amount: Cents = row
                .try_get("amount_cents")
                .context("Balance out of range after adjustment")?;
            committed.balances.insert(user_id, amount);
        }

        for record in &self.records {
            let result = sqlx::query(
                r#"
                INSERT INTO transactions (user_id, type, amount_cents, comment, related_user_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.user_id)
            .bind(record.kind.as_str())
            .bind(record.amount_cents)
            .bind(&record.comment)
            .bind(record.related_user_id)
            .bind(&now)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to append {} transaction", record.kind))?;

            committed.transaction_ids.push(result.last_insert_rowid());
        }

        Ok(committed)
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished && !(self.balances.is_empty() && self.records.is_empty()) {
            warn!("Unit of work dropped without commit; discarding staged writes");
        }
    }
}
