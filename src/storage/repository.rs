use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::domain::{Balance, Cents, LedgerTransaction, TransactionKind, User, UserId};

use super::{MIGRATION_001_INITIAL, StoreConfig, UnitOfWork, UserLocks};

/// Repository for users, balances and the transaction log.
///
/// Reads here run outside any unit of work. Every balance mutation goes
/// through a [`UnitOfWork`] obtained from [`Repository::begin`]. Clones share
/// the pool and the per-user lock table.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    locks: UserLocks,
}

/// Users, balances and records read from one consistent database snapshot.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    pub user_count: i64,
    pub balances: Vec<Balance>,
    pub records: Vec<LedgerTransaction>,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: UserLocks::new(),
        }
    }

    /// Connect to an existing ledger database.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        Self::open(config, false).await
    }

    /// Create the database file if needed and run migrations.
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let repo = Self::open(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    async fn open(config: &StoreConfig, create_if_missing: bool) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options(create_if_missing))
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to database {}",
                    config.database_path.display()
                )
            })?;
        debug!(path = %config.database_path.display(), "Connected to ledger database");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open an atomic unit of work. It holds no lock until it locks users.
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new(self.pool.clone(), self.locks.clone())
    }

    // ========================
    // User directory
    // ========================

    /// Register a new user and return it with its generated id.
    pub async fn create_user(&self, name: &str) -> Result<User> {
        let created_at = Utc::now();
        let result = sqlx::query("INSERT INTO users (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to create user")?;

        Ok(User {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, name, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn user_exists(&self, id: UserId) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?) AS found")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check user")?;

        Ok(row.get::<i64, _>("found") != 0)
    }

    pub async fn count_users(&self) -> Result<i64> {
        let mut conn = self.acquire().await?;
        fetch_user_count(&mut conn).await
    }

    // ========================
    // Balances and records
    // ========================

    /// Current balance of a user, or 0 when no balance row exists.
    /// Never creates a row.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Cents> {
        Ok(self
            .find_balance(user_id)
            .await?
            .map(|balance| balance.amount_cents)
            .unwrap_or(0))
    }

    pub async fn find_balance(&self, user_id: UserId) -> Result<Option<Balance>> {
        let mut conn = self.acquire().await?;
        fetch_balance(&mut conn, user_id).await
    }

    pub async fn list_balances(&self) -> Result<Vec<Balance>> {
        let mut conn = self.acquire().await?;
        fetch_balances(&mut conn).await
    }

    /// All transaction records, ordered by id.
    pub async fn list_transactions(&self) -> Result<Vec<LedgerTransaction>> {
        let mut conn = self.acquire().await?;
        fetch_transactions(&mut conn).await
    }

    /// Read users, balances and records inside one read transaction, so a
    /// unit of work committing meanwhile is either fully visible or not at all.
    pub async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin snapshot")?;

        let user_count = fetch_user_count(&mut tx).await?;
        let balances = fetch_balances(&mut tx).await?;
        let records = fetch_transactions(&mut tx).await?;

        tx.commit().await.context("Failed to end snapshot")?;

        Ok(LedgerSnapshot {
            user_count,
            balances,
            records,
        })
    }

    async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context("Failed to acquire database connection")
    }
}

async fn fetch_user_count(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
        .fetch_one(&mut *conn)
        .await
        .context("Failed to count users")?;

    Ok(row.get("count"))
}

pub(super) async fn fetch_balance(
    conn: &mut SqliteConnection,
    user_id: UserId,
) -> Result<Option<Balance>> {
    let row = sqlx::query(
        r#"
        SELECT user_id, amount_cents, created_at, updated_at
        FROM balances
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to fetch balance")?;

    row.as_ref().map(row_to_balance).transpose()
}

async fn fetch_balances(conn: &mut SqliteConnection) -> Result<Vec<Balance>> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, amount_cents, created_at, updated_at
        FROM balances
        ORDER BY user_id
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list balances")?;

    rows.iter().map(row_to_balance).collect()
}

async fn fetch_transactions(conn: &mut SqliteConnection) -> Result<Vec<LedgerTransaction>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, type, amount_cents, comment, related_user_id, created_at
        FROM transactions
        ORDER BY id
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to list transactions")?;

    rows.iter().map(row_to_transaction).collect()
}

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {} timestamp", field))?
        .with_timezone(&Utc))
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let created_at_str: String = row.get("created_at");

    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_balance(row: &SqliteRow) -> Result<Balance> {
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(Balance {
        user_id: row.get("user_id"),
        amount_cents: row
            .try_get("amount_cents")
            .context("Invalid balance amount")?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<LedgerTransaction> {
    let kind_str: String = row.get("type");
    let created_at_str: String = row.get("created_at");

    Ok(LedgerTransaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: TransactionKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", kind_str))?,
        amount_cents: row.get("amount_cents"),
        comment: row.get("comment"),
        related_user_id: row.get("related_user_id"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
