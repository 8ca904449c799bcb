// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use tally::application::BalanceService;
use tally::domain::{Cents, LedgerTransaction, UserId};
use tally::storage::StoreConfig;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(BalanceService, TempDir)> {
    test_service_with(|config| config).await
}

/// Same as [`test_service`], with adjusted store settings.
pub async fn test_service_with(
    configure: impl FnOnce(StoreConfig) -> StoreConfig,
) -> Result<(BalanceService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = configure(StoreConfig::new(temp_dir.path().join("test.db")));
    let service = BalanceService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Create a user and fund it through a regular deposit.
pub async fn funded_user(service: &BalanceService, name: &str, cents: Cents) -> Result<UserId> {
    let user = service.create_user(name).await?;
    if cents > 0 {
        service.deposit(user.id, cents, None).await?;
    }
    Ok(user.id)
}

/// Write a balance row directly, without a transaction record, the way a
/// pre-existing account would look.
pub async fn seed_balance(service: &BalanceService, user_id: UserId, cents: Cents) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO balances (user_id, amount_cents, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(cents)
    .bind(&now)
    .bind(&now)
    .execute(service.repository().pool())
    .await?;
    Ok(())
}

/// Create a user with a seeded balance row.
pub async fn seeded_user(service: &BalanceService, name: &str, cents: Cents) -> Result<UserId> {
    let user = service.create_user(name).await?;
    seed_balance(service, user.id, cents).await?;
    Ok(user.id)
}

pub async fn balance_of(service: &BalanceService, user_id: UserId) -> Result<Cents> {
    Ok(service.get_balance(user_id).await?.balance)
}

pub async fn records_for(
    service: &BalanceService,
    user_id: UserId,
) -> Result<Vec<LedgerTransaction>> {
    Ok(service
        .repository()
        .list_transactions()
        .await?
        .into_iter()
        .filter(|record| record.user_id == user_id)
        .collect())
}

pub async fn record_count(service: &BalanceService) -> Result<usize> {
    Ok(service.repository().list_transactions().await?.len())
}
