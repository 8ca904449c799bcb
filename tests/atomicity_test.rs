mod common;

use anyhow::Result;
use common::{balance_of, funded_user, record_count, records_for, test_service};
use tally::application::{AppError, ErrorKind};

#[tokio::test]
async fn test_failed_transfer_in_append_rolls_back_everything() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let from = funded_user(&service, "alice", 30000).await?;
    let to = funded_user(&service, "bob", 10000).await?;
    let records_before = record_count(&service).await?;

    // Abort the second record append, after both balances have been adjusted
    sqlx::query(
        r#"
        CREATE TRIGGER fail_transfer_in
        BEFORE INSERT ON transactions
        WHEN NEW.type = 'TRANSFER_IN'
        BEGIN
            SELECT RAISE(ABORT, 'injected failure');
        END
        "#,
    )
    .execute(service.repository().pool())
    .await?;

    let err = service.transfer(from, to, 15075, None).await.unwrap_err();

    assert!(matches!(err, AppError::Storage(_)));
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert_eq!(balance_of(&service, from).await?, 30000);
    assert_eq!(balance_of(&service, to).await?, 10000);
    assert_eq!(record_count(&service).await?, records_before);
    assert_eq!(records_for(&service, from).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_failed_recipient_credit_rolls_back_sender_debit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let from = funded_user(&service, "alice", 30000).await?;
    let to = funded_user(&service, "bob", 10000).await?;

    sqlx::query(&format!(
        r#"
        CREATE TRIGGER fail_recipient_credit
        BEFORE UPDATE ON balances
        WHEN NEW.user_id = {}
        BEGIN
            SELECT RAISE(ABORT, 'injected failure');
        END
        "#,
        to
    ))
    .execute(service.repository().pool())
    .await?;

    let err = service.transfer(from, to, 5000, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert_eq!(balance_of(&service, from).await?, 30000);
    assert_eq!(balance_of(&service, to).await?, 10000);
    assert_eq!(record_count(&service).await?, 2);

    // The ledger is still usable afterwards
    sqlx::query("DROP TRIGGER fail_recipient_credit")
        .execute(service.repository().pool())
        .await?;
    let receipt = service.transfer(from, to, 5000, None).await?;
    assert_eq!(receipt.from_balance, 25000);
    assert_eq!(receipt.to_balance, 15000);

    Ok(())
}

#[tokio::test]
async fn test_failed_deposit_append_leaves_no_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = service.create_user("carol").await?;

    sqlx::query(
        r#"
        CREATE TRIGGER fail_deposit
        BEFORE INSERT ON transactions
        WHEN NEW.type = 'DEPOSIT'
        BEGIN
            SELECT RAISE(ABORT, 'injected failure');
        END
        "#,
    )
    .execute(service.repository().pool())
    .await?;

    let err = service.deposit(user.id, 1000, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert!(service.repository().find_balance(user.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_dropped_unit_of_work_is_discarded() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = service.create_user("dave").await?;

    {
        let mut uow = service.repository().begin();
        uow.lock_users(&[user.id]).await?;
        uow.get_or_create_balance(user.id).await?;
        uow.adjust_balance(user.id, 5000)?;
        // dropped without commit
    }

    // The user lock is released and nothing was persisted
    let change = service.deposit(user.id, 100, None).await?;
    assert_eq!(change.new_balance, 100);

    Ok(())
}

#[tokio::test]
async fn test_unit_of_work_requires_locked_users() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = funded_user(&service, "alice", 1000).await?;
    let bob = funded_user(&service, "bob", 1000).await?;

    let mut uow = service.repository().begin();
    assert!(uow.get_or_create_balance(alice).await.is_err());

    uow.lock_users(&[alice]).await?;
    assert!(uow.get_or_create_balance(bob).await.is_err());
    assert!(uow.lock_users(&[bob]).await.is_err());
    uow.rollback();

    Ok(())
}

#[tokio::test]
async fn test_transaction_log_is_append_only() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, "erin", 1000).await?;

    let update = sqlx::query("UPDATE transactions SET amount_cents = 1 WHERE user_id = ?")
        .bind(user)
        .execute(service.repository().pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM transactions")
        .execute(service.repository().pool())
        .await;
    assert!(delete.is_err());

    assert_eq!(records_for(&service, user).await?[0].amount_cents, 1000);

    Ok(())
}

#[tokio::test]
async fn test_negative_balance_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, "frank", 1000).await?;

    let mut uow = service.repository().begin();
    uow.lock_users(&[user]).await?;
    uow.get_or_create_balance(user).await?;
    assert!(uow.adjust_balance(user, -2000).is_err());
    uow.rollback();

    // The schema refuses it as well
    let update = sqlx::query("UPDATE balances SET amount_cents = -1 WHERE user_id = ?")
        .bind(user)
        .execute(service.repository().pool())
        .await;
    assert!(update.is_err());
    assert_eq!(balance_of(&service, user).await?, 1000);

    Ok(())
}
