mod common;

use anyhow::Result;
use std::time::Duration;

use common::{balance_of, funded_user, record_count, test_service, test_service_with};
use tally::application::AppError;
use tally::domain::NewTransaction;
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_cannot_double_spend() -> Result<()> {
    let (service, _temp) = test_service().await?;

    for round in 0..5 {
        let user = funded_user(&service, &format!("user-{}", round), 10000).await?;

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.withdraw(user, 6000, None).await }
        });
        let second = tokio::spawn({
            let service = service.clone();
            async move { service.withdraw(user, 6000, None).await }
        });

        let outcomes = [first.await?, second.await?];
        let succeeded = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let rejected = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(AppError::InsufficientFunds { .. })))
            .count();

        assert_eq!(succeeded, 1, "round {}: exactly one withdrawal must succeed", round);
        assert_eq!(rejected, 1, "round {}: the other must be rejected", round);
        assert_eq!(balance_of(&service, user).await?, 4000);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_are_not_lost() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, "alice", 0).await?;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.deposit(user, 125, None).await })
        })
        .collect();

    for handle in handles {
        handle.await??;
    }

    assert_eq!(balance_of(&service, user).await?, 2500);
    assert_eq!(record_count(&service).await?, 20);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_transfers_conserve_value() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_user(&service, "alice", 10000).await?;
    let b = funded_user(&service, "bob", 10000).await?;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let service = service.clone();
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tokio::spawn(async move { service.transfer(from, to, 300, None).await })
        })
        .collect();

    for handle in handles {
        handle.await??;
    }

    assert_eq!(balance_of(&service, a).await?, 10000);
    assert_eq!(balance_of(&service, b).await?, 10000);

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_drain_never_goes_negative() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, "carol", 1000).await?;

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.withdraw(user, 100, None).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await? {
            Ok(change) => {
                assert!(change.new_balance >= 0);
                succeeded += 1;
            }
            Err(AppError::InsufficientFunds { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(balance_of(&service, user).await?, 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_users_do_not_block() -> Result<()> {
    let (service, _temp) =
        test_service_with(|config| config.with_busy_timeout(Duration::from_millis(200))).await?;
    let a = funded_user(&service, "alice", 1000).await?;
    let b = funded_user(&service, "bob", 1000).await?;

    // An open unit of work on alice with a staged debit
    let mut uow = service.repository().begin();
    uow.lock_users(&[a]).await?;
    uow.get_or_create_balance(a).await?;
    uow.adjust_balance(a, -300)?;
    uow.append_transaction(NewTransaction::withdraw(a, 300));

    let change = timeout(Duration::from_secs(2), service.deposit(b, 500, None)).await??;
    assert_eq!(change.new_balance, 1500);
    let view = timeout(Duration::from_secs(2), service.get_balance(a)).await??;
    assert_eq!(view.balance, 1000);

    uow.commit().await?;
    assert_eq!(balance_of(&service, a).await?, 700);

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_waits_for_open_unit() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, "alice", 1000).await?;

    let mut uow = service.repository().begin();
    uow.lock_users(&[user]).await?;
    uow.get_or_create_balance(user).await?;
    uow.adjust_balance(user, -600)?;
    uow.append_transaction(NewTransaction::withdraw(user, 600));

    let pending = tokio::spawn({
        let service = service.clone();
        async move { service.withdraw(user, 600, None).await }
    });

    sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    uow.commit().await?;

    // The waiting withdrawal re-reads the committed balance
    let err = pending.await?.unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { balance: 400, .. }));
    assert_eq!(balance_of(&service, user).await?, 400);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_integrity_check_during_concurrent_load() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = funded_user(&service, "alice", 100000).await?;
    let b = funded_user(&service, "bob", 100000).await?;

    let load = tokio::spawn({
        let service = service.clone();
        async move {
            for i in 0..200 {
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                service.transfer(from, to, 1, None).await?;
                service.deposit(to, 1, None).await?;
            }
            Ok::<_, AppError>(())
        }
    });

    for _ in 0..100 {
        let report = service.check_integrity().await?;
        assert!(report.is_healthy(), "issues: {:?}", report.issues);
    }

    load.await??;
    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.total_balance, 200200);

    Ok(())
}
