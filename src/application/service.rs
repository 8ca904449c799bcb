use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{
    build_integrity_report, Cents, IntegrityReport, NewTransaction, TransactionId, User, UserId,
};
use crate::storage::{Committed, Repository, StoreConfig, UnitOfWork};

use super::{AppError, UserRole};

/// The balance engine: every operation is one atomic unit of work against
/// the repository. The service itself holds no mutable state and can be
/// cloned freely across tasks.
#[derive(Clone)]
pub struct BalanceService {
    repo: Repository,
}

/// Current balance of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub user_id: UserId,
    pub balance: Cents,
}

/// Outcome of a deposit or withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceChange {
    pub user_id: UserId,
    pub new_balance: Cents,
    pub transaction_id: TransactionId,
}

/// Outcome of a transfer between two users
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Cents,
    pub from_balance: Cents,
    pub to_balance: Cents,
    pub out_transaction_id: TransactionId,
    pub in_transaction_id: TransactionId,
}

impl BalanceService {
    /// Create a new balance service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Initialize a new database (creating the file if needed).
    pub async fn init(config: &StoreConfig) -> Result<Self, AppError> {
        let repo = Repository::init(config).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Run `work` inside one unit of work: commit if it succeeds, discard
    /// every write it staged if it fails. Returns the work's value together
    /// with what the commit wrote.
    pub async fn run_atomic<T, F>(
        &self,
        operation: &'static str,
        work: F,
    ) -> Result<(T, Committed), AppError>
    where
        F: for<'u> FnOnce(&'u mut UnitOfWork) -> BoxFuture<'u, Result<T, AppError>>,
    {
        let mut uow = self.repo.begin();
        let outcome = work(&mut uow).await;

        match outcome {
            Ok(value) => match uow.commit().await {
                Ok(committed) => {
                    info!(operation, "Committed");
                    Ok((value, committed))
                }
                Err(err) => {
                    let err = AppError::from(err);
                    warn!(operation, error = %err, "Commit failed");
                    Err(err)
                }
            },
            Err(err) => {
                uow.rollback();
                warn!(operation, error = %err, "Rolled back");
                Err(err)
            }
        }
    }

    // ========================
    // User directory
    // ========================

    /// Register a new user.
    pub async fn create_user(&self, name: &str) -> Result<User, AppError> {
        let user = self.repo.create_user(name).await?;
        info!(user_id = user.id, "Created user");
        Ok(user)
    }

    /// Get a user by id.
    pub async fn get_user(&self, user_id: UserId) -> Result<User, AppError> {
        self.repo
            .get_user(user_id)
            .await?
            .ok_or(AppError::UserNotFound {
                user_id,
                role: UserRole::Account,
            })
    }

    // ========================
    // Balance operations
    // ========================

    /// Get the current balance of a user. Read-only: a user that was never
    /// touched by a mutation reports 0 and still has no balance row.
    pub async fn get_balance(&self, user_id: UserId) -> Result<BalanceView, AppError> {
        debug!(user_id, "Fetching balance");

        if !self.repo.user_exists(user_id).await? {
            return Err(AppError::UserNotFound {
                user_id,
                role: UserRole::Account,
            });
        }

        let balance = self.repo.get_balance(user_id).await?;
        Ok(BalanceView { user_id, balance })
    }

    /// Credit `amount_cents` to a user and record a `DEPOSIT`.
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        comment: Option<String>,
    ) -> Result<BalanceChange, AppError> {
        debug!(user_id, amount_cents, "Processing deposit");

        let (slot, committed) = self
            .run_atomic("deposit", move |uow| {
                Box::pin(async move {
                    uow.lock_users(&[user_id]).await?;
                    ensure_user(uow, user_id, UserRole::Account).await?;
                    uow.get_or_create_balance(user_id).await?;

                    uow.adjust_balance(user_id, amount_cents)?;
                    let record = NewTransaction::deposit(user_id, amount_cents).with_comment(comment);
                    Ok(uow.append_transaction(record))
                })
            })
            .await?;

        Ok(BalanceChange {
            user_id,
            new_balance: committed.balance(user_id)?,
            transaction_id: committed.transaction_id(slot)?,
        })
    }

    /// Debit `amount_cents` from a user and record a `WITHDRAW`.
    /// Fails with `InsufficientFunds`, leaving the ledger untouched, if the
    /// balance cannot cover it.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        comment: Option<String>,
    ) -> Result<BalanceChange, AppError> {
        debug!(user_id, amount_cents, "Processing withdrawal");

        let (slot, committed) = self
            .run_atomic("withdraw", move |uow| {
                Box::pin(async move {
                    uow.lock_users(&[user_id]).await?;
                    ensure_user(uow, user_id, UserRole::Account).await?;

                    let balance = uow.get_or_create_balance(user_id).await?;
                    if !balance.covers(amount_cents) {
                        return Err(AppError::InsufficientFunds {
                            user_id,
                            balance: balance.amount_cents,
                            required: amount_cents,
                        });
                    }

                    uow.adjust_balance(user_id, -amount_cents)?;
                    let record = NewTransaction::withdraw(user_id, amount_cents).with_comment(comment);
                    Ok(uow.append_transaction(record))
                })
            })
            .await?;

        Ok(BalanceChange {
            user_id,
            new_balance: committed.balance(user_id)?,
            transaction_id: committed.transaction_id(slot)?,
        })
    }

    /// Move `amount_cents` from one user to another, recording a
    /// `TRANSFER_OUT` for the sender and a `TRANSFER_IN` for the recipient.
    ///
    /// Existence is checked sender first, then recipient, so the error names
    /// the first missing side. Both balance changes and both records commit
    /// together or not at all.
    pub async fn transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount_cents: Cents,
        comment: Option<String>,
    ) -> Result<TransferReceipt, AppError> {
        debug!(from_user_id, to_user_id, amount_cents, "Processing transfer");

        let ((out_slot, in_slot), committed) = self
            .run_atomic("transfer", move |uow| {
                Box::pin(async move {
                    uow.lock_users(&[from_user_id, to_user_id]).await?;
                    ensure_user(uow, from_user_id, UserRole::Sender).await?;
                    ensure_user(uow, to_user_id, UserRole::Recipient).await?;

                    if from_user_id == to_user_id {
                        return Err(AppError::SelfTransfer(from_user_id));
                    }

                    let from_balance = uow.get_or_create_balance(from_user_id).await?;
                    if !from_balance.covers(amount_cents) {
                        return Err(AppError::InsufficientFunds {
                            user_id: from_user_id,
                            balance: from_balance.amount_cents,
                            required: amount_cents,
                        });
                    }
                    uow.get_or_create_balance(to_user_id).await?;

                    uow.adjust_balance(from_user_id, -amount_cents)?;
                    uow.adjust_balance(to_user_id, amount_cents)?;

                    let (outgoing, incoming) =
                        NewTransaction::transfer_pair(from_user_id, to_user_id, amount_cents);
                    let out_slot = uow.append_transaction(outgoing.with_comment(comment.clone()));
                    let in_slot = uow.append_transaction(incoming.with_comment(comment));
                    Ok((out_slot, in_slot))
                })
            })
            .await?;

        Ok(TransferReceipt {
            from_user_id,
            to_user_id,
            amount: amount_cents,
            from_balance: committed.balance(from_user_id)?,
            to_balance: committed.balance(to_user_id)?,
            out_transaction_id: committed.transaction_id(out_slot)?,
            in_transaction_id: committed.transaction_id(in_slot)?,
        })
    }

    // ========================
    // Integrity operations
    // ========================

    /// Check ledger integrity and return a report.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let snapshot = self.repo.snapshot().await?;

        Ok(build_integrity_report(
            snapshot.user_count,
            &snapshot.balances,
            &snapshot.records,
        ))
    }
}

async fn ensure_user(uow: &UnitOfWork, user_id: UserId, role: UserRole) -> Result<(), AppError> {
    if uow.user_exists(user_id).await? {
        Ok(())
    } else {
        Err(AppError::UserNotFound { user_id, role })
    }
}
