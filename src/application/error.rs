use std::fmt;

use thiserror::Error;

use crate::domain::{Cents, UserId};

/// Which side of an operation a missing user was referenced as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Account,
    Sender,
    Recipient,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Account => write!(f, "User"),
            UserRole::Sender => write!(f, "Sender"),
            UserRole::Recipient => write!(f, "Recipient"),
        }
    }
}

/// Transport-independent classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserNotFound,
    InsufficientFunds,
    SelfTransfer,
    StorageFailure,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{role} not found: {user_id}")]
    UserNotFound { user_id: UserId, role: UserRole },

    #[error("Insufficient funds for user {user_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        balance: Cents,
        required: Cents,
    },

    #[error("Cannot transfer funds from user {0} to itself")]
    SelfTransfer(UserId),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::UserNotFound { .. } => ErrorKind::UserNotFound,
            AppError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            AppError::SelfTransfer(_) => ErrorKind::SelfTransfer,
            AppError::Storage(_) => ErrorKind::StorageFailure,
        }
    }
}
