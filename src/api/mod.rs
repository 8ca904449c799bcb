//! Request boundary: validates raw request fields, calls the balance engine
//! and shapes its outcome into a status code plus JSON envelope. Nothing
//! here knows about a concrete transport; the CLI is one caller.

mod request;
mod response;

pub use request::*;
pub use response::*;

use serde_json::{json, Value};
use tracing::error;

use crate::application::{AppError, BalanceService, UserRole};
use crate::domain::{format_cents, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Balance,
    Deposit,
    Withdraw,
    Transfer,
}

impl Operation {
    fn storage_failure_message(&self) -> &'static str {
        match self {
            Operation::Balance => "An error occurred while fetching the balance.",
            Operation::Deposit => "An error occurred while depositing funds.",
            Operation::Withdraw => "An error occurred while withdrawing funds.",
            Operation::Transfer => "An error occurred while transferring funds.",
        }
    }

    fn insufficient_funds_message(&self) -> &'static str {
        match self {
            Operation::Transfer => "Insufficient funds for transfer.",
            _ => "Insufficient funds on balance.",
        }
    }
}

pub struct LedgerApi {
    service: BalanceService,
}

impl LedgerApi {
    pub fn new(service: BalanceService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &BalanceService {
        &self.service
    }

    /// `GET balance/{user_id}`
    pub async fn balance(&self, user_id: UserId) -> ApiResponse {
        if user_id <= 0 {
            return ApiResponse::error(STATUS_BAD_REQUEST, "User id must be a positive number.");
        }

        match self.service.get_balance(user_id).await {
            Ok(view) => ApiResponse::ok(json!({
                "user_id": view.user_id,
                "balance": format_cents(view.balance),
            })),
            Err(err) => failure(Operation::Balance, &err),
        }
    }

    /// `POST deposit` with `{user_id, amount, comment?}`
    pub async fn deposit(&self, body: &Value) -> ApiResponse {
        let command = match parse_account_command(body, AmountField::Deposit) {
            Ok(command) => command,
            Err(errors) => return ApiResponse::validation(&errors),
        };

        match self
            .service
            .deposit(command.user_id, command.amount_cents, command.comment)
            .await
        {
            Ok(change) => ApiResponse::ok(json!({
                "user_id": change.user_id,
                "new_balance": format_cents(change.new_balance),
                "transaction_id": change.transaction_id,
                "message": "Balance topped up successfully.",
            })),
            Err(err) => failure(Operation::Deposit, &err),
        }
    }

    /// `POST withdraw` with `{user_id, amount, comment?}`
    pub async fn withdraw(&self, body: &Value) -> ApiResponse {
        let command = match parse_account_command(body, AmountField::Withdrawal) {
            Ok(command) => command,
            Err(errors) => return ApiResponse::validation(&errors),
        };

        match self
            .service
            .withdraw(command.user_id, command.amount_cents, command.comment)
            .await
        {
            Ok(change) => ApiResponse::ok(json!({
                "user_id": change.user_id,
                "new_balance": format_cents(change.new_balance),
                "transaction_id": change.transaction_id,
                "message": "Funds withdrawn successfully.",
            })),
            Err(err) => failure(Operation::Withdraw, &err),
        }
    }

    /// `POST transfer` with `{from_user_id, to_user_id, amount, comment?}`
    pub async fn transfer(&self, body: &Value) -> ApiResponse {
        let command = match parse_transfer_command(body) {
            Ok(command) => command,
            Err(errors) => return ApiResponse::validation(&errors),
        };

        match self
            .service
            .transfer(
                command.from_user_id,
                command.to_user_id,
                command.amount_cents,
                command.comment,
            )
            .await
        {
            Ok(receipt) => ApiResponse::ok(json!({
                "from_user_id": receipt.from_user_id,
                "to_user_id": receipt.to_user_id,
                "amount": format_cents(receipt.amount),
                "balance_from_user_id": format_cents(receipt.from_balance),
                "balance_to_user_id": format_cents(receipt.to_balance),
                "out_transaction_id": receipt.out_transaction_id,
                "in_transaction_id": receipt.in_transaction_id,
                "message": "Transfer completed successfully.",
            })),
            Err(err) => failure(Operation::Transfer, &err),
        }
    }
}

fn failure(operation: Operation, err: &AppError) -> ApiResponse {
    let status = status_for(err.kind());
    let message = match err {
        AppError::UserNotFound { role, .. } => match role {
            UserRole::Account => "User not found.",
            UserRole::Sender => "Sender not found.",
            UserRole::Recipient => "Recipient not found.",
        },
        AppError::InsufficientFunds { .. } => operation.insufficient_funds_message(),
        AppError::SelfTransfer(_) => "Cannot transfer funds to yourself.",
        AppError::Storage(_) => {
            error!(?operation, error = %err, "Operation failed");
            operation.storage_failure_message()
        }
    };
    ApiResponse::error(status, message)
}
