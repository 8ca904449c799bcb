use serde_json::{json, Value};

use crate::application::ErrorKind;

use super::ValidationErrors;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_UNPROCESSABLE: u16 = 422;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// A transport-neutral response: an HTTP-style status and a JSON envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: STATUS_OK,
            body: json!({ "success": true, "data": data }),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "success": false, "message": { "error": message } }),
        }
    }

    pub fn validation(errors: &ValidationErrors) -> Self {
        Self {
            status: STATUS_UNPROCESSABLE,
            body: json!({
                "success": false,
                "message": "Validation failed.",
                "error": errors,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// The error message of a failed response, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.body
            .pointer("/message/error")
            .and_then(Value::as_str)
    }
}

/// Map an engine failure kind onto a status code.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::UserNotFound => STATUS_NOT_FOUND,
        ErrorKind::InsufficientFunds => STATUS_CONFLICT,
        ErrorKind::SelfTransfer => STATUS_BAD_REQUEST,
        ErrorKind::StorageFailure => STATUS_INTERNAL_ERROR,
    }
}
