use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::domain::{parse_cents, Cents, ParseCentsError, UserId};

/// Smallest amount accepted by any operation (0.01).
pub const MIN_AMOUNT_CENTS: Cents = 1;
/// Largest deposit or withdrawal accepted (999 999 999 999.99).
pub const MAX_AMOUNT_CENTS: Cents = 99_999_999_999_999;
pub const MAX_COMMENT_CHARS: usize = 255;

/// Field-level validation failures, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A validated deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCommand {
    pub user_id: UserId,
    pub amount_cents: Cents,
    pub comment: Option<String>,
}

/// A validated transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount_cents: Cents,
    pub comment: Option<String>,
}

/// Which operation an amount belongs to; only used to word messages and to
/// pick the upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountField {
    Deposit,
    Withdrawal,
    Transfer,
}

impl AmountField {
    fn noun(&self) -> &'static str {
        match self {
            AmountField::Deposit => "deposit",
            AmountField::Withdrawal => "withdrawal",
            AmountField::Transfer => "transfer",
        }
    }

    fn max_cents(&self) -> Option<Cents> {
        match self {
            AmountField::Deposit | AmountField::Withdrawal => Some(MAX_AMOUNT_CENTS),
            AmountField::Transfer => None,
        }
    }
}

pub fn parse_account_command(
    body: &Value,
    amount_field: AmountField,
) -> Result<AccountCommand, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let user_id = required_integer(body, "user_id", "User id", &mut errors);
    let amount_cents = required_amount(body, amount_field, &mut errors);
    let comment = optional_comment(body, &mut errors);

    match (user_id, amount_cents) {
        (Some(user_id), Some(amount_cents)) if errors.is_empty() => Ok(AccountCommand {
            user_id,
            amount_cents,
            comment,
        }),
        _ => Err(errors),
    }
}

pub fn parse_transfer_command(body: &Value) -> Result<TransferCommand, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let from_user_id = required_integer(body, "from_user_id", "Sender id", &mut errors);
    let to_user_id = required_integer(body, "to_user_id", "Recipient id", &mut errors);
    let amount_cents = required_amount(body, AmountField::Transfer, &mut errors);
    let comment = optional_comment(body, &mut errors);

    match (from_user_id, to_user_id, amount_cents) {
        (Some(from_user_id), Some(to_user_id), Some(amount_cents)) if errors.is_empty() => {
            Ok(TransferCommand {
                from_user_id,
                to_user_id,
                amount_cents,
                comment,
            })
        }
        _ => Err(errors),
    }
}

fn present<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
    body.get(field).filter(|value| !value.is_null())
}

fn required_integer(
    body: &Value,
    field: &str,
    label: &str,
    errors: &mut ValidationErrors,
) -> Option<i64> {
    let Some(value) = present(body, field) else {
        errors.add(field, format!("{} is required.", label));
        return None;
    };

    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        errors.add(field, format!("{} must be an integer.", label));
    }
    parsed
}

fn required_amount(
    body: &Value,
    amount_field: AmountField,
    errors: &mut ValidationErrors,
) -> Option<Cents> {
    let noun = amount_field.noun();
    let Some(value) = present(body, "amount") else {
        errors.add("amount", format!("Specify the {} amount.", noun));
        return None;
    };

    // `f64` Display never switches to exponent notation, unlike `Number`'s
    let raw = match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(whole), _) => whole.to_string(),
            (None, Some(float)) => float.to_string(),
            (None, None) => n.to_string(),
        },
        Value::String(s) => s.clone(),
        _ => String::new(),
    };

    let cents = match parse_cents(&raw) {
        Ok(cents) => cents,
        Err(ParseCentsError::InvalidFormat) => {
            errors.add("amount", format!("The {} amount must be a number.", noun));
            return None;
        }
        Err(ParseCentsError::TooPrecise) => {
            errors.add(
                "amount",
                format!("The {} amount must have at most two decimal places.", noun),
            );
            return None;
        }
        Err(ParseCentsError::OutOfRange) => {
            errors.add("amount", format!("The {} amount is too large.", noun));
            return None;
        }
    };

    if cents < MIN_AMOUNT_CENTS {
        errors.add("amount", format!("The minimum {} amount is 0.01.", noun));
        return None;
    }
    if let Some(max) = amount_field.max_cents() {
        if cents > max {
            errors.add(
                "amount",
                format!("The {} amount must not exceed 999 999 999 999.99.", noun),
            );
            return None;
        }
    }

    Some(cents)
}

fn optional_comment(body: &Value, errors: &mut ValidationErrors) -> Option<String> {
    match present(body, "comment")? {
        Value::String(comment) => {
            if comment.chars().count() > MAX_COMMENT_CHARS {
                errors.add(
                    "comment",
                    format!(
                        "Comment may not be longer than {} characters.",
                        MAX_COMMENT_CHARS
                    ),
                );
                None
            } else {
                Some(comment.clone())
            }
        }
        _ => {
            errors.add("comment", "Comment must be a string.");
            None
        }
    }
}
