use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, UserId};

/// Current balance of a single user. At most one row exists per user and it
/// is only created once the user is touched by a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub amount_cents: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Returns true if the balance can cover a debit of `amount_cents`.
    pub fn covers(&self, amount_cents: Cents) -> bool {
        self.amount_cents >= amount_cents
    }
}
