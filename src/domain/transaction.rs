use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, UserId};

pub type TransactionId = i64;

/// The kind of ledger event a transaction record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Value entering the ledger
    Deposit,
    /// Value leaving the ledger
    Withdraw,
    /// Debit side of a transfer between two users
    TransferOut,
    /// Credit side of a transfer between two users
    TransferIn,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdraw => "WITHDRAW",
            TransactionKind::TransferOut => "TRANSFER_OUT",
            TransactionKind::TransferIn => "TRANSFER_IN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TransactionKind::Deposit),
            "WITHDRAW" => Some(TransactionKind::Withdraw),
            "TRANSFER_OUT" => Some(TransactionKind::TransferOut),
            "TRANSFER_IN" => Some(TransactionKind::TransferIn),
            _ => None,
        }
    }

    /// Signed effect of a record of this kind on its user's balance.
    pub fn delta(&self, amount_cents: Cents) -> Cents {
        match self {
            TransactionKind::Deposit | TransactionKind::TransferIn => amount_cents,
            TransactionKind::Withdraw | TransactionKind::TransferOut => -amount_cents,
        }
    }

    /// Transfer records carry a counterparty; deposits and withdrawals don't.
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            TransactionKind::TransferOut | TransactionKind::TransferIn
        )
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transaction record that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount_cents: Cents,
    pub comment: Option<String>,
    pub related_user_id: Option<UserId>,
}

impl NewTransaction {
    pub fn deposit(user_id: UserId, amount_cents: Cents) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Deposit,
            amount_cents,
            comment: None,
            related_user_id: None,
        }
    }

    pub fn withdraw(user_id: UserId, amount_cents: Cents) -> Self {
        Self {
            user_id,
            kind: TransactionKind::Withdraw,
            amount_cents,
            comment: None,
            related_user_id: None,
        }
    }

    /// Both sides of a transfer: the sender's `TRANSFER_OUT` and the
    /// recipient's `TRANSFER_IN`, each pointing at the other user.
    pub fn transfer_pair(
        from_user_id: UserId,
        to_user_id: UserId,
        amount_cents: Cents,
    ) -> (Self, Self) {
        let outgoing = Self {
            user_id: from_user_id,
            kind: TransactionKind::TransferOut,
            amount_cents,
            comment: None,
            related_user_id: Some(to_user_id),
        };
        let incoming = Self {
            user_id: to_user_id,
            kind: TransactionKind::TransferIn,
            amount_cents,
            comment: None,
            related_user_id: Some(from_user_id),
        };
        (outgoing, incoming)
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }
}

/// An immutable, stored transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount_cents: Cents,
    pub comment: Option<String>,
    pub related_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Signed effect of this record on its user's balance.
    pub fn delta(&self) -> Cents {
        self.kind.delta(self.amount_cents)
    }

    /// Returns true if `other` is the reciprocal side of this transfer record.
    pub fn is_counterpart_of(&self, other: &LedgerTransaction) -> bool {
        let kinds_match = matches!(
            (self.kind, other.kind),
            (TransactionKind::TransferOut, TransactionKind::TransferIn)
                | (TransactionKind::TransferIn, TransactionKind::TransferOut)
        );
        kinds_match
            && self.amount_cents == other.amount_cents
            && self.related_user_id == Some(other.user_id)
            && other.related_user_id == Some(self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: TransactionId, record: NewTransaction) -> LedgerTransaction {
        LedgerTransaction {
            id,
            user_id: record.user_id,
            kind: record.kind,
            amount_cents: record.amount_cents,
            comment: record.comment,
            related_user_id: record.related_user_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdraw,
            TransactionKind::TransferOut,
            TransactionKind::TransferIn,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::from_str("deposit"), None);
    }

    #[test]
    fn test_kind_delta_sign() {
        assert_eq!(TransactionKind::Deposit.delta(500), 500);
        assert_eq!(TransactionKind::TransferIn.delta(500), 500);
        assert_eq!(TransactionKind::Withdraw.delta(500), -500);
        assert_eq!(TransactionKind::TransferOut.delta(500), -500);
    }

    #[test]
    fn test_transfer_pair_is_reciprocal() {
        let (outgoing, incoming) = NewTransaction::transfer_pair(1, 2, 15075);

        assert_eq!(outgoing.kind, TransactionKind::TransferOut);
        assert_eq!(outgoing.user_id, 1);
        assert_eq!(outgoing.related_user_id, Some(2));
        assert_eq!(incoming.kind, TransactionKind::TransferIn);
        assert_eq!(incoming.user_id, 2);
        assert_eq!(incoming.related_user_id, Some(1));

        let outgoing = stored(10, outgoing);
        let incoming = stored(11, incoming);
        assert!(outgoing.is_counterpart_of(&incoming));
        assert!(incoming.is_counterpart_of(&outgoing));
        assert_eq!(outgoing.delta() + incoming.delta(), 0);
    }

    #[test]
    fn test_deposit_is_not_a_counterpart() {
        let deposit = stored(1, NewTransaction::deposit(1, 100));
        let (_, incoming) = NewTransaction::transfer_pair(2, 1, 100);
        assert!(!deposit.is_counterpart_of(&stored(2, incoming)));
    }

    #[test]
    fn test_serializes_kind_in_screaming_case() {
        let json = serde_json::to_string(&TransactionKind::TransferOut).unwrap();
        assert_eq!(json, "\"TRANSFER_OUT\"");
    }
}
