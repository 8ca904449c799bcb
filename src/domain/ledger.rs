use std::collections::HashMap;

use super::{Balance, Cents, LedgerTransaction, TransactionId, TransactionKind, UserId};

/// Compute the net balance change for every user that appears in `records`.
pub fn compute_all_deltas(records: &[LedgerTransaction]) -> HashMap<UserId, Cents> {
    let mut deltas: HashMap<UserId, Cents> = HashMap::new();

    for record in records {
        *deltas.entry(record.user_id).or_insert(0) += record.delta();
    }

    deltas
}

/// Find transfer records that are not part of a complete pair.
///
/// A transfer is stored as a `TRANSFER_OUT` immediately followed by its
/// reciprocal `TRANSFER_IN`. `records` must be ordered by id.
pub fn find_unpaired_transfers(records: &[LedgerTransaction]) -> Vec<TransactionId> {
    let mut unpaired = Vec::new();
    let mut iter = records.iter().peekable();

    while let Some(record) = iter.next() {
        match record.kind {
            TransactionKind::Deposit | TransactionKind::Withdraw => {}
            TransactionKind::TransferOut => match iter.peek() {
                Some(next) if next.id == record.id + 1 && record.is_counterpart_of(next) => {
                    iter.next();
                }
                _ => unpaired.push(record.id),
            },
            TransactionKind::TransferIn => unpaired.push(record.id),
        }
    }

    unpaired
}

/// Result of a ledger integrity check.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub user_count: i64,
    pub balance_count: usize,
    pub transaction_count: usize,
    /// Sum of all stored balances
    pub total_balance: Cents,
    /// Deposits minus withdrawals; must equal `total_balance`
    pub net_deposits: Cents,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn is_balanced(&self) -> bool {
        self.total_balance == self.net_deposits
    }

    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Cross-check stored balances against the transaction log.
pub fn build_integrity_report(
    user_count: i64,
    balances: &[Balance],
    records: &[LedgerTransaction],
) -> IntegrityReport {
    let mut issues = Vec::new();
    let deltas = compute_all_deltas(records);

    for balance in balances {
        if balance.amount_cents < 0 {
            issues.push(format!(
                "User {} has a negative balance ({} cents)",
                balance.user_id, balance.amount_cents
            ));
        }

        let expected = deltas.get(&balance.user_id).copied().unwrap_or(0);
        if balance.amount_cents != expected {
            issues.push(format!(
                "User {} balance is {} cents but its records add up to {} cents",
                balance.user_id, balance.amount_cents, expected
            ));
        }
    }

    for user_id in deltas.keys() {
        if !balances.iter().any(|b| b.user_id == *user_id) {
            issues.push(format!(
                "User {} has transaction records but no balance",
                user_id
            ));
        }
    }

    for id in find_unpaired_transfers(records) {
        issues.push(format!("Transfer record {} has no matching counterpart", id));
    }

    let transfer_sum: Cents = records
        .iter()
        .filter(|record| record.kind.is_transfer())
        .map(LedgerTransaction::delta)
        .sum();
    if transfer_sum != 0 {
        issues.push(format!(
            "Transfers do not conserve value (net {} cents)",
            transfer_sum
        ));
    }

    let total_balance: Cents = balances.iter().map(|b| b.amount_cents).sum();
    let net_deposits: Cents = records
        .iter()
        .filter(|record| !record.kind.is_transfer())
        .map(LedgerTransaction::delta)
        .sum();
    if total_balance != net_deposits {
        issues.push(format!(
            "Total balance {} cents differs from deposits minus withdrawals {} cents",
            total_balance, net_deposits
        ));
    }

    IntegrityReport {
        user_count,
        balance_count: balances.len(),
        transaction_count: records.len(),
        total_balance,
        net_deposits,
        issues,
    }
}
