//! Ledger entry model
//!
//! One entry per monetary event (a "lead" in product vocabulary). Entries
//! are append-only: a refund is a new negative entry, never an edit of the
//! original charge. The spending aggregates the UI shows are pure
//! reductions over the entry list.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Collection name for ledger entries
pub const LEDGER_COLLECTION: &str = "ledger";

/// Which side of a request the charged user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Trucker,
    Provider,
}

/// Transaction kind. Together with `(request_id, user_id)` this forms the
/// idempotence tuple the orchestrator consults before charging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Acceptance,
    Penalty,
    Refund,
}

/// Settlement status of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Recorded without a confirmed gateway charge (payment bypass)
    Pending,
    Charged,
    Refunded,
}

/// One recorded monetary event tied to a request and a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub request_id: String,
    pub user_id: String,
    pub role: PartyRole,
    pub kind: FeeKind,

    /// Signed amount: positive for charges, negative for refunds
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,

    pub status: LedgerStatus,
    pub description: String,

    /// Gateway reference of the charge/refund, used to target refunds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Record a charge (positive amount)
    pub fn charge(
        request_id: &str,
        user_id: &str,
        role: PartyRole,
        kind: FeeKind,
        amount: Decimal,
        description: impl Into<String>,
        gateway_ref: Option<String>,
        status: LedgerStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            role,
            kind,
            amount,
            status,
            description: description.into(),
            gateway_ref,
            created_at: Utc::now(),
        }
    }

    /// Record a refund. `amount` is the positive magnitude being returned;
    /// the entry stores it negated.
    pub fn refund(
        request_id: &str,
        user_id: &str,
        role: PartyRole,
        amount: Decimal,
        description: impl Into<String>,
        gateway_ref: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            role,
            kind: FeeKind::Refund,
            amount: -amount,
            status: LedgerStatus::Refunded,
            description: description.into(),
            gateway_ref,
            created_at: Utc::now(),
        }
    }

    /// Whether this entry is a charge (positive amount)
    pub fn is_charge(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

/// Read-side aggregates over a user's ledger entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Sum of confirmed charges minus refunded magnitudes
    #[serde(with = "rust_decimal::serde::str")]
    pub net_spent: Decimal,
    /// Sum of charges recorded without gateway confirmation
    #[serde(with = "rust_decimal::serde::str")]
    pub pending_amount: Decimal,
    /// Total magnitude refunded back to the user
    #[serde(with = "rust_decimal::serde::str")]
    pub refunded_total: Decimal,
    /// Number of penalty charges against the user
    pub penalty_count: usize,
}

impl LedgerSummary {
    /// Reduce a list of entries into the UI aggregates.
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.status {
                LedgerStatus::Charged => summary.net_spent += entry.amount,
                LedgerStatus::Pending => summary.pending_amount += entry.amount,
                LedgerStatus::Refunded => {
                    summary.net_spent += entry.amount;
                    summary.refunded_total += -entry.amount;
                }
            }
            if entry.kind == FeeKind::Penalty && entry.is_charge() {
                summary.penalty_count += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn test_refund_entry_is_negative() {
        let entry = LedgerEntry::refund("req-1", "trucker-1", PartyRole::Trucker, dec(500), "refund", None);
        assert_eq!(entry.amount, dec(-500));
        assert_eq!(entry.kind, FeeKind::Refund);
        assert_eq!(entry.status, LedgerStatus::Refunded);
        assert!(!entry.is_charge());
    }

    #[test]
    fn test_summary_sign_convention() {
        // Two charges and one refund: net = 5.00 + 5.00 - 5.00
        let entries = vec![
            LedgerEntry::charge(
                "req-1",
                "user-1",
                PartyRole::Trucker,
                FeeKind::Acceptance,
                dec(500),
                "acceptance fee",
                Some("ch_1".into()),
                LedgerStatus::Charged,
            ),
            LedgerEntry::charge(
                "req-2",
                "user-1",
                PartyRole::Provider,
                FeeKind::Penalty,
                dec(500),
                "cancellation penalty",
                Some("ch_2".into()),
                LedgerStatus::Charged,
            ),
            LedgerEntry::refund("req-1", "user-1", PartyRole::Trucker, dec(500), "refund", None),
        ];

        let summary = LedgerSummary::from_entries(&entries);
        assert_eq!(summary.net_spent, dec(500));
        assert_eq!(summary.refunded_total, dec(500));
        assert_eq!(summary.penalty_count, 1);
        assert_eq!(summary.pending_amount, Decimal::ZERO);
    }

    #[test]
    fn test_summary_pending_is_separate() {
        let entries = vec![LedgerEntry::charge(
            "req-1",
            "user-1",
            PartyRole::Trucker,
            FeeKind::Acceptance,
            dec(500),
            "acceptance fee",
            None,
            LedgerStatus::Pending,
        )];

        let summary = LedgerSummary::from_entries(&entries);
        assert_eq!(summary.net_spent, Decimal::ZERO);
        assert_eq!(summary.pending_amount, dec(500));
    }
}
