//! Transaction ledger
//!
//! Append-only history of monetary events, one entry per charge, penalty
//! or refund. The orchestrator writes entries; everything else only reads.

use std::sync::Arc;

use tracing::debug;

use crate::db::Store;
use crate::model::{FeeKind, LedgerEntry, LedgerSummary};
use crate::types::Result;

/// Queryable, append-only ledger over a [`Store`]
pub struct Ledger<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append an entry. Idempotent under retry: an entry with the same id
    /// is returned as-is rather than duplicated.
    pub async fn record(&self, entry: LedgerEntry) -> Result<LedgerEntry> {
        if let Some(existing) = self.store.get_ledger_entry(&entry.id).await? {
            debug!(entry_id = %entry.id, "Ledger entry already recorded, skipping insert");
            return Ok(existing);
        }

        self.store.insert_ledger_entry(&entry).await?;
        debug!(
            entry_id = %entry.id,
            request_id = %entry.request_id,
            user_id = %entry.user_id,
            amount = %entry.amount,
            "Ledger entry recorded"
        );
        Ok(entry)
    }

    /// Entries for a user, newest first
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        self.store.list_ledger_for_user(user_id).await
    }

    /// Entries for a request, newest first
    pub async fn list_for_request(&self, request_id: &str) -> Result<Vec<LedgerEntry>> {
        self.store.list_ledger_for_request(request_id).await
    }

    /// Find the outstanding charge for an idempotence tuple, if any.
    ///
    /// A charge is outstanding while the user has more `kind` charges than
    /// refunds on the request. Refund entries only ever target the
    /// requester's acceptance charge, so counting refunds per user is
    /// unambiguous.
    pub async fn outstanding_charge(
        &self,
        request_id: &str,
        user_id: &str,
        kind: FeeKind,
    ) -> Result<Option<LedgerEntry>> {
        let entries = self.list_for_request(request_id).await?;

        let refunds = entries
            .iter()
            .filter(|e| e.user_id == user_id && e.kind == FeeKind::Refund)
            .count();
        // Entries come newest first, so the first match is the latest charge
        let charges: Vec<&LedgerEntry> = entries
            .iter()
            .filter(|e| e.user_id == user_id && e.kind == kind && e.is_charge())
            .collect();

        if charges.len() > refunds {
            Ok(charges.first().map(|e| (*e).clone()))
        } else {
            Ok(None)
        }
    }

    /// Read-side aggregates for a user
    pub async fn summary_for_user(&self, user_id: &str) -> Result<LedgerSummary> {
        let entries = self.list_for_user(user_id).await?;
        Ok(LedgerSummary::from_entries(&entries))
    }
}
