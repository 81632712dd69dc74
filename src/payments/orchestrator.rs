//! Payment side-effect orchestrator
//!
//! Runs the composite fee sequences a lifecycle transition requires:
//!
//! - **Accept**: charge the trucker, then the provider; a failed provider
//!   charge refunds the trucker (required compensation).
//! - **Provider cancels accepted**: charge the provider a penalty, then
//!   refund the trucker's acceptance charge; a failed refund never rolls
//!   the penalty back.
//!
//! Before every charge the ledger is consulted for an outstanding
//! equivalent `(request, user, kind)` entry so retried calls never
//! double-charge. Each successful gateway call writes its ledger entry
//! before the next step runs.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::db::Store;
use crate::ledger::Ledger;
use crate::model::{FeeKind, LedgerEntry, LedgerStatus, PartyRole, ServiceRequest};
use crate::payments::gateway::{PaymentGateway, RefundOutcome};
use crate::payments::saga::Saga;
use crate::types::{Result, RoadcallError};

/// Named fee configuration. Both fees are $5.00 in the reference
/// deployment.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub acceptance_fee: Decimal,
    pub penalty_fee: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            acceptance_fee: Decimal::new(500, 2),
            penalty_fee: Decimal::new(500, 2),
        }
    }
}

/// Ledger entries written by a successful accept sequence
#[derive(Debug, Clone)]
pub struct AcceptCharges {
    pub trucker_entry: LedgerEntry,
    pub provider_entry: LedgerEntry,
}

/// Outcome of the provider-cancels-accepted sequence
#[derive(Debug, Clone)]
pub struct CancellationCharges {
    pub penalty_entry: LedgerEntry,
    /// Refund written for the trucker, absent when there was nothing to
    /// refund
    pub refund_entry: Option<LedgerEntry>,
    /// True when the refund could not be completed; the penalty stands
    /// and the case is logged for manual reconciliation
    pub refund_failed: bool,
}

/// Orchestrates gateway calls and ledger writes for fee sequences
pub struct PaymentOrchestrator<S: Store, G: PaymentGateway> {
    ledger: Ledger<S>,
    gateway: Arc<G>,
    fees: FeeSchedule,
    bypass_payments: bool,
}

impl<S: Store, G: PaymentGateway> Clone for PaymentOrchestrator<S, G> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            gateway: Arc::clone(&self.gateway),
            fees: self.fees.clone(),
            bypass_payments: self.bypass_payments,
        }
    }
}

impl<S: Store + 'static, G: PaymentGateway + 'static> PaymentOrchestrator<S, G> {
    pub fn new(store: Arc<S>, gateway: Arc<G>, fees: FeeSchedule, bypass_payments: bool) -> Self {
        if bypass_payments {
            warn!("Payment bypass enabled: fees will be recorded as pending without gateway calls");
        }
        Self {
            ledger: Ledger::new(store),
            gateway,
            fees,
            bypass_payments,
        }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    /// Accept sequence: charge trucker, then provider. A failed provider
    /// charge refunds the trucker before the error propagates.
    pub async fn accept_fees(
        &self,
        request: &ServiceRequest,
        provider_id: &str,
    ) -> Result<AcceptCharges> {
        let description = format!("Acceptance fee for request {}", request.id);
        let mut saga = Saga::new("accept_fees");

        // Step 1: trucker
        let trucker_entry = self
            .charge_party(
                &request.id,
                &request.trucker_id,
                PartyRole::Trucker,
                FeeKind::Acceptance,
                self.fees.acceptance_fee,
                &description,
            )
            .await?;

        {
            let orchestrator = self.clone();
            let undo_entry = trucker_entry.clone();
            saga.completed("charge_trucker", move || async move {
                orchestrator.refund_charge(&undo_entry).await.map(|_| ())
            });
        }

        // Step 2: provider
        let provider_entry = match self
            .charge_party(
                &request.id,
                provider_id,
                PartyRole::Provider,
                FeeKind::Acceptance,
                self.fees.acceptance_fee,
                &description,
            )
            .await
        {
            Ok(entry) => entry,
            Err(primary) => {
                warn!(
                    request_id = %request.id,
                    provider_id = provider_id,
                    error = %primary,
                    "Provider charge failed, compensating trucker charge"
                );
                let failures = saga.unwind().await;
                if !failures.is_empty() {
                    error!(
                        request_id = %request.id,
                        failures = failures.len(),
                        "Accept saga compensation incomplete"
                    );
                }
                return Err(primary);
            }
        };

        saga.commit();
        info!(
            request_id = %request.id,
            trucker_id = %request.trucker_id,
            provider_id = provider_id,
            amount = %self.fees.acceptance_fee,
            "Acceptance fees charged"
        );

        Ok(AcceptCharges {
            trucker_entry,
            provider_entry,
        })
    }

    /// Provider-cancels-accepted sequence: penalty first, then the trucker
    /// refund. Refund failure is reported, never rolled back into the
    /// penalty.
    pub async fn cancellation_fees(
        &self,
        request: &ServiceRequest,
        provider_id: &str,
    ) -> Result<CancellationCharges> {
        let description = format!("Cancellation penalty for request {}", request.id);

        // Step 1: penalty. Failure here aborts the whole sequence.
        let penalty_entry = self
            .charge_party(
                &request.id,
                provider_id,
                PartyRole::Provider,
                FeeKind::Penalty,
                self.fees.penalty_fee,
                &description,
            )
            .await?;

        // Step 2: refund the trucker's outstanding acceptance charge.
        let mut refund_entry = None;
        let mut refund_failed = false;
        match self
            .ledger
            .outstanding_charge(&request.id, &request.trucker_id, FeeKind::Acceptance)
            .await
        {
            Ok(None) => {
                info!(request_id = %request.id, "No outstanding trucker charge, skipping refund");
            }
            Ok(Some(charge_entry)) => match self.refund_charge(&charge_entry).await {
                Ok(entry) => refund_entry = entry,
                Err(err) => {
                    error!(
                        request_id = %request.id,
                        trucker_id = %request.trucker_id,
                        error = %err,
                        "Trucker refund failed after cancellation penalty: penalty stands, manual reconciliation required"
                    );
                    refund_failed = true;
                }
            },
            Err(err) => {
                error!(
                    request_id = %request.id,
                    error = %err,
                    "Could not consult ledger for refund eligibility"
                );
                refund_failed = true;
            }
        }

        Ok(CancellationCharges {
            penalty_entry,
            refund_entry,
            refund_failed,
        })
    }

    /// Refund both accept charges after a lost persistence race. Failures
    /// are logged, not propagated: the caller is already reporting the
    /// primary error.
    pub async fn release_accept_charges(&self, charges: &AcceptCharges) {
        for entry in [&charges.trucker_entry, &charges.provider_entry] {
            if let Err(err) = self.refund_charge(entry).await {
                error!(
                    request_id = %entry.request_id,
                    user_id = %entry.user_id,
                    error = %err,
                    "Failed to release charge after lost acceptance race: manual reconciliation required"
                );
            }
        }
    }

    /// Refund a penalty charge after a lost persistence race.
    pub async fn release_penalty(&self, entry: &LedgerEntry) {
        if let Err(err) = self.refund_charge(entry).await {
            error!(
                request_id = %entry.request_id,
                user_id = %entry.user_id,
                error = %err,
                "Failed to release penalty after lost cancellation race: manual reconciliation required"
            );
        }
    }

    /// Consult the ledger, charge via the gateway (or record a bypassed
    /// pending charge), and write the entry. The ledger write is
    /// non-optional once the gateway call succeeded.
    async fn charge_party(
        &self,
        request_id: &str,
        user_id: &str,
        role: PartyRole,
        kind: FeeKind,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerEntry> {
        if let Some(existing) = self.ledger.outstanding_charge(request_id, user_id, kind).await? {
            debug!(
                request_id = request_id,
                user_id = user_id,
                entry_id = %existing.id,
                "Equivalent charge already recorded, skipping gateway call"
            );
            return Ok(existing);
        }

        let (status, gateway_ref) = if self.bypass_payments {
            (LedgerStatus::Pending, None)
        } else {
            let receipt = self.gateway.charge(user_id, amount, description).await?;
            (LedgerStatus::Charged, Some(receipt.reference_id))
        };

        let entry = LedgerEntry::charge(
            request_id, user_id, role, kind, amount, description, gateway_ref, status,
        );
        match self.ledger.record(entry).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                error!(
                    request_id = request_id,
                    user_id = user_id,
                    error = %err,
                    "Charge succeeded but ledger write failed: orphaned charge requires manual reconciliation"
                );
                Err(err)
            }
        }
    }

    /// Refund a recorded charge and append the refund entry. Returns
    /// `None` when the gateway reports there is nothing left to refund.
    async fn refund_charge(&self, charge_entry: &LedgerEntry) -> Result<Option<LedgerEntry>> {
        let gateway_ref = if self.bypass_payments || charge_entry.status == LedgerStatus::Pending {
            None
        } else {
            let outcome = self
                .gateway
                .refund(
                    &charge_entry.user_id,
                    charge_entry.gateway_ref.as_deref(),
                    charge_entry.amount,
                )
                .await
                .map_err(RoadcallError::Payment)?;
            match outcome {
                RefundOutcome::Refunded { refund_id } => Some(refund_id),
                RefundOutcome::AlreadyRefunded | RefundOutcome::NothingToRefund => {
                    info!(
                        user_id = %charge_entry.user_id,
                        request_id = %charge_entry.request_id,
                        "Gateway reports nothing left to refund"
                    );
                    return Ok(None);
                }
            }
        };

        let label = match charge_entry.kind {
            FeeKind::Acceptance => "acceptance fee",
            FeeKind::Penalty => "cancellation penalty",
            FeeKind::Refund => "refund",
        };
        let refund = LedgerEntry::refund(
            &charge_entry.request_id,
            &charge_entry.user_id,
            charge_entry.role,
            charge_entry.amount,
            format!("Refund of {} for request {}", label, charge_entry.request_id),
            gateway_ref,
        );
        Ok(Some(self.ledger.record(refund).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::model::{CreateRequestInput, Location, ServiceType, Urgency};
    use crate::payments::gateway::{ChargeReceipt, PaymentError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockGateway {
        charges: AtomicUsize,
        refunds: AtomicUsize,
        decline_user: Option<String>,
        fail_refunds: AtomicBool,
    }

    impl MockGateway {
        fn new() -> Self {
            Self {
                charges: AtomicUsize::new(0),
                refunds: AtomicUsize::new(0),
                decline_user: None,
                fail_refunds: AtomicBool::new(false),
            }
        }

        fn declining(user_id: &str) -> Self {
            Self {
                decline_user: Some(user_id.to_string()),
                ..Self::new()
            }
        }
    }

    #[async_trait::async_trait]
    impl PaymentGateway for MockGateway {
        async fn charge(
            &self,
            user_id: &str,
            _amount: Decimal,
            _description: &str,
        ) -> std::result::Result<ChargeReceipt, PaymentError> {
            if self.decline_user.as_deref() == Some(user_id) {
                return Err(PaymentError::Declined("insufficient funds".into()));
            }
            let n = self.charges.fetch_add(1, Ordering::SeqCst);
            Ok(ChargeReceipt {
                reference_id: format!("ch_{}", n),
            })
        }

        async fn refund(
            &self,
            _user_id: &str,
            _original_ref: Option<&str>,
            _amount: Decimal,
        ) -> std::result::Result<RefundOutcome, PaymentError> {
            if self.fail_refunds.load(Ordering::SeqCst) {
                return Err(PaymentError::Gateway("refund endpoint unavailable".into()));
            }
            let n = self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(RefundOutcome::Refunded {
                refund_id: format!("re_{}", n),
            })
        }
    }

    fn sample_request() -> ServiceRequest {
        ServiceRequest::new(CreateRequestInput {
            trucker_id: "trucker-1".into(),
            trucker_name: "Dale".into(),
            trucker_phone: "+1-555-0100".into(),
            service_type: ServiceType::Repair,
            urgency: Urgency::High,
            description: "Air line burst".into(),
            location: Location {
                address: "I-70 exit 12".into(),
                latitude: None,
                longitude: None,
            },
            estimated_cost: None,
            photos: vec![],
        })
    }

    fn orchestrator(
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
    ) -> PaymentOrchestrator<MemoryStore, MockGateway> {
        PaymentOrchestrator::new(store, gateway, FeeSchedule::default(), false)
    }

    #[tokio::test]
    async fn test_accept_fees_charges_both_parties() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let orch = orchestrator(Arc::clone(&store), Arc::clone(&gateway));
        let request = sample_request();

        let charges = orch.accept_fees(&request, "provider-1").await.unwrap();

        assert_eq!(charges.trucker_entry.user_id, "trucker-1");
        assert_eq!(charges.trucker_entry.kind, FeeKind::Acceptance);
        assert_eq!(charges.provider_entry.user_id, "provider-1");
        assert_eq!(gateway.charges.load(Ordering::SeqCst), 2);

        let entries = orch.ledger().list_for_request(&request.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == LedgerStatus::Charged));
    }

    #[tokio::test]
    async fn test_accept_fees_compensates_on_provider_decline() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::declining("provider-1"));
        let orch = orchestrator(Arc::clone(&store), Arc::clone(&gateway));
        let request = sample_request();

        let err = orch.accept_fees(&request, "provider-1").await.unwrap_err();
        assert!(matches!(
            err,
            RoadcallError::Payment(PaymentError::Declined(_))
        ));

        // Exactly one trucker charge and one trucker refund
        let entries = orch.ledger().list_for_request(&request.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        let charge = entries.iter().find(|e| e.is_charge()).unwrap();
        let refund = entries.iter().find(|e| !e.is_charge()).unwrap();
        assert_eq!(charge.user_id, "trucker-1");
        assert_eq!(refund.user_id, "trucker-1");
        assert_eq!(refund.amount, -charge.amount);
        assert_eq!(gateway.refunds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accept_fees_retry_does_not_double_charge() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let orch = orchestrator(Arc::clone(&store), Arc::clone(&gateway));
        let request = sample_request();

        orch.accept_fees(&request, "provider-1").await.unwrap();
        orch.accept_fees(&request, "provider-1").await.unwrap();

        assert_eq!(gateway.charges.load(Ordering::SeqCst), 2);
        let entries = orch.ledger().list_for_request(&request.id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_fees_penalty_and_refund() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let orch = orchestrator(Arc::clone(&store), Arc::clone(&gateway));
        let request = sample_request();

        orch.accept_fees(&request, "provider-1").await.unwrap();
        let outcome = orch.cancellation_fees(&request, "provider-1").await.unwrap();

        assert!(!outcome.refund_failed);
        assert_eq!(outcome.penalty_entry.kind, FeeKind::Penalty);
        assert_eq!(outcome.penalty_entry.user_id, "provider-1");

        let refund = outcome.refund_entry.expect("trucker refund recorded");
        assert_eq!(refund.user_id, "trucker-1");
        assert_eq!(refund.amount, Decimal::new(-500, 2));
        assert_eq!(refund.status, LedgerStatus::Refunded);
    }

    #[tokio::test]
    async fn test_cancellation_refund_failure_keeps_penalty() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let orch = orchestrator(Arc::clone(&store), Arc::clone(&gateway));
        let request = sample_request();

        orch.accept_fees(&request, "provider-1").await.unwrap();
        gateway.fail_refunds.store(true, Ordering::SeqCst);

        let outcome = orch.cancellation_fees(&request, "provider-1").await.unwrap();

        assert!(outcome.refund_failed);
        assert!(outcome.refund_entry.is_none());
        // Penalty entry persisted despite the failed refund
        let entries = orch.ledger().list_for_request(&request.id).await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.kind == FeeKind::Penalty && e.is_charge()));
    }

    #[tokio::test]
    async fn test_cancellation_without_prior_charge_skips_refund() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let orch = orchestrator(Arc::clone(&store), Arc::clone(&gateway));
        let request = sample_request();

        let outcome = orch.cancellation_fees(&request, "provider-1").await.unwrap();

        assert!(!outcome.refund_failed);
        assert!(outcome.refund_entry.is_none());
        assert_eq!(gateway.refunds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bypass_records_pending_without_gateway_calls() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let orch = PaymentOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            FeeSchedule::default(),
            true,
        );
        let request = sample_request();

        let charges = orch.accept_fees(&request, "provider-1").await.unwrap();

        assert_eq!(gateway.charges.load(Ordering::SeqCst), 0);
        assert_eq!(charges.trucker_entry.status, LedgerStatus::Pending);
        assert_eq!(charges.provider_entry.status, LedgerStatus::Pending);
    }
}
