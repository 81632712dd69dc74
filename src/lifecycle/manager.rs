//! Request lifecycle state machine
//!
//! Sole owner of `ServiceRequest.status` transitions. Every transition
//! runs its required payment side effect first and only persists the new
//! status once the outcome is known; persistence uses a status-guarded
//! write so a racing transition loses cleanly and its charges are
//! compensated instead of left dangling.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::db::Store;
use crate::model::{
    CancelledBy, Chat, ChatMessage, CreateRequestInput, RequestStatus, ServiceRequest,
};
use crate::payments::{CancellationCharges, FeeSchedule, PaymentGateway, PaymentOrchestrator};
use crate::types::{Result, RoadcallError};

/// Result of a successful acceptance
#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub request: ServiceRequest,
    pub chat: Chat,
    pub system_message: ChatMessage,
}

/// Result of a non-monetary transition
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub request: ServiceRequest,
    /// Chat patched by the transition (deactivated), when one exists
    pub chat: Option<Chat>,
    pub system_message: Option<ChatMessage>,
}

/// Result of a provider withdrawing an accepted request
#[derive(Debug, Clone)]
pub struct WithdrawOutcome {
    pub request: ServiceRequest,
    pub chat: Option<Chat>,
    pub system_message: ChatMessage,
    pub charges: CancellationCharges,
}

/// State machine over request statuses
pub struct LifecycleManager<S: Store, G: PaymentGateway> {
    store: Arc<S>,
    orchestrator: PaymentOrchestrator<S, G>,
}

impl<S: Store, G: PaymentGateway> Clone for LifecycleManager<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            orchestrator: self.orchestrator.clone(),
        }
    }
}

impl<S: Store + 'static, G: PaymentGateway + 'static> LifecycleManager<S, G> {
    pub fn new(store: Arc<S>, gateway: Arc<G>, fees: FeeSchedule, bypass_payments: bool) -> Self {
        let orchestrator =
            PaymentOrchestrator::new(Arc::clone(&store), gateway, fees, bypass_payments);
        Self {
            store,
            orchestrator,
        }
    }

    /// Create a new pending request. No charge at creation time.
    pub async fn create_request(&self, input: CreateRequestInput) -> Result<ServiceRequest> {
        if input.trucker_id.trim().is_empty() || input.trucker_name.trim().is_empty() {
            return Err(RoadcallError::Validation(
                "requester identity is required".into(),
            ));
        }
        if input.description.trim().is_empty() {
            return Err(RoadcallError::Validation("description is required".into()));
        }
        if input.location.address.trim().is_empty() {
            return Err(RoadcallError::Validation("location address is required".into()));
        }

        let request = ServiceRequest::new(input);
        self.store.insert_request(&request).await?;
        info!(
            request_id = %request.id,
            trucker_id = %request.trucker_id,
            "Service request created"
        );
        Ok(request)
    }

    /// pending -> accepted. Charges both parties, assigns the provider,
    /// opens the chat.
    pub async fn accept(
        &self,
        request_id: &str,
        provider_id: &str,
        provider_name: &str,
    ) -> Result<AcceptOutcome> {
        let request = self.get(request_id).await?;
        if request.status != RequestStatus::Pending || request.provider_id.is_some() {
            return Err(RoadcallError::Validation(format!(
                "request {} cannot be accepted from status {}",
                request.id, request.status
            )));
        }
        if request.trucker_id == provider_id {
            return Err(RoadcallError::Validation(
                "requester cannot accept their own request".into(),
            ));
        }

        let charges = self.orchestrator.accept_fees(&request, provider_id).await?;

        let mut updated = request;
        updated.status = RequestStatus::Accepted;
        updated.provider_id = Some(provider_id.to_string());
        updated.provider_name = Some(provider_name.to_string());
        updated.accepted_at = Some(Utc::now());

        if !self
            .persist_guarded(&updated, RequestStatus::Pending, true)
            .await?
        {
            warn!(
                request_id = request_id,
                provider_id = provider_id,
                "Lost acceptance race, compensating charges"
            );
            self.orchestrator.release_accept_charges(&charges).await;
            return Err(RoadcallError::Validation(format!(
                "request {} is no longer pending",
                request_id
            )));
        }

        let chat = Chat::for_accepted_request(&updated);
        if let Err(err) = self.store.insert_chat(&chat).await {
            warn!(chat_id = %chat.id, error = %err, "Chat creation write failed after acceptance");
        }

        let system_message = ChatMessage::system(
            request_id,
            format!("{} has accepted your request", provider_name),
        );

        info!(request_id = request_id, provider_id = provider_id, "Request accepted");
        Ok(AcceptOutcome {
            request: updated,
            chat,
            system_message,
        })
    }

    /// accepted -> in_progress. Assigned provider only, no monetary side
    /// effect.
    pub async fn start_work(&self, request_id: &str, provider_id: &str) -> Result<TransitionOutcome> {
        let request = self.get(request_id).await?;
        if request.status != RequestStatus::Accepted {
            return Err(RoadcallError::Validation(format!(
                "request {} cannot start from status {}",
                request.id, request.status
            )));
        }
        if !request.is_assigned_to(provider_id) {
            return Err(RoadcallError::Validation(
                "only the assigned provider can start work".into(),
            ));
        }

        let provider_name = request.provider_name.clone().unwrap_or_default();
        let mut updated = request;
        updated.status = RequestStatus::InProgress;

        if !self
            .persist_guarded(&updated, RequestStatus::Accepted, false)
            .await?
        {
            return Err(RoadcallError::Validation(format!(
                "request {} is no longer accepted",
                request_id
            )));
        }

        info!(request_id = request_id, "Work started");
        Ok(TransitionOutcome {
            request: updated,
            chat: None,
            system_message: Some(ChatMessage::system(
                request_id,
                format!("{} has started working on your request", provider_name),
            )),
        })
    }

    /// in_progress -> completed. Assigned provider only.
    pub async fn complete(&self, request_id: &str, provider_id: &str) -> Result<TransitionOutcome> {
        let request = self.get(request_id).await?;
        if request.status != RequestStatus::InProgress {
            return Err(RoadcallError::Validation(format!(
                "request {} cannot complete from status {}",
                request.id, request.status
            )));
        }
        if !request.is_assigned_to(provider_id) {
            return Err(RoadcallError::Validation(
                "only the assigned provider can complete the job".into(),
            ));
        }

        let provider_name = request.provider_name.clone().unwrap_or_default();
        let mut updated = request;
        updated.status = RequestStatus::Completed;
        updated.completed_at = Some(Utc::now());

        if !self
            .persist_guarded(&updated, RequestStatus::InProgress, false)
            .await?
        {
            return Err(RoadcallError::Validation(format!(
                "request {} is no longer in progress",
                request_id
            )));
        }

        let chat = self.deactivate_chat(request_id).await;
        info!(request_id = request_id, "Request completed");
        Ok(TransitionOutcome {
            request: updated,
            chat,
            system_message: Some(ChatMessage::system(
                request_id,
                format!("{} has completed the job", provider_name),
            )),
        })
    }

    /// accepted -> pending. The assigned provider backs out: penalty plus
    /// trucker refund, then the request is reopened for other providers.
    pub async fn withdraw_acceptance(
        &self,
        request_id: &str,
        provider_id: &str,
        reason: &str,
    ) -> Result<WithdrawOutcome> {
        let request = self.get(request_id).await?;
        if request.status != RequestStatus::Accepted {
            return Err(RoadcallError::Validation(format!(
                "request {} cannot be withdrawn from status {}",
                request.id, request.status
            )));
        }
        if !request.is_assigned_to(provider_id) {
            return Err(RoadcallError::Validation(
                "only the assigned provider can withdraw an acceptance".into(),
            ));
        }

        let charges = self
            .orchestrator
            .cancellation_fees(&request, provider_id)
            .await?;

        let provider_name = request.provider_name.clone().unwrap_or_default();
        let mut updated = request;
        updated.status = RequestStatus::Pending;
        updated.provider_id = None;
        updated.provider_name = None;
        updated.accepted_at = None;
        updated.cancellation_reason = Some(reason.to_string());
        updated.cancelled_by = Some(CancelledBy::Provider);

        if !self
            .persist_guarded(&updated, RequestStatus::Accepted, true)
            .await?
        {
            warn!(
                request_id = request_id,
                provider_id = provider_id,
                "Lost cancellation race, releasing penalty"
            );
            self.orchestrator.release_penalty(&charges.penalty_entry).await;
            return Err(RoadcallError::Validation(format!(
                "request {} is no longer accepted",
                request_id
            )));
        }

        let chat = self.deactivate_chat(request_id).await;
        let system_message = ChatMessage::system(
            request_id,
            format!("{} cancelled the request: {}", provider_name, reason),
        );

        info!(
            request_id = request_id,
            provider_id = provider_id,
            refund_failed = charges.refund_failed,
            "Acceptance withdrawn, request reopened"
        );
        Ok(WithdrawOutcome {
            request: updated,
            chat,
            system_message,
            charges,
        })
    }

    /// pending|accepted|in_progress -> cancelled. Terminal, either party,
    /// no monetary side effect.
    pub async fn cancel(
        &self,
        request_id: &str,
        caller_id: &str,
        reason: &str,
    ) -> Result<TransitionOutcome> {
        let request = self.get(request_id).await?;
        let cancelled_by = if request.trucker_id == caller_id {
            CancelledBy::Trucker
        } else if request.is_assigned_to(caller_id) {
            CancelledBy::Provider
        } else {
            return Err(RoadcallError::Validation(
                "only the requester or the assigned provider can cancel".into(),
            ));
        };
        if request.status.is_terminal() {
            return Err(RoadcallError::Validation(format!(
                "request {} is already {}",
                request.id, request.status
            )));
        }

        let expected = request.status;
        let mut updated = request;
        updated.status = RequestStatus::Cancelled;
        updated.cancelled_at = Some(Utc::now());
        updated.cancellation_reason = Some(reason.to_string());
        updated.cancelled_by = Some(cancelled_by);

        if !self.persist_guarded(&updated, expected, false).await? {
            return Err(RoadcallError::Validation(format!(
                "request {} changed status concurrently",
                request_id
            )));
        }

        let chat = self.deactivate_chat(request_id).await;
        let system_message = chat
            .as_ref()
            .map(|_| ChatMessage::system(request_id, format!("Request cancelled: {}", reason)));

        info!(request_id = request_id, cancelled_by = ?cancelled_by, "Request cancelled");
        Ok(TransitionOutcome {
            request: updated,
            chat,
            system_message,
        })
    }

    async fn get(&self, request_id: &str) -> Result<ServiceRequest> {
        self.store
            .get_request(request_id)
            .await?
            .ok_or_else(|| RoadcallError::NotFound(format!("request {}", request_id)))
    }

    /// Status-guarded persist with one retry. `charged` marks transitions
    /// whose charges would be orphaned by a lost write.
    async fn persist_guarded(
        &self,
        request: &ServiceRequest,
        expected: RequestStatus,
        charged: bool,
    ) -> Result<bool> {
        match self.store.update_request_if_status(request, expected).await {
            Ok(applied) => Ok(applied),
            Err(first) => {
                warn!(
                    request_id = %request.id,
                    error = %first,
                    "Request persist failed, retrying once"
                );
                match self.store.update_request_if_status(request, expected).await {
                    Ok(applied) => Ok(applied),
                    Err(err) => {
                        if charged {
                            error!(
                                request_id = %request.id,
                                error = %err,
                                "Persist failed after confirmed charges: orphaned charges require manual reconciliation"
                            );
                        } else {
                            error!(request_id = %request.id, error = %err, "Persist failed after retry");
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    async fn deactivate_chat(&self, request_id: &str) -> Option<Chat> {
        match self.store.get_chat_for_request(request_id).await {
            Ok(Some(mut chat)) => {
                chat.is_active = false;
                if let Err(err) = self.store.update_chat(&chat).await {
                    warn!(chat_id = %chat.id, error = %err, "Chat deactivation write failed");
                }
                Some(chat)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(
                    request_id = request_id,
                    error = %err,
                    "Chat lookup failed during transition"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::model::{FeeKind, Location, ServiceType, Urgency};
    use crate::payments::{ChargeReceipt, PaymentError, RefundOutcome};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockGateway {
        charges: AtomicUsize,
        refunds: AtomicUsize,
        decline_user: Option<String>,
    }

    impl MockGateway {
        fn new() -> Self {
            Self {
                charges: AtomicUsize::new(0),
                refunds: AtomicUsize::new(0),
                decline_user: None,
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
                return Err(PaymentError::Declined("card declined".into()));
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
            let n = self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(RefundOutcome::Refunded {
                refund_id: format!("re_{}", n),
            })
        }
    }

    fn manager(
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
    ) -> LifecycleManager<MemoryStore, MockGateway> {
        LifecycleManager::new(store, gateway, FeeSchedule::default(), false)
    }

    fn create_input() -> CreateRequestInput {
        CreateRequestInput {
            trucker_id: "trucker-1".into(),
            trucker_name: "Dale".into(),
            trucker_phone: "+1-555-0100".into(),
            service_type: ServiceType::Mechanic,
            urgency: Urgency::High,
            description: "Engine overheating".into(),
            location: Location {
                address: "I-40 exit 52".into(),
                latitude: Some(35.1),
                longitude: Some(-106.6),
            },
            estimated_cost: None,
            photos: vec![],
        }
    }

    #[tokio::test]
    async fn test_accept_charges_both_and_opens_chat() {
        // Scenario: trucker creates, provider accepts
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        let outcome = mgr.accept(&request.id, "provider-1", "Okafor").await.unwrap();

        assert_eq!(outcome.request.status, RequestStatus::Accepted);
        assert_eq!(outcome.request.provider_id.as_deref(), Some("provider-1"));
        assert!(outcome.request.accepted_at.is_some());
        assert_eq!(gateway.charges.load(Ordering::SeqCst), 2);

        assert!(outcome.chat.is_active);
        assert_eq!(outcome.chat.request_id, request.id);
        assert_eq!(
            outcome.system_message.content,
            "Okafor has accepted your request"
        );
        assert!(outcome.system_message.is_system());

        // Persisted status matches
        let stored = store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn test_second_accept_fails_without_second_charge() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        mgr.accept(&request.id, "provider-1", "Okafor").await.unwrap();

        let err = mgr
            .accept(&request.id, "provider-2", "Marta")
            .await
            .unwrap_err();
        assert!(matches!(err, RoadcallError::Validation(_)));
        assert_eq!(gateway.charges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_decline_leaves_request_pending() {
        // Scenario: provider charge declined during accept
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::declining("provider-1"));
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        let err = mgr
            .accept(&request.id, "provider-1", "Okafor")
            .await
            .unwrap_err();
        assert!(matches!(err, RoadcallError::Payment(_)));

        let stored = store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(stored.provider_id.is_none());

        // Trucker charge was refunded: one +5 and one -5 entry
        let entries = store.list_ledger_for_request(&request.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        let total: Decimal = entries.iter().map(|e| e.amount).sum();
        assert_eq!(total, Decimal::ZERO);
        assert!(entries.iter().all(|e| e.user_id == "trucker-1"));
    }

    #[tokio::test]
    async fn test_withdraw_resets_request_and_charges_penalty() {
        // Scenario: accepted request, provider cancels with a reason
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        mgr.accept(&request.id, "provider-1", "Okafor").await.unwrap();

        let outcome = mgr
            .withdraw_acceptance(&request.id, "provider-1", "unavailable")
            .await
            .unwrap();

        assert_eq!(outcome.request.status, RequestStatus::Pending);
        assert!(outcome.request.provider_id.is_none());
        assert!(outcome.request.provider_name.is_none());
        assert!(outcome.request.accepted_at.is_none());
        assert_eq!(
            outcome.request.cancellation_reason.as_deref(),
            Some("unavailable")
        );
        assert_eq!(outcome.request.cancelled_by, Some(CancelledBy::Provider));

        // Exactly one penalty against the provider, one refund to the trucker
        let entries = store.list_ledger_for_request(&request.id).await.unwrap();
        let penalties: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == FeeKind::Penalty && e.user_id == "provider-1")
            .collect();
        assert_eq!(penalties.len(), 1);
        let refund = entries
            .iter()
            .find(|e| e.kind == FeeKind::Refund && e.user_id == "trucker-1")
            .unwrap();
        assert_eq!(refund.amount, Decimal::new(-500, 2));

        // Chat is deactivated, request open for another provider
        assert!(!outcome.chat.unwrap().is_active);
        mgr.accept(&request.id, "provider-2", "Marta").await.unwrap();
    }

    #[tokio::test]
    async fn test_withdraw_requires_assigned_provider() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        mgr.accept(&request.id, "provider-1", "Okafor").await.unwrap();

        let err = mgr
            .withdraw_acceptance(&request.id, "provider-2", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, RoadcallError::Validation(_)));
    }

    #[tokio::test]
    async fn test_complete_flow_sets_timestamps_and_closes_chat() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        mgr.accept(&request.id, "provider-1", "Okafor").await.unwrap();

        let started = mgr.start_work(&request.id, "provider-1").await.unwrap();
        assert_eq!(started.request.status, RequestStatus::InProgress);

        let done = mgr.complete(&request.id, "provider-1").await.unwrap();
        assert_eq!(done.request.status, RequestStatus::Completed);
        assert!(done.request.completed_at.is_some());
        assert!(!done.chat.unwrap().is_active);
        assert!(done.system_message.unwrap().content.contains("completed"));
    }

    #[tokio::test]
    async fn test_start_work_rejects_other_provider() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        mgr.accept(&request.id, "provider-1", "Okafor").await.unwrap();

        let err = mgr.start_work(&request.id, "provider-2").await.unwrap_err();
        assert!(matches!(err, RoadcallError::Validation(_)));
    }

    #[tokio::test]
    async fn test_terminal_states_admit_no_transitions() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        mgr.cancel(&request.id, "trucker-1", "found help").await.unwrap();

        let accept_err = mgr
            .accept(&request.id, "provider-1", "Okafor")
            .await
            .unwrap_err();
        assert!(matches!(accept_err, RoadcallError::Validation(_)));

        let cancel_err = mgr
            .cancel(&request.id, "trucker-1", "again")
            .await
            .unwrap_err();
        assert!(matches!(cancel_err, RoadcallError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_rejects_unrelated_user() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        let err = mgr
            .cancel(&request.id, "somebody-else", "reason")
            .await
            .unwrap_err();
        assert!(matches!(err, RoadcallError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_is_non_financial() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(Arc::clone(&store), Arc::clone(&gateway));

        let request = mgr.create_request(create_input()).await.unwrap();
        mgr.accept(&request.id, "provider-1", "Okafor").await.unwrap();
        let before = store.list_ledger_for_request(&request.id).await.unwrap().len();

        mgr.cancel(&request.id, "trucker-1", "weather").await.unwrap();

        let after = store.list_ledger_for_request(&request.id).await.unwrap().len();
        assert_eq!(before, after);
        assert_eq!(gateway.refunds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_request_validates_fields() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let mgr = manager(store, gateway);

        let mut input = create_input();
        input.description = "   ".into();
        let err = mgr.create_request(input).await.unwrap_err();
        assert!(matches!(err, RoadcallError::Validation(_)));
    }
}
