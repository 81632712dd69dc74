//! Payment orchestration for Roadcall
//!
//! Gateway interface, compensating-transaction saga, and the fee
//! orchestrator that ties them to the ledger.

mod gateway;
mod orchestrator;
mod saga;

pub use gateway::{
    ChargeReceipt, GatewayConfig, HttpPaymentGateway, PaymentError, PaymentGateway, RefundOutcome,
    DEFAULT_GATEWAY_TIMEOUT,
};
pub use orchestrator::{AcceptCharges, CancellationCharges, FeeSchedule, PaymentOrchestrator};
pub use saga::{CompensationFailure, Saga};
