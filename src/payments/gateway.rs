//! Payment gateway interface
//!
//! Charges and refunds against a user's default payment instrument. The
//! gateway is an external collaborator; this module defines the trait the
//! orchestrator consumes plus the HTTP adapter used in production.
//! "No instrument on file" is distinct from "declined" so callers can
//! route the user to payment setup instead of retrying.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::RoadcallError;

/// Default bounded timeout for gateway calls
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the payment gateway
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("Charge declined: {0}")]
    Declined(String),

    #[error("No payment instrument on file for user {0}")]
    NoInstrument(String),

    #[error("Payment gateway timed out after {0:?}")]
    Timeout(Duration),

    #[error("Payment gateway error: {0}")]
    Gateway(String),
}

/// Successful charge result
#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    /// Gateway reference for the charge, used to target refunds
    pub reference_id: String,
}

/// Successful refund result.
///
/// "Already refunded" and "nothing to refund" are success outcomes, not
/// errors; retried refund sequences must not fail on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { refund_id: String },
    AlreadyRefunded,
    NothingToRefund,
}

/// Payment gateway operations (allows mocking in tests)
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the user's default payment instrument
    async fn charge(
        &self,
        user_id: &str,
        amount: Decimal,
        description: &str,
    ) -> Result<ChargeReceipt, PaymentError>;

    /// Refund a prior charge back to the user. `original_ref` is the
    /// charge reference when known; gateways may also resolve by user
    /// context.
    async fn refund(
        &self,
        user_id: &str,
        original_ref: Option<&str>,
        amount: Decimal,
    ) -> Result<RefundOutcome, PaymentError>;
}

/// Configuration for the HTTP gateway adapter
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the payment service
    pub base_url: String,
    /// Bounded timeout for each call
    pub timeout: Duration,
    /// Optional bearer token
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            timeout: DEFAULT_GATEWAY_TIMEOUT,
            api_key: None,
        }
    }
}

#[derive(Serialize)]
struct ChargeRequest<'a> {
    user_id: &'a str,
    amount: String,
    description: &'a str,
}

#[derive(Deserialize)]
struct ChargeResponse {
    success: bool,
    reference_id: Option<String>,
    error_code: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct RefundRequest<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
    amount: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    success: bool,
    refund_id: Option<String>,
    reason_code: Option<String>,
    error_code: Option<String>,
    error: Option<String>,
}

/// HTTP payment gateway adapter
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, RoadcallError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RoadcallError::Config(format!("Gateway client build failed: {}", e)))?;

        Ok(Self { client, config })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::Timeout(self.config.timeout)
        } else {
            PaymentError::Gateway(err.to_string())
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.post(url);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(
        &self,
        user_id: &str,
        amount: Decimal,
        description: &str,
    ) -> Result<ChargeReceipt, PaymentError> {
        debug!(user_id = user_id, amount = %amount, "Charging payment instrument");

        let response = self
            .request("/v1/charges")
            .json(&ChargeRequest {
                user_id,
                amount: amount.to_string(),
                description,
            })
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(PaymentError::Gateway(format!(
                "Charge returned HTTP {}",
                response.status()
            )));
        }

        let body: ChargeResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if body.success {
            let reference_id = body
                .reference_id
                .ok_or_else(|| PaymentError::Gateway("Charge response missing reference".into()))?;
            return Ok(ChargeReceipt { reference_id });
        }

        let message = body.error.unwrap_or_else(|| "charge failed".to_string());
        match body.error_code.as_deref() {
            Some("no_instrument") => Err(PaymentError::NoInstrument(user_id.to_string())),
            Some("declined") => Err(PaymentError::Declined(message)),
            _ => Err(PaymentError::Gateway(message)),
        }
    }

    async fn refund(
        &self,
        user_id: &str,
        original_ref: Option<&str>,
        amount: Decimal,
    ) -> Result<RefundOutcome, PaymentError> {
        debug!(user_id = user_id, amount = %amount, "Refunding charge");

        let response = self
            .request("/v1/refunds")
            .json(&RefundRequest {
                user_id,
                reference: original_ref,
                amount: amount.to_string(),
            })
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            return Err(PaymentError::Gateway(format!(
                "Refund returned HTTP {}",
                response.status()
            )));
        }

        let body: RefundResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if body.success {
            return match (body.refund_id, body.reason_code.as_deref()) {
                (Some(refund_id), _) => Ok(RefundOutcome::Refunded { refund_id }),
                (None, Some("already_refunded")) => Ok(RefundOutcome::AlreadyRefunded),
                (None, Some("nothing_to_refund")) => Ok(RefundOutcome::NothingToRefund),
                (None, other) => Err(PaymentError::Gateway(format!(
                    "Refund response missing id (reason: {})",
                    other.unwrap_or("none")
                ))),
            };
        }

        let message = body.error.unwrap_or_else(|| "refund failed".to_string());
        match body.error_code.as_deref() {
            Some("no_instrument") => Err(PaymentError::NoInstrument(user_id.to_string())),
            _ => Err(PaymentError::Gateway(message)),
        }
    }
}
