//! Configuration for Roadcall
//!
//! CLI arguments and environment variable handling using clap. Fee
//! values, gateway endpoints and timeouts are configuration, never
//! literals in business logic.

use clap::Parser;
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

use crate::payments::{FeeSchedule, GatewayConfig};

/// Roadcall - request lifecycle and payment reconciliation core
#[derive(Parser, Debug, Clone)]
#[command(name = "roadcall")]
#[command(about = "Headless core for the Roadcall trucker-assistance marketplace")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Signed-in user this instance caches and syncs for
    #[arg(long, env = "ROADCALL_USER_ID", default_value = "")]
    pub user_id: String,

    /// Enable development mode (in-memory store and bus, payment bypass)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "roadcall")]
    pub mongodb_db: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Payment gateway base URL
    #[arg(long, env = "GATEWAY_URL", default_value = "http://localhost:8090")]
    pub gateway_url: String,

    /// Payment gateway API key (optional)
    #[arg(long, env = "GATEWAY_API_KEY")]
    pub gateway_api_key: Option<String>,

    /// Payment gateway timeout in milliseconds
    #[arg(long, env = "GATEWAY_TIMEOUT_MS", default_value = "10000")]
    pub gateway_timeout_ms: u64,

    /// Flat fee charged to both parties on acceptance
    #[arg(long, env = "ACCEPTANCE_FEE", default_value = "5.00")]
    pub acceptance_fee: Decimal,

    /// Flat penalty charged to a provider cancelling an accepted request
    #[arg(long, env = "PENALTY_FEE", default_value = "5.00")]
    pub penalty_fee: Decimal,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Fee schedule from configured values
    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule {
            acceptance_fee: self.acceptance_fee,
            penalty_fee: self.penalty_fee,
        }
    }

    /// Gateway adapter configuration
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_url.clone(),
            timeout: Duration::from_millis(self.gateway_timeout_ms),
            api_key: self.gateway_api_key.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("ROADCALL_USER_ID is required".to_string());
        }

        if self.acceptance_fee <= Decimal::ZERO || self.penalty_fee <= Decimal::ZERO {
            return Err("Fees must be positive amounts".to_string());
        }

        if !self.dev_mode && self.gateway_url.trim().is_empty() {
            return Err("GATEWAY_URL is required in production mode".to_string());
        }

        Ok(())
    }
}
