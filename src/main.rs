//! Roadcall - headless core service
//!
//! Wires configuration, storage, the realtime bus and the payment
//! gateway, then runs the sync dispatcher for the signed-in user until
//! shutdown.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roadcall::{
    config::Args,
    db::{MemoryStore, MongoStore, Store},
    payments::HttpPaymentGateway,
    realtime::{MemoryBus, NatsBus, RealtimeBus, SyncDispatcher},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("roadcall={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Roadcall Core");
    info!("  commit {}", env!("GIT_COMMIT_SHORT"));
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("User: {}", args.user_id);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("NATS: {}", args.nats.nats_url);
    info!("Gateway: {} ({}ms timeout)", args.gateway_url, args.gateway_timeout_ms);
    info!(
        "Fees: acceptance {} / penalty {}",
        args.acceptance_fee, args.penalty_fee
    );
    info!("======================================");

    if args.dev_mode {
        warn!("Dev mode: in-memory store and bus, payments bypassed");
        let store = Arc::new(MemoryStore::new());
        let bus: Arc<dyn RealtimeBus> = Arc::new(MemoryBus::new());
        run_core(args, store, bus).await
    } else {
        let store = match MongoStore::connect(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        };
        let bus: Arc<dyn RealtimeBus> =
            match NatsBus::connect(&args.nats, &format!("roadcall-{}", args.node_id)).await {
                Ok(bus) => Arc::new(bus),
                Err(e) => {
                    error!("NATS connection failed: {}", e);
                    std::process::exit(1);
                }
            };
        run_core(args, store, bus).await
    }
}

async fn run_core<S: Store + 'static>(
    args: Args,
    store: Arc<S>,
    bus: Arc<dyn RealtimeBus>,
) -> anyhow::Result<()> {
    let gateway = Arc::new(HttpPaymentGateway::new(args.gateway_config())?);

    let state = Arc::new(AppState::new(
        args.user_id.clone(),
        store,
        gateway,
        bus,
        args.fee_schedule(),
        args.dev_mode,
    ));

    state.hydrate().await?;
    let dispatcher = SyncDispatcher::spawn(Arc::clone(&state));

    info!("Roadcall core ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    dispatcher.abort();

    Ok(())
}
