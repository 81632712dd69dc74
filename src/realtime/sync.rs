//! Realtime sync dispatcher
//!
//! A single task per signed-in user merges the chat and message
//! subscription streams and applies each event to the cache in arrival
//! order. Ordering is only assumed per entity id; redelivered events are
//! absorbed by the cache's id-presence checks.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::Store;
use crate::payments::PaymentGateway;
use crate::state::AppState;
use crate::types::Result;

/// Dispatcher folding bus events into an [`AppState`]
pub struct SyncDispatcher;

impl SyncDispatcher {
    /// Spawn the dispatcher loop for the state's signed-in user
    pub fn spawn<S, G>(state: Arc<AppState<S, G>>) -> JoinHandle<()>
    where
        S: Store + 'static,
        G: PaymentGateway + 'static,
    {
        tokio::spawn(async move {
            let user_id = state.user_id().to_string();
            if let Err(err) = Self::run(state).await {
                error!(user_id = %user_id, error = %err, "Realtime sync dispatcher exited");
            }
        })
    }

    /// Run the dispatcher loop until both streams close
    pub async fn run<S, G>(state: Arc<AppState<S, G>>) -> Result<()>
    where
        S: Store + 'static,
        G: PaymentGateway + 'static,
    {
        let user_id = state.user_id().to_string();
        let chats = state.bus().subscribe_chats(&user_id).await?;
        let messages = state.bus().subscribe_messages(&user_id).await?;
        info!(user_id = %user_id, "Realtime sync subscriptions established");

        let mut events = futures::stream::select(chats, messages);
        while let Some(event) = events.next().await {
            if let Err(err) = state.apply_event(event).await {
                warn!(user_id = %user_id, error = %err, "Failed to apply realtime event");
            }
        }

        info!(user_id = %user_id, "Realtime event streams closed");
        Ok(())
    }
}
