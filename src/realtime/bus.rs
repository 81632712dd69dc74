//! Realtime bus adapters
//!
//! NATS carries sync events in production; the in-memory bus backs tests
//! and dev mode. Both deliver at-least-once with per-entity ordering,
//! which is all the merge layer requires.

use std::pin::Pin;
use std::time::Duration;

use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::NatsArgs;
use crate::realtime::events::{chat_subject, message_subject, EntityKind, RealtimeEvent};
use crate::types::{Result, RoadcallError};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Stream of decoded realtime events
pub type EventStream = Pin<Box<dyn Stream<Item = RealtimeEvent> + Send>>;

/// Realtime bus scoped to per-user subjects (allows mocking in tests)
#[async_trait]
pub trait RealtimeBus: Send + Sync {
    /// Chat-record creation/update events for a user
    async fn subscribe_chats(&self, user_id: &str) -> Result<EventStream>;

    /// Message insertion/update events across all the user's chats
    async fn subscribe_messages(&self, user_id: &str) -> Result<EventStream>;

    /// Publish an event to a user's chat or message subject, routed by
    /// the event's entity kind
    async fn publish(&self, user_id: &str, event: &RealtimeEvent) -> Result<()>;
}

/// NATS-backed realtime bus
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to NATS
    pub async fn connect(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // Fail fast if NATS isn't available; reconnection still works
        // after the initial successful connection
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| RoadcallError::Bus(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);
        Ok(Self { client })
    }

    async fn subscribe_subject(&self, subject: String) -> Result<EventStream> {
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| RoadcallError::Bus(format!("Subscribe failed: {}", e)))?;

        let stream = subscriber.filter_map(move |message| {
            let decoded = RealtimeEvent::from_bytes(&message.payload);
            let subject = subject.clone();
            async move {
                match decoded {
                    Ok(event) => Some(event),
                    Err(err) => {
                        warn!(subject = %subject, error = %err, "Dropping undecodable realtime event");
                        None
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl RealtimeBus for NatsBus {
    async fn subscribe_chats(&self, user_id: &str) -> Result<EventStream> {
        self.subscribe_subject(chat_subject(user_id)).await
    }

    async fn subscribe_messages(&self, user_id: &str) -> Result<EventStream> {
        self.subscribe_subject(message_subject(user_id)).await
    }

    async fn publish(&self, user_id: &str, event: &RealtimeEvent) -> Result<()> {
        let subject = match event.entity() {
            EntityKind::Chat => chat_subject(user_id),
            EntityKind::Message => message_subject(user_id),
        };
        let payload = Bytes::from(event.to_bytes()?);
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| RoadcallError::Bus(format!("Publish failed: {}", e)))
    }
}

/// In-memory bus for tests and dev mode
pub struct MemoryBus {
    chats: broadcast::Sender<(String, RealtimeEvent)>,
    messages: broadcast::Sender<(String, RealtimeEvent)>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (chats, _) = broadcast::channel(256);
        let (messages, _) = broadcast::channel(256);
        Self { chats, messages }
    }

    fn stream_for(
        receiver: broadcast::Receiver<(String, RealtimeEvent)>,
        user_id: String,
    ) -> EventStream {
        Box::pin(futures::stream::unfold(receiver, move |mut receiver| {
            let user_id = user_id.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok((target, event)) if target == user_id => return Some((event, receiver)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Realtime subscriber lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        }))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeBus for MemoryBus {
    async fn subscribe_chats(&self, user_id: &str) -> Result<EventStream> {
        Ok(Self::stream_for(self.chats.subscribe(), user_id.to_string()))
    }

    async fn subscribe_messages(&self, user_id: &str) -> Result<EventStream> {
        Ok(Self::stream_for(
            self.messages.subscribe(),
            user_id.to_string(),
        ))
    }

    async fn publish(&self, user_id: &str, event: &RealtimeEvent) -> Result<()> {
        let sender = match event.entity() {
            EntityKind::Chat => &self.chats,
            EntityKind::Message => &self.messages,
        };
        // No subscribers is fine; delivery is best effort until one attaches
        let _ = sender.send((user_id.to_string(), event.clone()));
        Ok(())
    }
}
