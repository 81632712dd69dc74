//! MongoDB-backed store
//!
//! Connection handling and collection access for the persistent store.
//! Documents are the domain types themselves; indexes are applied at
//! startup.

use bson::doc;
use futures_util::StreamExt;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use tracing::{error, info};

use crate::db::store::Store;
use crate::model::{
    Chat, ChatMessage, LedgerEntry, RequestStatus, ServiceRequest, CHAT_COLLECTION,
    LEDGER_COLLECTION, MESSAGE_COLLECTION, REQUEST_COLLECTION,
};
use crate::types::{Result, RoadcallError};
use async_trait::async_trait;

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| RoadcallError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| RoadcallError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.client.database(&self.db_name).collection(name)
    }
}

/// MongoDB-backed implementation of [`Store`]
#[derive(Clone)]
pub struct MongoStore {
    requests: Collection<ServiceRequest>,
    ledger: Collection<LedgerEntry>,
    chats: Collection<Chat>,
    messages: Collection<ChatMessage>,
}

impl MongoStore {
    /// Connect and apply indexes
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = MongoClient::new(uri, db_name).await?;
        let store = Self {
            requests: client.collection(REQUEST_COLLECTION),
            ledger: client.collection(LEDGER_COLLECTION),
            chats: client.collection(CHAT_COLLECTION),
            messages: client.collection(MESSAGE_COLLECTION),
        };
        store.apply_indexes().await?;
        Ok(store)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let unique = |name: &str| {
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name(name.to_string())
                    .build(),
            )
        };
        let named = |name: &str| Some(IndexOptions::builder().name(name.to_string()).build());

        self.create_indexes(
            &self.requests,
            vec![
                (doc! { "id": 1 }, unique("request_id_unique")),
                (doc! { "trucker_id": 1 }, named("request_trucker_index")),
                (doc! { "provider_id": 1 }, named("request_provider_index")),
                (doc! { "status": 1 }, named("request_status_index")),
            ],
        )
        .await?;

        self.create_indexes(
            &self.ledger,
            vec![
                (doc! { "id": 1 }, unique("ledger_id_unique")),
                (doc! { "user_id": 1 }, named("ledger_user_index")),
                (doc! { "request_id": 1 }, named("ledger_request_index")),
            ],
        )
        .await?;

        self.create_indexes(
            &self.chats,
            vec![
                (doc! { "id": 1 }, unique("chat_id_unique")),
                (doc! { "request_id": 1 }, named("chat_request_index")),
                (doc! { "trucker_id": 1 }, named("chat_trucker_index")),
                (doc! { "provider_id": 1 }, named("chat_provider_index")),
            ],
        )
        .await?;

        self.create_indexes(
            &self.messages,
            vec![
                (doc! { "id": 1 }, unique("message_id_unique")),
                (doc! { "request_id": 1 }, named("message_request_index")),
            ],
        )
        .await
    }

    async fn create_indexes<T: Send + Sync>(
        &self,
        collection: &Collection<T>,
        indices: Vec<(bson::Document, Option<IndexOptions>)>,
    ) -> Result<()> {
        let models: Vec<IndexModel> = indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        collection
            .create_indexes(models)
            .await
            .map_err(|e| RoadcallError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    async fn collect_cursor<T>(cursor: mongodb::Cursor<T>) -> Vec<T>
    where
        T: serde::de::DeserializeOwned + Unpin + Send + Sync,
    {
        cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn insert_request(&self, request: &ServiceRequest) -> Result<()> {
        self.requests
            .insert_one(request)
            .await
            .map_err(|e| RoadcallError::Database(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<ServiceRequest>> {
        self.requests
            .find_one(doc! { "id": id })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))
    }

    async fn update_request(&self, request: &ServiceRequest) -> Result<()> {
        self.requests
            .replace_one(doc! { "id": &request.id }, request)
            .await
            .map_err(|e| RoadcallError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    async fn update_request_if_status(
        &self,
        request: &ServiceRequest,
        expected: RequestStatus,
    ) -> Result<bool> {
        let expected = bson::to_bson(&expected)
            .map_err(|e| RoadcallError::Internal(format!("Status encode failed: {}", e)))?;
        let result = self
            .requests
            .replace_one(doc! { "id": &request.id, "status": expected }, request)
            .await
            .map_err(|e| RoadcallError::Database(format!("Guarded update failed: {}", e)))?;
        Ok(result.matched_count > 0)
    }

    async fn list_requests_for_user(&self, user_id: &str) -> Result<Vec<ServiceRequest>> {
        let cursor = self
            .requests
            .find(doc! { "$or": [ { "trucker_id": user_id }, { "provider_id": user_id } ] })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))?;
        let mut requests = Self::collect_cursor(cursor).await;
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn list_open_requests(&self) -> Result<Vec<ServiceRequest>> {
        let status = bson::to_bson(&RequestStatus::Pending)
            .map_err(|e| RoadcallError::Internal(format!("Status encode failed: {}", e)))?;
        let cursor = self
            .requests
            .find(doc! { "status": status, "provider_id": null })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))?;
        let mut requests = Self::collect_cursor(cursor).await;
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.ledger
            .insert_one(entry)
            .await
            .map_err(|e| RoadcallError::Database(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    async fn get_ledger_entry(&self, id: &str) -> Result<Option<LedgerEntry>> {
        self.ledger
            .find_one(doc! { "id": id })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))
    }

    async fn list_ledger_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        let cursor = self
            .ledger
            .find(doc! { "user_id": user_id })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))?;
        let mut entries = Self::collect_cursor(cursor).await;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn list_ledger_for_request(&self, request_id: &str) -> Result<Vec<LedgerEntry>> {
        let cursor = self
            .ledger
            .find(doc! { "request_id": request_id })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))?;
        let mut entries = Self::collect_cursor(cursor).await;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn insert_chat(&self, chat: &Chat) -> Result<()> {
        self.chats
            .insert_one(chat)
            .await
            .map_err(|e| RoadcallError::Database(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    async fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        self.chats
            .find_one(doc! { "id": id })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))
    }

    async fn get_chat_for_request(&self, request_id: &str) -> Result<Option<Chat>> {
        self.chats
            .find_one(doc! { "request_id": request_id })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))
    }

    async fn update_chat(&self, chat: &Chat) -> Result<()> {
        self.chats
            .replace_one(doc! { "id": &chat.id }, chat)
            .await
            .map_err(|e| RoadcallError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }

    async fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>> {
        let cursor = self
            .chats
            .find(doc! { "$or": [ { "trucker_id": user_id }, { "provider_id": user_id } ] })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))?;
        let mut chats = Self::collect_cursor(cursor).await;
        chats.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(chats)
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages
            .insert_one(message)
            .await
            .map_err(|e| RoadcallError::Database(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    async fn list_messages_for_request(&self, request_id: &str) -> Result<Vec<ChatMessage>> {
        let cursor = self
            .messages
            .find(doc! { "request_id": request_id })
            .await
            .map_err(|e| RoadcallError::Database(format!("Find failed: {}", e)))?;
        let mut messages = Self::collect_cursor(cursor).await;
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        Ok(messages)
    }

    async fn set_message_read(&self, id: &str, is_read: bool) -> Result<()> {
        self.messages
            .update_one(doc! { "id": id }, doc! { "$set": { "is_read": is_read } })
            .await
            .map_err(|e| RoadcallError::Database(format!("Update failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running MongoDB instance
    // See docker-compose.dev.yml for local testing
}
