use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::store::{KvStore, StoreError};

/// Namespace under which subscribed chats are persisted
pub const CHATS_PREFIX: &str = "telegram/chats";

/// A chat that receives low-balance alerts.
///
/// Only `id` matters to the bot; the rest is platform metadata kept for operators
/// browsing the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSubscription {
    pub id: i64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed_at: Option<DateTime<Utc>>,
}

impl ChatSubscription {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            kind: None,
            title: None,
            username: None,
            first_name: None,
            subscribed_at: None,
        }
    }
}

/// Persisted set of subscribed chats, one KV entry per chat ID
#[derive(Clone)]
pub struct ChatRegistry {
    store: Arc<dyn KvStore>,
}

impl ChatRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(id: i64) -> String {
        format!("{}/{}", CHATS_PREFIX, id)
    }

    /// All subscribed chats, ordered by chat ID.
    ///
    /// A single undecodable entry fails the whole listing; its key is logged
    /// so the entry can be repaired or deleted.
    pub async fn list(&self) -> Result<Vec<ChatSubscription>, StoreError> {
        let pairs = self.store.list(CHATS_PREFIX).await?;

        let mut chats = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match decode(&pair.key, &pair.value) {
                Ok(chat) => chats.push(chat),
                Err(e) => {
                    error!("Chat entry '{}' cannot be decoded, fix or delete it: {}", pair.key, e);
                    return Err(e);
                }
            }
        }
        chats.sort_by_key(|c| c.id);
        Ok(chats)
    }

    pub async fn get(&self, id: i64) -> Result<Option<ChatSubscription>, StoreError> {
        let key = Self::key(id);
        match self.store.get(&key).await? {
            Some(value) => decode(&key, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Store the chat, replacing any previous entry for the same ID
    pub async fn add(&self, chat: &ChatSubscription) -> Result<(), StoreError> {
        let key = Self::key(chat.id);
        let value = serde_json::to_vec(chat).map_err(|e| StoreError::Malformed {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.put(&key, &value).await
    }

    pub async fn remove(&self, chat: &ChatSubscription) -> Result<(), StoreError> {
        self.store.delete(&Self::key(chat.id)).await
    }

    /// Number of stored entries; not decoded, so malformed entries are counted too
    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.store.list(CHATS_PREFIX).await?.len())
    }
}

fn decode(key: &str, value: &[u8]) -> Result<ChatSubscription, StoreError> {
    serde_json::from_slice(value).map_err(|e| StoreError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
