//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::billing::{BalanceProvider, ProviderError};
use crate::chats::{ChatRegistry, ChatSubscription};
use crate::platform::{IncomingMessage, Messenger, MessengerError};
use crate::store::memory::MemoryStore;
use crate::store::{KvPair, KvStore, StoreError};

/// Records every message instead of sending it
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(i64, String)>>,
    blocked: HashSet<i64>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to these chats fail as if the user blocked the bot
    pub fn blocking(chat_ids: &[i64]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            blocked: chat_ids.iter().copied().collect(),
        }
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), MessengerError> {
        if self.blocked.contains(&chat_id) {
            return Err(teloxide::RequestError::Api(teloxide::ApiError::BotBlocked).into());
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// Balances keyed by account token; unknown tokens and failures are errors
#[derive(Default)]
pub struct StaticProvider {
    balances: HashMap<String, Option<f64>>,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, token: &str, balance: f64) -> Self {
        self.balances.insert(token.to_string(), Some(balance));
        self
    }

    pub fn with_failure(mut self, token: &str) -> Self {
        self.balances.insert(token.to_string(), None);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceProvider for StaticProvider {
    async fn balance(&self, token: &str) -> Result<f64, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.balances.get(token) {
            Some(Some(balance)) => Ok(*balance),
            _ => Err(ProviderError::Api {
                status: reqwest::StatusCode::UNAUTHORIZED,
                body: r#"{"error":"invalid token"}"#.to_string(),
            }),
        }
    }
}

/// A backend that is always down
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

pub fn memory_registry() -> ChatRegistry {
    ChatRegistry::new(Arc::new(MemoryStore::new()))
}

pub fn message(chat_id: i64, username: Option<&str>, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat: ChatSubscription::new(chat_id),
        username: username.map(str::to_string),
        text: text.to_string(),
    }
}
