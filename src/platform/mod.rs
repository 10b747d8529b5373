pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

use crate::chats::ChatSubscription;

/// A text message received from the chat platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// The chat the message was posted in, with its platform metadata
    pub chat: ChatSubscription,
    /// Sender's username, if they have one
    pub username: Option<String>,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

/// Outbound side of the chat platform
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), MessengerError>;
}
