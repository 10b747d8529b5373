use std::sync::Arc;

use chrono::Utc;
use teloxide::types::BotCommand;
use teloxide::utils::command::{parse_command, BotCommands, ParseError};
use tracing::{debug, error, info, warn};

use crate::billing::{fetch_all, Account, BalanceProvider};
use crate::chats::ChatRegistry;
use crate::platform::{IncomingMessage, Messenger};

pub const ACCESS_RESTRICTED: &str = "Access restricted";
const STORE_UNAVAILABLE: &str = "Storage is unavailable, try again later";

pub fn balance_message(name: &str, balance: f64) -> String {
    format!("{} balance is {:.2} roubles", name, balance)
}

fn subscribed_message(name: &str, threshold: f64) -> String {
    format!("{} subscribed with {:.2} roubles threshold", name, threshold)
}

fn unsubscribed_message(name: &str) -> String {
    format!("{} unsubscribed", name)
}

fn status_message(count: usize) -> String {
    format!("Subscribers: {}", count)
}

/// Commands every bot instance answers, regardless of the configured accounts
#[derive(BotCommands, Debug, Clone, Copy, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum BuiltinCommand {
    #[command(description = "Show all account balances")]
    Balance,
    #[command(description = "Subscribe this chat to low-balance alerts")]
    Start,
    #[command(description = "Unsubscribe this chat")]
    Stop,
    #[command(description = "Show the number of subscribed chats")]
    Status,
    #[command(description = "Show this help")]
    Help,
}

/// True when `name` is one of the built-in commands and so cannot be an account name
pub fn is_reserved_command(name: &str) -> bool {
    BuiltinCommand::bot_commands()
        .iter()
        .any(|cmd| cmd.command.trim_start_matches('/') == name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Builtin(BuiltinCommand),
    /// Balance of a single account, `/{name}`
    Account(String),
}

impl Command {
    /// Parse a message text addressed to `bot_username`.
    ///
    /// Arguments after the command are ignored. Commands carrying another
    /// bot's `@username` and anything that is not a known command are `None`.
    pub fn parse(text: &str, bot_username: &str, accounts: &[Account]) -> Option<Self> {
        let word = text.split_whitespace().next()?;

        match BuiltinCommand::parse(word, bot_username) {
            Ok(cmd) => return Some(Command::Builtin(cmd)),
            Err(ParseError::UnknownCommand(_)) => {}
            Err(_) => return None,
        }

        let (name, _args) = parse_command(word, bot_username)?;
        accounts
            .iter()
            .find(|acc| acc.name == name)
            .map(|acc| Command::Account(acc.name.clone()))
    }

    /// Built-in commands followed by one `/{name}` command per account
    pub fn menu(accounts: &[Account]) -> Vec<BotCommand> {
        let mut menu = BuiltinCommand::bot_commands();
        for acc in accounts {
            menu.push(BotCommand::new(
                format!("/{}", acc.name),
                format!("Show {} balance", acc.name),
            ));
        }
        menu
    }

    /// Telegram accepts 1-32 lowercase letters, digits and underscores
    pub fn is_valid_menu_name(name: &str) -> bool {
        let name = name.trim_start_matches('/');
        !name.is_empty()
            && name.len() <= 32
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

/// Answers chat commands: balance lookups and subscription management
pub struct BalanceBot {
    accounts: Vec<Account>,
    threshold: f64,
    admin: Option<String>,
    username: String,
    chats: ChatRegistry,
    provider: Arc<dyn BalanceProvider>,
    messenger: Arc<dyn Messenger>,
}

impl BalanceBot {
    pub fn new(
        accounts: Vec<Account>,
        threshold: f64,
        admin: Option<String>,
        username: String,
        chats: ChatRegistry,
        provider: Arc<dyn BalanceProvider>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            accounts,
            threshold,
            admin,
            username,
            chats,
            provider,
            messenger,
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    fn is_allowed(&self, username: Option<&str>) -> bool {
        match &self.admin {
            None => true,
            Some(admin) => username.map(|u| u.trim_start_matches('@')) == Some(admin.as_str()),
        }
    }

    /// Handle one inbound message. Failures are logged and, where useful,
    /// reported back to the chat; nothing is propagated.
    pub async fn handle(&self, msg: &IncomingMessage) {
        let chat_id = msg.chat.id;
        let user = msg.username.as_deref().unwrap_or("-");

        let Some(command) = Command::parse(&msg.text, &self.username, &self.accounts) else {
            debug!("[{}] ignoring text in chat {}", user, chat_id);
            return;
        };

        info!("[{}] {:?} in chat {}", user, command, chat_id);

        if !self.is_allowed(msg.username.as_deref()) {
            warn!("[{}] rejected: not the configured admin", user);
            self.reply(chat_id, ACCESS_RESTRICTED).await;
            return;
        }

        match command {
            Command::Account(name) => {
                if let Some(acc) = self.accounts.iter().find(|acc| acc.name == name) {
                    self.send_balances(chat_id, std::slice::from_ref(acc)).await;
                }
            }
            Command::Builtin(cmd) => match cmd {
                BuiltinCommand::Balance => self.send_balances(chat_id, &self.accounts).await,
                BuiltinCommand::Start => self.subscribe(msg).await,
                BuiltinCommand::Stop => self.unsubscribe(msg).await,
                BuiltinCommand::Status => self.status(chat_id).await,
                BuiltinCommand::Help => self.reply(chat_id, &self.help_text()).await,
            },
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            warn!("Failed to send reply to chat {}: {}", chat_id, e);
        }
    }

    async fn send_balances(&self, chat_id: i64, accounts: &[Account]) {
        for (acc, result) in fetch_all(self.provider.as_ref(), accounts).await {
            let text = match result {
                Ok(balance) => balance_message(&acc.name, balance),
                Err(e) => {
                    error!("Failed to fetch {} balance: {}", acc.name, e);
                    format!("{} balance is unavailable", acc.name)
                }
            };
            self.reply(chat_id, &text).await;
        }
    }

    async fn subscribe(&self, msg: &IncomingMessage) {
        let chat_id = msg.chat.id;
        let mut chat = msg.chat.clone();

        // Keep the original subscription time across repeated /start
        chat.subscribed_at = match self.chats.get(chat_id).await {
            Ok(Some(existing)) => existing.subscribed_at.or_else(|| Some(Utc::now())),
            Ok(None) => Some(Utc::now()),
            Err(e) => {
                error!("Failed to look up chat {}: {}", chat_id, e);
                self.reply(chat_id, STORE_UNAVAILABLE).await;
                return;
            }
        };

        if let Err(e) = self.chats.add(&chat).await {
            error!("Failed to subscribe chat {}: {}", chat_id, e);
            self.reply(chat_id, STORE_UNAVAILABLE).await;
            return;
        }

        info!("Chat {} subscribed", chat_id);
        for acc in &self.accounts {
            self.reply(chat_id, &subscribed_message(&acc.name, self.threshold))
                .await;
        }
    }

    async fn unsubscribe(&self, msg: &IncomingMessage) {
        let chat_id = msg.chat.id;

        if let Err(e) = self.chats.remove(&msg.chat).await {
            error!("Failed to unsubscribe chat {}: {}", chat_id, e);
            self.reply(chat_id, STORE_UNAVAILABLE).await;
            return;
        }

        info!("Chat {} unsubscribed", chat_id);
        for acc in &self.accounts {
            self.reply(chat_id, &unsubscribed_message(&acc.name)).await;
        }
    }

    async fn status(&self, chat_id: i64) {
        match self.chats.count().await {
            Ok(count) => self.reply(chat_id, &status_message(count)).await,
            Err(e) => {
                error!("Failed to count subscribers: {}", e);
                self.reply(chat_id, STORE_UNAVAILABLE).await;
            }
        }
    }

    fn help_text(&self) -> String {
        let mut text = String::from("Commands:\n");
        for cmd in Command::menu(&self.accounts) {
            text.push_str(&format!("{} - {}\n", cmd.command, cmd.description));
        }
        text
    }
}
