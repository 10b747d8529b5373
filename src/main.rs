mod billing;
mod bot;
mod chats;
mod cli;
mod config;
mod platform;
mod scheduler;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::billing::vscale::VscaleClient;
use crate::billing::BalanceProvider;
use crate::bot::BalanceBot;
use crate::chats::ChatRegistry;
use crate::cli::Cli;
use crate::config::BotConfig;
use crate::platform::telegram::{self, TelegramMessenger};
use crate::platform::Messenger;
use crate::scheduler::alerts::AlertScheduler;

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "info,vscalebot=debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BotConfig::load(cli).context("Invalid configuration")?;

    init_logging(config.verbose);

    info!("Configuration loaded successfully");
    info!("  Accounts: {:?}", config.account_names());
    info!("  Threshold: {:.2} roubles", config.threshold);
    info!("  Interval: {:?}", config.interval);
    info!("  Store: {}", config.store.kind);
    if let Some(admin) = &config.admin {
        info!("  Admin: {}", admin);
    }

    let chats = ChatRegistry::new(store::open(&config.store)?);
    let provider: Arc<dyn BalanceProvider> = Arc::new(
        VscaleClient::new(&config.vscale_url).context("Failed to create Vscale client")?,
    );

    let tg = telegram::build_bot(&config.token, config.proxy_url.as_deref())?;
    let username = telegram::authorize(&tg).await?;
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(tg.clone()));

    let alerts = Arc::new(AlertScheduler::new(
        config.accounts.clone(),
        config.threshold,
        chats.clone(),
        provider.clone(),
        messenger.clone(),
    ));
    let alert_task = scheduler::spawn_periodic("balance-alerts", config.interval, move || {
        let alerts = alerts.clone();
        async move { alerts.run_tick().await }
    });

    let balance_bot = Arc::new(BalanceBot::new(
        config.accounts,
        config.threshold,
        config.admin,
        username,
        chats,
        provider,
        messenger,
    ));

    info!("Bot is starting...");
    let result = telegram::run(tg, balance_bot).await;

    alert_task.abort();
    info!("Bot stopped");
    result
}
