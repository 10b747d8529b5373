use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::billing::{fetch_all, Account, BalanceProvider};
use crate::bot::balance_message;
use crate::chats::ChatRegistry;
use crate::platform::Messenger;
use crate::store::StoreError;

/// Outcome of one alert tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub chats: usize,
    pub alerts_sent: usize,
    pub send_failures: usize,
    pub fetch_failures: usize,
}

/// Sends a low-balance alert to every subscribed chat for each account at or
/// below the threshold. No deduplication: a low account alerts on every tick.
pub struct AlertScheduler {
    accounts: Vec<Account>,
    threshold: f64,
    chats: ChatRegistry,
    provider: Arc<dyn BalanceProvider>,
    messenger: Arc<dyn Messenger>,
}

impl AlertScheduler {
    pub fn new(
        accounts: Vec<Account>,
        threshold: f64,
        chats: ChatRegistry,
        provider: Arc<dyn BalanceProvider>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            accounts,
            threshold,
            chats,
            provider,
            messenger,
        }
    }

    /// One pass over all chats and accounts.
    ///
    /// Only a failure to list chats is an error; fetch and send failures are
    /// logged and counted. An account whose balance could not be fetched gets
    /// no alert.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let chats = self.chats.list().await?;
        let mut report = TickReport {
            chats: chats.len(),
            ..TickReport::default()
        };

        if chats.is_empty() {
            debug!("No subscribed chats, skipping balance checks");
            return Ok(report);
        }

        let mut alerts = Vec::new();
        for (acc, result) in fetch_all(self.provider.as_ref(), &self.accounts).await {
            match result {
                Ok(balance) if balance <= self.threshold => {
                    alerts.push(balance_message(&acc.name, balance));
                }
                Ok(balance) => {
                    debug!("{} balance {:.2} is above threshold", acc.name, balance);
                }
                Err(e) => {
                    warn!("Failed to fetch {} balance, no alert this tick: {}", acc.name, e);
                    report.fetch_failures += 1;
                }
            }
        }

        for chat in &chats {
            for text in &alerts {
                match self.messenger.send_text(chat.id, text).await {
                    Ok(()) => report.alerts_sent += 1,
                    Err(e) => {
                        warn!("Failed to send alert to chat {}: {}", chat.id, e);
                        report.send_failures += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Tick and log the outcome; a store outage skips the tick.
    pub async fn run_tick(&self) {
        match self.tick().await {
            Ok(report)
                if report.alerts_sent > 0 || report.send_failures > 0 || report.fetch_failures > 0 =>
            {
                info!(
                    "Alert tick: {} alert(s) sent, {} failed, {} balance fetch(es) failed, {} chat(s)",
                    report.alerts_sent, report.send_failures, report.fetch_failures, report.chats
                );
            }
            Ok(report) => debug!("Alert tick: nothing to send ({:?})", report),
            Err(e) => error!("Skipping alert tick, failed to list chats: {}", e),
        }
    }
}
