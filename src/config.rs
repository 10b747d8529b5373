use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::billing::vscale::DEFAULT_BASE_URL;
use crate::billing::Account;
use crate::bot::is_reserved_command;
use crate::cli::Cli;
use crate::store::{StoreConfig, StoreKind};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Telegram API token has to be specified")]
    MissingToken,
    #[error("At least one Vscale account map has to be specified")]
    NoAccounts,
    #[error("Incorrect Vscale name to token map format: '{0}' (expected name=token)")]
    MalformedAccount(String),
    #[error("Vscale account '{0}' is specified more than once")]
    DuplicateAccount(String),
    #[error("Vscale account name '{0}' clashes with a bot command")]
    ReservedAccountName(String),
    #[error("Invalid interval '{0}', use e.g. 30s, 10m or 1h30m")]
    InvalidInterval(String),
    #[error("Threshold must be a finite number, got {0}")]
    InvalidThreshold(f64),
}

/// Contents of the optional TOML config file; every field may be omitted.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub vscale: VscaleConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub proxy_url: Option<String>,
    pub admin: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct VscaleConfig {
    pub api_url: Option<String>,
    /// Account name -> API token
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub interval: Option<String>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreFileConfig {
    pub kind: Option<StoreKind>,
    #[serde(alias = "bolt_path")]
    pub path: Option<PathBuf>,
    pub consul_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Longest accepted alert interval, one year
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn default_threshold() -> f64 {
    100.0
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vscalebot.db")
}

fn default_consul_url() -> String {
    "http://localhost:8500".to_string()
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    /// Sorted by name
    pub accounts: Vec<Account>,
    pub threshold: f64,
    pub interval: Duration,
    pub admin: Option<String>,
    pub proxy_url: Option<String>,
    pub verbose: bool,
    pub vscale_url: String,
    pub store: StoreConfig,
}

impl BotConfig {
    /// Read the config file named on the command line (if any) and merge it
    /// with the command-line options.
    pub fn load(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(cli, file)?)
    }

    /// Merge command-line options over file values and validate the result.
    /// Account mappings given on the command line replace the file's entirely.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let token = non_empty(cli.telegram_token)
            .or_else(|| non_empty(file.telegram.token))
            .ok_or(ConfigError::MissingToken)?;

        let accounts = if cli.vscale.is_empty() {
            file.vscale
                .accounts
                .into_iter()
                .map(|(name, token)| validate_account(Account::new(name.trim(), token.trim())))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            cli.vscale
                .iter()
                .map(|mapping| parse_account(mapping))
                .collect::<Result<Vec<_>, _>>()?
        };
        let accounts = sorted_unique(accounts)?;

        let interval = match cli.interval.or(file.alerts.interval) {
            Some(raw) => parse_duration(&raw)
                .filter(|d| !d.is_zero() && *d <= MAX_INTERVAL)
                .ok_or(ConfigError::InvalidInterval(raw))?,
            None => default_interval(),
        };

        let threshold = cli
            .threshold
            .or(file.alerts.threshold)
            .unwrap_or_else(default_threshold);
        if !threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        let admin = non_empty(cli.telegram_admin)
            .or_else(|| non_empty(file.telegram.admin))
            .map(|a| a.trim_start_matches('@').to_string());

        let store = StoreConfig {
            kind: cli.store.or(file.store.kind).unwrap_or_default(),
            db_path: cli
                .db_path
                .or(file.store.path)
                .unwrap_or_else(default_db_path),
            consul_url: non_empty(cli.consul_url)
                .or_else(|| non_empty(file.store.consul_url))
                .unwrap_or_else(default_consul_url),
        };

        Ok(Self {
            token,
            accounts,
            threshold,
            interval,
            admin,
            proxy_url: non_empty(cli.telegram_proxy_url)
                .or_else(|| non_empty(file.telegram.proxy_url)),
            verbose: cli.verbose || file.verbose,
            vscale_url: non_empty(cli.vscale_url)
                .or_else(|| non_empty(file.vscale.api_url))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            store,
        })
    }

    pub fn account_names(&self) -> Vec<&str> {
        self.accounts.iter().map(|a| a.name.as_str()).collect()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a `name=token` mapping
pub fn parse_account(mapping: &str) -> Result<Account, ConfigError> {
    let (name, token) = mapping
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedAccount(mapping.to_string()))?;
    let account = Account::new(name.trim(), token.trim());
    if account.name.is_empty() || account.token.is_empty() {
        return Err(ConfigError::MalformedAccount(mapping.to_string()));
    }
    validate_account(account)
}

fn validate_account(account: Account) -> Result<Account, ConfigError> {
    if account.name.is_empty() || account.token.is_empty() {
        return Err(ConfigError::MalformedAccount(format!(
            "{}={}",
            account.name, account.token
        )));
    }
    if is_reserved_command(&account.name) {
        return Err(ConfigError::ReservedAccountName(account.name));
    }
    Ok(account)
}

fn sorted_unique(mut accounts: Vec<Account>) -> Result<Vec<Account>, ConfigError> {
    if accounts.is_empty() {
        return Err(ConfigError::NoAccounts);
    }
    let mut seen = HashSet::new();
    for acc in &accounts {
        if !seen.insert(acc.name.as_str()) {
            return Err(ConfigError::DuplicateAccount(acc.name.clone()));
        }
    }
    accounts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(accounts)
}

/// Parse durations like "90s", "10m", "1h30m", "500ms" or "1d".
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s.as_str();
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            "d" => Duration::from_secs(value.checked_mul(86400)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(token: &str, accounts: &[&str]) -> Cli {
        Cli {
            telegram_token: Some(token.to_string()),
            vscale: accounts.iter().map(|s| s.to_string()).collect(),
            ..Cli::default()
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let config = BotConfig::resolve(cli("123:abc", &["swarm=111"]), FileConfig::default())
            .unwrap();

        assert_eq!(config.token, "123:abc");
        assert_eq!(config.accounts, vec![Account::new("swarm", "111")]);
        assert_eq!(config.threshold, 100.0);
        assert_eq!(config.interval, Duration::from_secs(600));
        assert_eq!(config.admin, None);
        assert_eq!(config.proxy_url, None);
        assert_eq!(config.vscale_url, DEFAULT_BASE_URL);
        assert_eq!(config.store.kind, StoreKind::Sqlite);
        assert_eq!(config.store.db_path, PathBuf::from("vscalebot.db"));
        assert!(!config.verbose);
    }

    #[test]
    fn test_missing_token() {
        let err = BotConfig::resolve(cli("  ", &["swarm=111"]), FileConfig::default()).unwrap_err();
        assert_eq!(err, ConfigError::MissingToken);
    }

    #[test]
    fn test_no_accounts() {
        let err = BotConfig::resolve(cli("t", &[]), FileConfig::default()).unwrap_err();
        assert_eq!(err, ConfigError::NoAccounts);
    }

    #[test]
    fn test_malformed_and_duplicate_accounts() {
        for bad in ["swarm", "=111", "swarm="] {
            let err = BotConfig::resolve(cli("t", &[bad]), FileConfig::default()).unwrap_err();
            assert_eq!(err, ConfigError::MalformedAccount(bad.to_string()));
        }

        let err = BotConfig::resolve(cli("t", &["a=1", "b=2", "a=3"]), FileConfig::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateAccount("a".to_string()));
    }

    #[test]
    fn test_reserved_account_name() {
        let err = BotConfig::resolve(cli("t", &["status=1"]), FileConfig::default()).unwrap_err();
        assert_eq!(err, ConfigError::ReservedAccountName("status".to_string()));
    }

    #[test]
    fn test_token_may_contain_equals() {
        let account = parse_account("swarm=abc=def").unwrap();
        assert_eq!(account, Account::new("swarm", "abc=def"));
    }

    #[test]
    fn test_accounts_sorted_by_name() {
        let config =
            BotConfig::resolve(cli("t", &["web=2", "db=3", "swarm=1"]), FileConfig::default())
                .unwrap();
        assert_eq!(config.account_names(), vec!["db", "swarm", "web"]);
    }

    #[test]
    fn test_invalid_interval_and_threshold() {
        let mut args = cli("t", &["a=1"]);
        args.interval = Some("soon".to_string());
        let err = BotConfig::resolve(args, FileConfig::default()).unwrap_err();
        assert_eq!(err, ConfigError::InvalidInterval("soon".to_string()));

        let mut args = cli("t", &["a=1"]);
        args.interval = Some("0s".to_string());
        assert!(BotConfig::resolve(args, FileConfig::default()).is_err());

        let mut args = cli("t", &["a=1"]);
        args.interval = Some("9300000000000000000s".to_string());
        assert_eq!(
            BotConfig::resolve(args, FileConfig::default()).unwrap_err(),
            ConfigError::InvalidInterval("9300000000000000000s".to_string())
        );

        let mut args = cli("t", &["a=1"]);
        args.interval = Some("365d".to_string());
        assert!(BotConfig::resolve(args, FileConfig::default()).is_ok());

        let mut args = cli("t", &["a=1"]);
        args.threshold = Some(f64::NAN);
        assert!(matches!(
            BotConfig::resolve(args, FileConfig::default()),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_file_config() {
        let file: FileConfig = toml::from_str(
            r#"
            verbose = true

            [telegram]
            token = "from-file"
            admin = "@alice"
            proxy_url = "socks5://proxy:1080"

            [vscale.accounts]
            swarm = "111"
            web = "222"

            [alerts]
            interval = "1h30m"
            threshold = 250.0

            [store]
            kind = "bolt"
            bolt_path = "/tmp/chats.db"
            "#,
        )
        .unwrap();

        let config = BotConfig::resolve(Cli::default(), file).unwrap();

        assert_eq!(config.token, "from-file");
        assert_eq!(config.admin.as_deref(), Some("alice"));
        assert_eq!(config.proxy_url.as_deref(), Some("socks5://proxy:1080"));
        assert_eq!(config.account_names(), vec!["swarm", "web"]);
        assert_eq!(config.interval, Duration::from_secs(5400));
        assert_eq!(config.threshold, 250.0);
        assert_eq!(config.store.kind, StoreKind::Sqlite);
        assert_eq!(config.store.db_path, PathBuf::from("/tmp/chats.db"));
        assert!(config.verbose);
    }

    #[test]
    fn test_command_line_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [telegram]
            token = "from-file"

            [vscale.accounts]
            old = "999"

            [alerts]
            threshold = 250.0

            [store]
            kind = "sqlite"
            "#,
        )
        .unwrap();

        let mut args = cli("from-cli", &["swarm=111"]);
        args.threshold = Some(10.0);
        args.store = Some(StoreKind::Consul);

        let config = BotConfig::resolve(args, file).unwrap();

        assert_eq!(config.token, "from-cli");
        assert_eq!(config.account_names(), vec!["swarm"]);
        assert_eq!(config.threshold, 10.0);
        assert_eq!(config.store.kind, StoreKind::Consul);
        assert_eq!(config.store.consul_url, "http://localhost:8500");
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vscalebot.toml");
        std::fs::write(
            &path,
            "[telegram]\ntoken = \"t\"\n[vscale.accounts]\nswarm = \"1\"\n",
        )
        .unwrap();

        let args = Cli {
            config: Some(path),
            ..Cli::default()
        };
        let config = BotConfig::load(args).unwrap();
        assert_eq!(config.account_names(), vec!["swarm"]);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("1m500ms"), Some(Duration::from_millis(60_500)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("1.5h"), None);
    }
}
