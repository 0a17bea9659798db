//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (exchange keys, SMTP password) are referenced by env-var name in
//! the config and resolved once at startup via [`AppConfig::resolve_env`].

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use thiserror::Error;

/// Default config file path, overridable with `PIGGYBANK_CONFIG`.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub market: MarketConfig,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Pause between two cycles. Also bounds the buy order lifetime.
    pub sleep_time_hours: u64,
}

impl AgentConfig {
    /// Buy orders expire five minutes before the next cycle starts.
    pub fn order_expiry_minutes(&self) -> i64 {
        self.sleep_time_hours as i64 * 60 - 5
    }
}

/// Exchange asset and pair codes. Defaults are Kraken's BTC/EUR codes.
#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    #[serde(default = "default_pair")]
    pub pair: String,
    #[serde(default = "default_ticker_pair")]
    pub ticker_pair: String,
    #[serde(default = "default_fiat_asset")]
    pub fiat_asset: String,
    #[serde(default = "default_crypto_asset")]
    pub crypto_asset: String,
    #[serde(default = "default_withdraw_asset")]
    pub withdraw_asset: String,
}

fn default_pair() -> String {
    "XXBTZEUR".into()
}

fn default_ticker_pair() -> String {
    "XBTEUR".into()
}

fn default_fiat_asset() -> String {
    "ZEUR".into()
}

fn default_crypto_asset() -> String {
    "XXBT".into()
}

fn default_withdraw_asset() -> String {
    "XBT".into()
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            pair: default_pair(),
            ticker_pair: default_ticker_pair(),
            fiat_asset: default_fiat_asset(),
            crypto_asset: default_crypto_asset(),
            withdraw_asset: default_withdraw_asset(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password_env: String,
    pub sender_name: String,
    pub sender_email: String,
}

impl SmtpConfig {
    /// Value for the `From` header.
    pub fn from_header(&self) -> String {
        format!("{} <{}>", self.sender_name, self.sender_email)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    pub template_path: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub unbooked_withdrawal: UnbookedWithdrawal,
}

/// What to do when an account has crypto to withdraw but no buy was ever
/// booked for it.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnbookedWithdrawal {
    /// Withdraw anyway and write a ledger row with zeroed bookkeeping.
    #[default]
    RecordZeroed,
    /// Refuse the withdrawal until a buy has been booked.
    Reject,
}

/// One exchange account under management.
#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub id: i64,
    pub description: String,
    /// Env var holding the exchange API key.
    pub api_key_env: String,
    /// Env var holding the base64 exchange private key.
    pub private_key_env: String,
    /// Name of the withdrawal destination registered on the exchange.
    pub withdraw_address_desc: String,
    pub min_fiat_to_buy: Decimal,
    pub min_crypto_to_withdraw: Decimal,
    #[serde(default)]
    pub send_notification_email: bool,
    #[serde(default)]
    pub notification_email: String,
}

/// Exchange credentials resolved from an account's env-var references.
pub struct ApiCredentials {
    pub api_key: SecretString,
    pub private_key: SecretString,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiCredentials { .. }")
    }
}

impl AccountConfig {
    pub fn credentials(&self) -> Result<ApiCredentials> {
        Ok(ApiCredentials {
            api_key: SecretString::new(AppConfig::resolve_env(&self.api_key_env)?),
            private_key: SecretString::new(AppConfig::resolve_env(&self.private_key_env)?),
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sleep_time_hours must be at least 1, got {0}")]
    SleepTooShort(u64),
    #[error("no accounts configured")]
    NoAccounts,
    #[error("account id {0} is configured more than once")]
    DuplicateAccount(i64),
    #[error("account {0}: thresholds must not be negative")]
    NegativeThreshold(i64),
    #[error("account {0}: notifications enabled but notification_email is empty")]
    MissingNotificationEmail(i64),
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.sleep_time_hours < 1 {
            return Err(ConfigError::SleepTooShort(self.agent.sleep_time_hours));
        }
        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.id) {
                return Err(ConfigError::DuplicateAccount(account.id));
            }
            if account.min_fiat_to_buy.is_sign_negative()
                || account.min_crypto_to_withdraw.is_sign_negative()
            {
                return Err(ConfigError::NegativeThreshold(account.id));
            }
            if account.send_notification_email && account.notification_email.trim().is_empty() {
                return Err(ConfigError::MissingNotificationEmail(account.id));
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Used for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
