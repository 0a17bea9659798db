//! Kraken spot exchange integration.
//!
//! API docs: https://docs.kraken.com/api/
//! Base URL: https://api.kraken.com
//! Auth: `API-Key` header plus `API-Sign`, an HMAC-SHA512 over
//! `path || SHA256(nonce || postdata)` keyed with the base64-decoded secret.
//!
//! Every response is wrapped in `{"error": [...], "result": {...}}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::{Exchange, ExchangeError, OrderOptions, WithdrawalQuote};
use crate::config::{ApiCredentials, MarketConfig};
use crate::types::Balance;

type HmacSha512 = Hmac<Sha512>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.kraken.com";
const EXCHANGE_NAME: &str = "kraken";

/// Decimals Kraken accepts for BTC order volume.
const VOLUME_DECIMALS: usize = 5;

// ---------------------------------------------------------------------------
// API response types (Kraken JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, ExchangeError> {
        if !self.error.is_empty() {
            return Err(ExchangeError::Api(self.error));
        }
        self.result
            .ok_or_else(|| ExchangeError::Malformed("missing result".into()))
    }
}

/// One entry of `/0/public/Ticker`. `a` is `[price, whole lot volume, lot volume]`.
#[derive(Debug, Deserialize)]
struct TickerInfo {
    a: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    #[serde(default)]
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WithdrawInfoResult {
    limit: String,
    fee: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawResult {
    refid: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Kraken client bound to one account's credentials.
pub struct KrakenClient {
    http: Client,
    base_url: String,
    credentials: ApiCredentials,
    market: MarketConfig,
    last_nonce: AtomicI64,
}

impl KrakenClient {
    pub fn new(credentials: ApiCredentials, market: MarketConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("PIGGYBANK/0.1.0 (recurring-buy-agent)")
            .build()
            .context("Failed to build HTTP client for Kraken")?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            credentials,
            market,
            last_nonce: AtomicI64::new(0),
        })
    }

    // -- Internal helpers ------------------------------------------------

    /// Strictly increasing millisecond nonce.
    fn next_nonce(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    async fn public<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}/0/public/{method}?{query}", self.base_url);
        debug!(url = %url, "Kraken public request");

        let envelope: Envelope<T> = self.http.get(&url).send().await?.json().await?;
        envelope.into_result()
    }

    async fn private<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let path = format!("/0/private/{method}");
        let nonce = self.next_nonce();
        let postdata = encode_form(nonce, params);
        let signature = sign(
            &path,
            nonce,
            &postdata,
            self.credentials.private_key.expose_secret(),
        )?;

        debug!(path = %path, "Kraken private request");

        let envelope: Envelope<T> = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("API-Key", self.credentials.api_key.expose_secret().as_str())
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await?
            .json()
            .await?;
        envelope.into_result()
    }
}

/// Build the urlencoded POST body, nonce first.
fn encode_form(nonce: i64, params: &[(&str, String)]) -> String {
    let mut body = format!("nonce={nonce}");
    for (key, value) in params {
        body.push('&');
        body.push_str(key);
        body.push('=');
        body.push_str(&urlencoding::encode(value));
    }
    body
}

/// Compute the `API-Sign` header for a private request.
fn sign(path: &str, nonce: i64, postdata: &str, secret_b64: &str) -> Result<String, ExchangeError> {
    let secret = BASE64
        .decode(secret_b64)
        .map_err(|e| ExchangeError::Signing(format!("invalid private key encoding: {e}")))?;

    let inner = Sha256::digest(format!("{nonce}{postdata}").as_bytes());

    let mut mac = HmacSha512::new_from_slice(&secret)
        .map_err(|e| ExchangeError::Signing(format!("HMAC init failed: {e}")))?;
    mac.update(path.as_bytes());
    mac.update(&inner);

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw).map_err(|e| ExchangeError::Malformed(format!("{field} '{raw}': {e}")))
}

/// Pick fiat and crypto out of `/0/private/Balance`. Kraken omits empty assets.
fn parse_balance(
    assets: &HashMap<String, String>,
    fiat_asset: &str,
    crypto_asset: &str,
) -> Result<Balance, ExchangeError> {
    let amount = |asset: &str| match assets.get(asset) {
        Some(raw) => parse_decimal(asset, raw),
        None => Ok(Decimal::ZERO),
    };
    Ok(Balance::new(amount(fiat_asset)?, amount(crypto_asset)?))
}

/// Best ask out of `/0/public/Ticker`. Kraken keys the result by its
/// canonical pair name, which may differ from the queried one.
fn parse_ask(tickers: &HashMap<String, TickerInfo>, pair: &str) -> Result<Decimal, ExchangeError> {
    let ticker = tickers
        .get(pair)
        .or_else(|| tickers.values().next())
        .ok_or_else(|| ExchangeError::Malformed(format!("no ticker for {pair}")))?;
    let raw = ticker
        .a
        .first()
        .ok_or_else(|| ExchangeError::Malformed(format!("empty ask for {pair}")))?;
    parse_decimal("ask", raw)
}

#[async_trait]
impl Exchange for KrakenClient {
    async fn get_balance(&self) -> Result<Balance> {
        let assets: HashMap<String, String> = self.private("Balance", &[]).await?;
        Ok(parse_balance(
            &assets,
            &self.market.fiat_asset,
            &self.market.crypto_asset,
        )?)
    }

    async fn get_ask_price(&self, pair: &str) -> Result<Decimal> {
        let query = format!("pair={}", urlencoding::encode(&self.market.ticker_pair));
        let tickers: HashMap<String, TickerInfo> = self.public("Ticker", &query).await?;
        Ok(parse_ask(&tickers, pair)?)
    }

    async fn submit_market_buy(
        &self,
        pair: &str,
        volume: Decimal,
        options: &OrderOptions,
    ) -> Result<Vec<String>> {
        let mut params = vec![
            ("pair", pair.to_string()),
            ("type", "buy".to_string()),
            ("ordertype", "market".to_string()),
            ("volume", format!("{:.*}", VOLUME_DECIMALS, volume)),
            // Relative expiry in seconds.
            ("expiretm", format!("+{}", options.expiry_minutes * 60)),
        ];
        if options.trading_agreement {
            params.push(("trading_agreement", "agree".to_string()));
        }

        let result: AddOrderResult = self
            .private("AddOrder", &params)
            .await
            .context("Kraken AddOrder failed")?;
        Ok(result.txid)
    }

    async fn get_withdrawal_quote(
        &self,
        asset: &str,
        destination: &str,
        amount: Decimal,
    ) -> Result<WithdrawalQuote> {
        let params = [
            ("asset", asset.to_string()),
            ("key", destination.to_string()),
            ("amount", amount.to_string()),
        ];
        let info: WithdrawInfoResult = self
            .private("WithdrawInfo", &params)
            .await
            .context("Kraken WithdrawInfo failed")?;

        Ok(WithdrawalQuote {
            limit: parse_decimal("limit", &info.limit)?,
            fee: parse_decimal("fee", &info.fee)?,
        })
    }

    async fn submit_withdrawal(
        &self,
        asset: &str,
        destination: &str,
        amount: Decimal,
    ) -> Result<String> {
        let params = [
            ("asset", asset.to_string()),
            ("key", destination.to_string()),
            ("amount", amount.to_string()),
        ];
        let result: WithdrawResult = self
            .private("Withdraw", &params)
            .await
            .context("Kraken Withdraw failed")?;
        Ok(result.refid)
    }

    fn name(&self) -> &str {
        EXCHANGE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
