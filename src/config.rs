//! Service configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;

use crate::exchange::coin_api::{PROD_URL, SANDBOX_URL};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Table holding the stored rates.
    pub database_table: String,
    pub coin_api_token: String,
    pub coin_api_url: Url,
    /// The single pair served over HTTP and kept fresh by the refresher.
    pub coin: String,
    pub fiat: String,
    pub refresh_interval: Duration,
    /// Timeout of every upstream HTTP call.
    pub upstream_timeout: Duration,
    /// Deadline of a whole inbound request.
    pub request_deadline: Duration,
}

impl Config {
    /// Load configuration from the environment, after an optional `.env`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from `lookup`, which resolves a key to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let sandbox = parse_or(&lookup, "COIN_API_SANDBOX", false)?;
        let coin_api_url = match lookup("COIN_API_URL") {
            Some(url) => url,
            None if sandbox => SANDBOX_URL.to_string(),
            None => PROD_URL.to_string(),
        };
        let coin_api_url =
            Url::parse(&coin_api_url).with_context(|| format!("COIN_API_URL is not a valid url: {}", coin_api_url))?;

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            database_url: lookup("DATABASE_URL").context("DATABASE_URL is not set")?,
            database_table: lookup("DATABASE_TABLE").unwrap_or_else(|| "ratings".to_string()),
            coin_api_token: lookup("COIN_API_TOKEN").context("COIN_API_TOKEN is not set")?,
            coin_api_url,
            coin: lookup("COIN").unwrap_or_else(|| "BTC".to_string()),
            fiat: lookup("FIAT").unwrap_or_else(|| "USD".to_string()),
            refresh_interval: Duration::from_secs(parse_or(&lookup, "REFRESH_INTERVAL_SECS", 60)?),
            upstream_timeout: Duration::from_secs(parse_or(&lookup, "UPSTREAM_TIMEOUT_SECS", 10)?),
            request_deadline: Duration::from_secs(parse_or(&lookup, "REQUEST_DEADLINE_SECS", 30)?),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("PORT cannot be 0");
        }
        if self.database_url.is_empty() {
            bail!("DATABASE_URL cannot be empty");
        }
        if !is_identifier(&self.database_table) {
            bail!("DATABASE_TABLE is not a valid table name: {:?}", self.database_table);
        }
        if self.coin_api_token.is_empty() {
            bail!("COIN_API_TOKEN cannot be empty");
        }
        if self.coin.is_empty() || self.fiat.is_empty() {
            bail!("COIN and FIAT cannot be empty");
        }
        if self.refresh_interval.is_zero() {
            bail!("REFRESH_INTERVAL_SECS cannot be 0");
        }
        if self.upstream_timeout.is_zero() || self.request_deadline.is_zero() {
            bail!("timeouts cannot be 0");
        }

        Ok(())
    }

    pub fn bind_address(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

// The table name is spliced into SQL text.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
