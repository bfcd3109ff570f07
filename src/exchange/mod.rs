//! Upstream market-data providers.
//!
//! [`RateSource`] is the narrow capability the orchestrator needs from a
//! provider. [`coin_api::CoinApi`] is the production implementation.

pub mod coin_api;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::rate::{InvalidRate, Rate};

pub use coin_api::{CoinApi, MAX_LIMIT};

/// Errors returned by an upstream provider.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Malformed upstream query. Retrying the same call won't help.
    #[error("bad request")]
    BadRequest,

    /// Quota exhausted. Once seen, the client stays limited.
    #[error("exchange rate limit reached")]
    RateLimited,

    #[error("invalid exchange api token")]
    Unauthorized,

    #[error("exchange api access forbidden")]
    Forbidden,

    /// Provider has no data for the requested instant or range.
    #[error("rate not found")]
    NotFound,

    /// Any other non-success status.
    #[error("unexpected exchange response status {0}")]
    Status(u16),

    #[error("exchange transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode exchange response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("exchange returned invalid data: {0}")]
    Invalid(#[from] InvalidRate),
}

impl ExchangeError {
    /// Classify a non-success upstream status.
    ///
    /// Returns `None` for 2xx statuses, which carry a payload to decode.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            400 => Some(Self::BadRequest),
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            429 => Some(Self::RateLimited),
            550 => Some(Self::NotFound),
            other => Some(Self::Status(other)),
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Source of exchange rates for a coin/fiat pair.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Rate at `at`, or the current rate when `at` is `None`.
    async fn rate(&self, coin: &str, fiat: &str, at: Option<DateTime<Utc>>) -> ExchangeResult<Rate>;

    /// Rates between `from` and `to`, at most `limit` of them.
    ///
    /// An absent `to` leaves the range open-ended.
    async fn range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ExchangeResult<Vec<Rate>>;

    /// Rates from `from` onwards, at most `limit` of them.
    async fn range_from(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        limit: usize,
    ) -> ExchangeResult<Vec<Rate>> {
        self.range(coin, fiat, from, None, limit).await
    }
}
