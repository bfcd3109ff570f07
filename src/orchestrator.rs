//! Cache-aside rating logic.
//!
//! Every query goes to the store first. Only when the store can't answer is
//! the exchange consulted, and whatever it returns is written back so the
//! next query for the same data stays local.
//!
//! Range coverage is decided by count alone: a window with no stored rows is
//! uncovered and fetched whole, a window with any row is served from the store
//! as is. A window falling in a gap between two covered stretches therefore
//! looks uncovered and is fetched again.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use rust_decimal::Decimal;

use crate::error::{Outcome, RatingError, RatingResult};
use crate::exchange::{ExchangeResult, MAX_LIMIT, RateSource};
use crate::rate::{self, Rate};
use crate::shutdown::Shutdown;
use crate::store::{RateStore, StoreResult};

pub struct Orchestrator {
    store: Arc<dyn RateStore>,
    exchange: Arc<dyn RateSource>,
    shutdown: Shutdown,
}

impl Orchestrator {
    /// Upstream calls made through this orchestrator are abandoned as soon as
    /// `shutdown` fires.
    pub fn new(store: Arc<dyn RateStore>, exchange: Arc<dyn RateSource>, shutdown: Shutdown) -> Self {
        Self {
            store,
            exchange,
            shutdown,
        }
    }

    /// Most recent stored rate, or the current upstream rate when the store
    /// has none or can't be read.
    pub async fn latest(&self, coin: &str, fiat: &str) -> RatingResult<Outcome<Rate>> {
        match self.store.latest(coin, fiat).await {
            Ok(rate) => Ok(Outcome::persisted(rate)),
            Err(err) => {
                warn!("[rating] no latest {}/{} from store, falling back to exchange: {}", coin, fiat, err);
                self.refresh_latest(coin, fiat).await
            }
        }
    }

    /// Fetch the current upstream rate and store it.
    pub async fn refresh_latest(&self, coin: &str, fiat: &str) -> RatingResult<Outcome<Rate>> {
        let rate = self.upstream(self.exchange.rate(coin, fiat, None)).await?;
        let write = self.store.add(&rate).await;
        Ok(self.write_back(rate, write))
    }

    /// Rate at `at`, from the store when it holds one close enough.
    pub async fn at(&self, coin: &str, fiat: &str, at: DateTime<Utc>) -> RatingResult<Outcome<Rate>> {
        match self.store.at(coin, fiat, at).await {
            Ok(rate) => Ok(Outcome::persisted(rate)),
            Err(err) => {
                debug!("[rating] {}/{} at {} not in store: {}", coin, fiat, at, err);
                let rate = self.upstream(self.exchange.rate(coin, fiat, Some(at))).await?;
                let write = self.store.add(&rate).await;
                Ok(self.write_back(rate, write))
            }
        }
    }

    /// Rates within `[from, to]`.
    ///
    /// A freshly fetched range is only returned once it has been stored.
    pub async fn range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RatingResult<Vec<Rate>> {
        if self.is_covered(coin, fiat, from, to).await? {
            return Ok(self.store.range(coin, fiat, from, to).await?);
        }

        let rates = self.fetch_range(coin, fiat, from, to).await?;
        if let Err(err) = self.store.add_batch(&rates).await {
            error!("[rating] failed to save {} fetched rates: {}", rates.len(), err);
            return Err(err.into());
        }

        Ok(rates)
    }

    /// Mean rate within `[from, to]`.
    ///
    /// Covered windows are averaged by the store. Uncovered ones are fetched,
    /// averaged here, then stored; a failed store write doesn't discard the
    /// computed mean.
    pub async fn average(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RatingResult<Outcome<Decimal>> {
        if self.is_covered(coin, fiat, from, to).await? {
            let average = self.store.average_for_range(coin, fiat, from, to).await?;
            return Ok(Outcome::persisted(average));
        }

        let rates = self.fetch_range(coin, fiat, from, to).await?;
        let average = rate::mean(&rates).ok_or(RatingError::NoData { from, to })?;

        let write = self.store.add_batch(&rates).await;
        Ok(self.write_back(average, write))
    }

    /// Oldest stored rate.
    pub async fn oldest(&self, coin: &str, fiat: &str) -> RatingResult<Rate> {
        Ok(self.store.oldest(coin, fiat).await?)
    }

    async fn is_covered(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RatingResult<bool> {
        let count = self.store.count_for_range(coin, fiat, from, to).await?;
        debug!("[rating] {} stored {}/{} rates in [{}, {}]", count, coin, fiat, from, to);
        Ok(count > 0)
    }

    async fn fetch_range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RatingResult<Vec<Rate>> {
        self.upstream(self.exchange.range(coin, fiat, from, Some(to), MAX_LIMIT))
            .await
    }

    async fn upstream<T>(&self, fetch: impl Future<Output = ExchangeResult<T>>) -> RatingResult<T> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RatingError::Cancelled),
            result = fetch => result.map_err(|err| {
                error!("[rating] exchange request failed: {}", err);
                RatingError::from(err)
            }),
        }
    }

    fn write_back<T>(&self, value: T, write: StoreResult<()>) -> Outcome<T> {
        if let Err(err) = &write {
            error!("[rating] failed to save fetched rate: {}", err);
        }
        Outcome::from_write(value, write)
    }
}
