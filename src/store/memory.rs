//! In-process [`RateStore`].
//!
//! Follows the same rules as the Postgres store, so orchestration logic can be
//! exercised without a database. Reads and writes can be made to fail on
//! demand.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{AT_TOLERANCE, RateStore, StoreError, StoreResult};
use crate::rate::{self, Rate};

#[derive(Default)]
pub struct MemoryStore {
    rates: RwLock<Vec<Rate>>,
    next_id: AtomicI64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail with [`StoreError::Unavailable`].
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail with [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.rates.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rates.read().await.is_empty()
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn insert(&self, rates: &mut Vec<Rate>, rate: &Rate) {
        if rates.iter().any(|stored| stored.same_slot(rate)) {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        rates.push(rate.with_id(id));
    }

    async fn matching<F>(&self, coin: &str, fiat: &str, keep: F) -> StoreResult<Vec<Rate>>
    where
        F: Fn(&Rate) -> bool,
    {
        self.check_read()?;
        let rates = self.rates.read().await;
        Ok(rates
            .iter()
            .filter(|r| r.coin() == coin && r.fiat() == fiat && keep(*r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn add(&self, rate: &Rate) -> StoreResult<()> {
        self.check_write()?;
        let mut rates = self.rates.write().await;
        self.insert(&mut rates, rate);
        Ok(())
    }

    async fn add_batch(&self, batch: &[Rate]) -> StoreResult<()> {
        self.check_write()?;
        let mut rates = self.rates.write().await;
        for rate in batch {
            self.insert(&mut rates, rate);
        }
        Ok(())
    }

    async fn latest(&self, coin: &str, fiat: &str) -> StoreResult<Rate> {
        self.matching(coin, fiat, |_| true)
            .await?
            .into_iter()
            .max_by_key(Rate::timestamp)
            .ok_or(StoreError::NotFound)
    }

    async fn oldest(&self, coin: &str, fiat: &str) -> StoreResult<Rate> {
        self.matching(coin, fiat, |_| true)
            .await?
            .into_iter()
            .min_by_key(Rate::timestamp)
            .ok_or(StoreError::NotFound)
    }

    async fn at(&self, coin: &str, fiat: &str, at: DateTime<Utc>) -> StoreResult<Rate> {
        let until = at + AT_TOLERANCE;
        self.matching(coin, fiat, |r| r.timestamp() >= at && r.timestamp() <= until)
            .await?
            .into_iter()
            .min_by_key(Rate::timestamp)
            .ok_or(StoreError::NotFound)
    }

    async fn range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Rate>> {
        let mut rates = self
            .matching(coin, fiat, |r| r.timestamp() >= from && r.timestamp() <= to)
            .await?;
        rates.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        Ok(rates)
    }

    async fn count_for_range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let rates = self.range(coin, fiat, from, to).await?;
        Ok(rates.len() as u64)
    }

    async fn average_for_range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Decimal> {
        let rates = self.range(coin, fiat, from, to).await?;
        rate::mean(&rates).ok_or(StoreError::NotFound)
    }
}
