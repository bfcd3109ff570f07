//! Scripted [`RateSource`] for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ExchangeError, ExchangeResult, RateSource};
use crate::rate::Rate;

type RateFn = Box<dyn Fn(Option<DateTime<Utc>>) -> ExchangeResult<Rate> + Send + Sync>;
type RangeFn =
    Box<dyn Fn(DateTime<Utc>, Option<DateTime<Utc>>, usize) -> ExchangeResult<Vec<Rate>> + Send + Sync>;

pub(crate) struct MockExchange {
    rate_fn: RateFn,
    range_fn: RangeFn,
    rate_calls: AtomicUsize,
    range_calls: AtomicUsize,
    hang: AtomicBool,
}

impl MockExchange {
    /// A source with no data for anything.
    pub fn new() -> Self {
        Self {
            rate_fn: Box::new(|_| Err(ExchangeError::NotFound)),
            range_fn: Box::new(|_, _, _| Err(ExchangeError::NotFound)),
            rate_calls: AtomicUsize::new(0),
            range_calls: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
        }
    }

    pub fn with_rate(
        mut self,
        f: impl Fn(Option<DateTime<Utc>>) -> ExchangeResult<Rate> + Send + Sync + 'static,
    ) -> Self {
        self.rate_fn = Box::new(f);
        self
    }

    pub fn with_range(
        mut self,
        f: impl Fn(DateTime<Utc>, Option<DateTime<Utc>>, usize) -> ExchangeResult<Vec<Rate>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.range_fn = Box::new(f);
        self
    }

    /// Make every call block until the caller gives up.
    pub fn hanging(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    pub fn rate_calls(&self) -> usize {
        self.rate_calls.load(Ordering::SeqCst)
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for MockExchange {
    async fn rate(&self, _coin: &str, _fiat: &str, at: Option<DateTime<Utc>>) -> ExchangeResult<Rate> {
        self.rate_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        (self.rate_fn)(at)
    }

    async fn range(
        &self,
        _coin: &str,
        _fiat: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ExchangeResult<Vec<Rate>> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        (self.range_fn)(from, to, limit)
    }
}
