//! Persistence of rates.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::rate::Rate;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// How far past the requested instant a point lookup may look.
pub const AT_TOLERANCE: Duration = Duration::minutes(5);

#[derive(Debug, Error)]
pub enum StoreError {
    /// The query matched nothing.
    #[error("no rate stored for the request")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row is not a valid rate: {0}")]
    InvalidRow(#[from] crate::rate::InvalidRate),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage of rates keyed by coin, fiat and timestamp.
///
/// Range bounds are inclusive. Adding a rate whose coin, fiat and timestamp
/// are already stored is not an error; the stored row is kept.
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn add(&self, rate: &Rate) -> StoreResult<()>;

    async fn add_batch(&self, rates: &[Rate]) -> StoreResult<()>;

    async fn latest(&self, coin: &str, fiat: &str) -> StoreResult<Rate>;

    async fn oldest(&self, coin: &str, fiat: &str) -> StoreResult<Rate>;

    /// First rate in `[at, at + AT_TOLERANCE]`.
    async fn at(&self, coin: &str, fiat: &str, at: DateTime<Utc>) -> StoreResult<Rate>;

    /// Rates in `[from, to]`, newest first.
    async fn range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Rate>>;

    async fn count_for_range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn average_for_range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Decimal>;
}
