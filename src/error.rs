//! Errors surfaced by the rating orchestrator.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::exchange::ExchangeError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RatingError {
    /// Upstream failure, passed through with its original classification.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The upstream had no rates at all for an uncovered range.
    #[error("no rates between {from} and {to}")]
    NoData {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl RatingError {
    /// Whether the request failed because no data exists for it.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Exchange(ExchangeError::NotFound)
                | Self::Store(StoreError::NotFound)
                | Self::NoData { .. }
        )
    }
}

pub type RatingResult<T> = Result<T, RatingError>;

/// A value together with the outcome of persisting it.
///
/// Single-record lookups still succeed when the write-back of a freshly
/// fetched value fails; `write_failure` carries that error instead.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub write_failure: Option<StoreError>,
}

impl<T> Outcome<T> {
    pub fn persisted(value: T) -> Self {
        Self {
            value,
            write_failure: None,
        }
    }

    pub fn from_write(value: T, write: Result<(), StoreError>) -> Self {
        Self {
            value,
            write_failure: write.err(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.write_failure.is_none()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
