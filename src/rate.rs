use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Reasons a value can't become a [`Rate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidRate {
    #[error("rate can't have zero time")]
    ZeroTimestamp,

    #[error("rate coin can't be empty")]
    EmptyCoin,

    #[error("rate fiat can't be empty")]
    EmptyFiat,

    #[error("rate value can't be negative: {0}")]
    NegativeValue(Decimal),
}

/// Exchange rate of a coin in a fiat currency at a point in time.
///
/// Rates are immutable once built. A store hands back a copy carrying the id
/// it assigned; nothing else changes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rate {
    id: Option<i64>,
    timestamp: DateTime<Utc>,
    coin: String,
    fiat: String,
    value: Decimal,
}

impl Rate {
    pub fn new(
        timestamp: DateTime<Utc>,
        coin: impl Into<String>,
        fiat: impl Into<String>,
        value: Decimal,
    ) -> Result<Self, InvalidRate> {
        let coin = coin.into();
        let fiat = fiat.into();

        if timestamp.timestamp() == 0 && timestamp.timestamp_subsec_nanos() == 0 {
            return Err(InvalidRate::ZeroTimestamp);
        }
        if coin.is_empty() {
            return Err(InvalidRate::EmptyCoin);
        }
        if fiat.is_empty() {
            return Err(InvalidRate::EmptyFiat);
        }
        if value.is_sign_negative() && !value.is_zero() {
            return Err(InvalidRate::NegativeValue(value));
        }

        Ok(Self {
            id: None,
            timestamp,
            coin,
            fiat,
            value,
        })
    }

    /// Copy of this rate carrying a store-assigned id.
    pub fn with_id(&self, id: i64) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    pub fn fiat(&self) -> &str {
        &self.fiat
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    /// True when both rates describe the same pair at the same instant.
    pub fn same_slot(&self, other: &Rate) -> bool {
        self.timestamp == other.timestamp && self.coin == other.coin && self.fiat == other.fiat
    }
}

/// Arithmetic mean of the rate values, `None` for an empty slice.
pub fn mean(rates: &[Rate]) -> Option<Decimal> {
    if rates.is_empty() {
        return None;
    }

    let sum: Decimal = rates.iter().map(Rate::value).sum();
    Some(sum / Decimal::from(rates.len()))
}
