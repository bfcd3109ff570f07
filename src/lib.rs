//! Crypto/fiat exchange rates served from a local store, backed by CoinAPI.
//!
//! The [`orchestrator::Orchestrator`] answers every query from the
//! [`store::RateStore`] when it can and falls back to the
//! [`exchange::RateSource`] otherwise, writing what it fetched back to the
//! store. A [`refresher::Refresher`] keeps the latest rate of the configured
//! pair warm, and [`http`] exposes the queries over JSON.

pub mod config;
pub mod error;
pub mod exchange;
pub mod http;
pub mod orchestrator;
pub mod rate;
pub mod refresher;
pub mod shutdown;
pub mod store;

pub use error::{Outcome, RatingError, RatingResult};
pub use orchestrator::Orchestrator;
pub use rate::Rate;
