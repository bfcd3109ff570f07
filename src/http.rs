//! JSON HTTP endpoints for the configured pair.
//!
//! - `GET /latest`
//! - `GET /at?t={timestamp}`
//! - `GET /avg?from={timestamp}&to={timestamp}`
//!
//! Timestamps are RFC 3339 date-times or plain `YYYY-MM-DD` dates (midnight
//! UTC), URL encoded. Successful responses are `{"data": "<rate>"}`, failures
//! `{"error": "<text>"}`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, web};
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Outcome, RatingError, RatingResult};
use crate::orchestrator::Orchestrator;

const NO_TIMESTAMP: &str = "no timestamp provided, use t query";
const INVALID_TIMESTAMP: &str = "timestamp is not valid";
const INVALID_FROM: &str = "from timestamp value is invalid";
const INVALID_TO: &str = "to timestamp value is invalid";
const FROM_AFTER_TO: &str = "from timestamp must not be after to";
const UNABLE_TO_SERVICE: &str = "unable to service request at the moment";

pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    coin: String,
    fiat: String,
    deadline: Duration,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        coin: impl Into<String>,
        fiat: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            orchestrator,
            coin: coin.into(),
            fiat: fiat.into(),
            deadline,
        }
    }

    async fn within_deadline<T>(&self, call: impl Future<Output = RatingResult<T>>) -> RatingResult<T> {
        match tokio::time::timeout(self.deadline, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("[http] request exceeded {:?} deadline", self.deadline);
                Err(RatingError::Cancelled)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct RateResponse {
    data: String,
}

#[derive(Debug, Serialize)]
struct RateError {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct AtQuery {
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AverageQuery {
    from: Option<String>,
    to: Option<String>,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/latest", web::get().to(latest))
        .route("/at", web::get().to(at))
        .route("/avg", web::get().to(average));
}

async fn latest(state: web::Data<AppState>) -> HttpResponse {
    let result = state
        .within_deadline(state.orchestrator.latest(&state.coin, &state.fiat))
        .await;

    respond(result.map(|outcome| settle(outcome, |rate| rate.value())))
}

async fn at(state: web::Data<AppState>, query: web::Query<AtQuery>) -> HttpResponse {
    let Some(raw) = query.t.as_deref().filter(|t| !t.is_empty()) else {
        return respond_with_error(StatusCode::BAD_REQUEST, NO_TIMESTAMP);
    };
    let Some(timestamp) = parse_timestamp(raw) else {
        return respond_with_error(StatusCode::BAD_REQUEST, INVALID_TIMESTAMP);
    };

    respond(rate_at(&state, timestamp).await)
}

async fn average(state: web::Data<AppState>, query: web::Query<AverageQuery>) -> HttpResponse {
    let Some(from) = query.from.as_deref().and_then(parse_timestamp) else {
        return respond_with_error(StatusCode::BAD_REQUEST, INVALID_FROM);
    };
    let Some(to) = query.to.as_deref().and_then(parse_timestamp) else {
        return respond_with_error(StatusCode::BAD_REQUEST, INVALID_TO);
    };
    if from > to {
        return respond_with_error(StatusCode::BAD_REQUEST, FROM_AFTER_TO);
    }

    // A single instant has nothing to average.
    if from == to {
        return respond(rate_at(&state, from).await);
    }

    let result = state
        .within_deadline(state.orchestrator.average(&state.coin, &state.fiat, from, to))
        .await;

    respond(result.map(|outcome| settle(outcome, |average| *average)))
}

async fn rate_at(state: &AppState, timestamp: DateTime<Utc>) -> RatingResult<Decimal> {
    state
        .within_deadline(state.orchestrator.at(&state.coin, &state.fiat, timestamp))
        .await
        .map(|outcome| settle(outcome, |rate| rate.value()))
}

/// Accepts RFC 3339 date-times and bare `YYYY-MM-DD` dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(raw) {
        return Some(date_time.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// Answer with the value even if storing it failed.
fn settle<T>(outcome: Outcome<T>, value: impl FnOnce(&T) -> Decimal) -> Decimal {
    if let Some(err) = &outcome.write_failure {
        warn!("[http] answering with a rate that was not stored: {}", err);
    }
    value(&outcome.value)
}

fn respond(result: RatingResult<Decimal>) -> HttpResponse {
    match result {
        Ok(value) => HttpResponse::Ok().json(RateResponse {
            data: value.to_string(),
        }),
        Err(err) if err.is_not_found() => respond_with_error(StatusCode::NOT_FOUND, err),
        Err(err) => {
            error!("[http] unable to service request: {}", err);
            respond_with_error(StatusCode::INTERNAL_SERVER_ERROR, UNABLE_TO_SERVICE)
        }
    }
}

fn respond_with_error(status: StatusCode, err: impl ToString) -> HttpResponse {
    HttpResponse::build(status).json(RateError {
        error: err.to_string(),
    })
}
