//! CoinAPI REST client.
//!
//! Point rates come from `/v1/exchangerate/{coin}/{fiat}`, ranges from the
//! 5 minute OHLCV history at `/v1/ohlcv/{coin}/{fiat}/history`, using each
//! candle's close price at the end of its period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{ExchangeError, ExchangeResult, RateSource};
use crate::rate::{InvalidRate, Rate};

pub const PROD_URL: &str = "https://rest.coinapi.io/";
pub const SANDBOX_URL: &str = "https://rest-sandbox.coinapi.io/";

/// Largest page the history endpoint is asked for.
pub const MAX_LIMIT: usize = 5000;

const PERIOD_ID: &str = "5MIN";
const TOKEN_HEADER: &str = "X-CoinAPI-Key";

#[derive(Debug, Deserialize)]
struct ExchangeRate {
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    asset_id_base: String,
    #[serde(default)]
    asset_id_quote: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    rate: Decimal,
}

impl TryFrom<ExchangeRate> for Rate {
    type Error = InvalidRate;

    fn try_from(exchange: ExchangeRate) -> Result<Self, Self::Error> {
        let time = exchange.time.ok_or(InvalidRate::ZeroTimestamp)?;
        Rate::new(time, exchange.asset_id_base, exchange.asset_id_quote, exchange.rate)
    }
}

#[derive(Debug, Deserialize)]
struct Candle {
    time_period_end: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    price_close: Decimal,
}

pub struct CoinApi {
    client: Client,
    base_url: Url,
    token: String,
    limited: AtomicBool,
}

impl CoinApi {
    pub fn new(base_url: Url, token: impl Into<String>, timeout: Duration) -> ExchangeResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            limited: AtomicBool::new(false),
        })
    }

    /// Whether this client has seen a quota-exceeded response.
    ///
    /// There is no way back: a limited client refuses every call.
    pub fn is_limited(&self) -> bool {
        self.limited.load(Ordering::SeqCst)
    }

    fn endpoint(&self, segments: &[&str]) -> ExchangeResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ExchangeError::BadRequest)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> ExchangeResult<T> {
        if self.is_limited() {
            return Err(ExchangeError::RateLimited);
        }

        debug!("[coin api] GET {}", url);

        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        if let Some(err) = ExchangeError::from_status(response.status().as_u16()) {
            if matches!(err, ExchangeError::RateLimited) {
                warn!("[coin api] quota exhausted, refusing further requests");
                self.limited.store(true, Ordering::SeqCst);
            }
            return Err(err);
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl RateSource for CoinApi {
    async fn rate(&self, coin: &str, fiat: &str, at: Option<DateTime<Utc>>) -> ExchangeResult<Rate> {
        let mut url = self.endpoint(&["v1", "exchangerate", coin, fiat])?;
        if let Some(at) = at {
            url.query_pairs_mut().append_pair("time", &format_time(at));
        }

        let exchange: ExchangeRate = self.fetch(url).await?;
        Ok(Rate::try_from(exchange)?)
    }

    async fn range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> ExchangeResult<Vec<Rate>> {
        let mut url = self.endpoint(&["v1", "ohlcv", coin, fiat, "history"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("period_id", PERIOD_ID)
                .append_pair("include_empty_items", "false")
                .append_pair("limit", &limit.to_string())
                .append_pair("time_start", &format_time(from));
            if let Some(to) = to {
                query.append_pair("time_end", &format_time(to));
            }
        }

        let candles: Vec<Candle> = self.fetch(url).await?;
        let rates = candles
            .into_iter()
            .map(|candle| Rate::new(candle.time_period_end, coin, fiat, candle.price_close))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    const TOKEN: &str = "a-wee-little-token";

    struct Upstream {
        url: Url,
        hits: Arc<AtomicUsize>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl Upstream {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn last_request(&self) -> String {
            self.requests.lock().unwrap().last().cloned().unwrap_or_default()
        }

        fn client(&self) -> CoinApi {
            CoinApi::new(self.url.clone(), TOKEN, Duration::from_secs(5)).unwrap()
        }
    }

    /// Serves `body` with `status` for every path, counting requests.
    fn upstream(status: u16, body: &'static str) -> Upstream {
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (app_hits, app_requests) = (hits.clone(), requests.clone());
        let server = HttpServer::new(move || {
            let (hits, requests) = (app_hits.clone(), app_requests.clone());
            App::new().default_service(web::to(move |req: HttpRequest| {
                let (hits, requests) = (hits.clone(), requests.clone());
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    requests
                        .lock()
                        .unwrap()
                        .push(format!("{}?{}", req.path(), req.query_string()));

                    let token = req.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
                    if token != Some(TOKEN) {
                        return HttpResponse::Unauthorized().finish();
                    }

                    HttpResponse::build(StatusCode::from_u16(status).unwrap())
                        .content_type("application/json")
                        .body(body)
                }
            }))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        Upstream {
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
            hits,
            requests,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[actix_web::test]
    async fn test_rate_decodes_exchange_rate() {
        let upstream = upstream(
            200,
            r#"{"time":"2024-03-01T12:00:00.0000000Z","asset_id_base":"BTC","asset_id_quote":"USD","rate":62011.25}"#,
        );
        let api = upstream.client();

        let rate = api.rate("BTC", "USD", Some(noon())).await.unwrap();

        assert_eq!(rate.timestamp(), noon());
        assert_eq!(rate.coin(), "BTC");
        assert_eq!(rate.fiat(), "USD");
        assert_eq!(rate.value(), dec!(62011.25));
        assert_eq!(
            upstream.last_request(),
            "/v1/exchangerate/BTC/USD?time=2024-03-01T12%3A00%3A00Z"
        );
    }

    #[test]
    fn test_rate_keeps_every_digit() {
        let payload = r#"{"time":"2024-03-01T12:00:00Z","asset_id_base":"BTC","asset_id_quote":"USD","rate":3258.887541779803778403513394}"#;

        let exchange: ExchangeRate = serde_json::from_str(payload).unwrap();

        assert_eq!(exchange.rate.to_string(), "3258.887541779803778403513394");
    }

    #[test]
    fn test_candle_keeps_every_digit() {
        let payload = r#"{"time_period_end":"2024-03-01T12:05:00Z","price_close":62011.12345678901234567890123}"#;

        let candle: Candle = serde_json::from_str(payload).unwrap();

        assert_eq!(candle.price_close.to_string(), "62011.12345678901234567890123");
    }

    #[actix_web::test]
    async fn test_current_rate_sends_no_time() {
        let upstream = upstream(
            200,
            r#"{"time":"2024-03-01T12:00:00Z","asset_id_base":"BTC","asset_id_quote":"USD","rate":1.5}"#,
        );

        upstream.client().rate("BTC", "USD", None).await.unwrap();

        assert_eq!(upstream.last_request(), "/v1/exchangerate/BTC/USD?");
    }

    #[actix_web::test]
    async fn test_rate_rejects_invalid_payload() {
        let upstream = upstream(
            200,
            r#"{"time":"2024-03-01T12:00:00Z","asset_id_base":"","asset_id_quote":"USD","rate":1}"#,
        );

        let result = upstream.client().rate("BTC", "USD", None).await;

        assert!(matches!(result, Err(ExchangeError::Invalid(InvalidRate::EmptyCoin))));
    }

    #[actix_web::test]
    async fn test_range_converts_candles() {
        let upstream = upstream(
            200,
            r#"[
                {"time_period_start":"2024-03-01T12:00:00Z","time_period_end":"2024-03-01T12:05:00Z","price_open":10,"price_close":11.5},
                {"time_period_start":"2024-03-01T12:05:00Z","time_period_end":"2024-03-01T12:10:00Z","price_open":11.5,"price_close":12}
            ]"#,
        );
        let to = noon() + chrono::Duration::minutes(10);

        let rates = upstream
            .client()
            .range("BTC", "USD", noon(), Some(to), MAX_LIMIT)
            .await
            .unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].timestamp(), noon() + chrono::Duration::minutes(5));
        assert_eq!(rates[0].value(), dec!(11.5));
        assert_eq!(rates[1].value(), dec!(12));
        assert!(rates.iter().all(|r| r.coin() == "BTC" && r.fiat() == "USD"));

        let request = upstream.last_request();
        assert!(request.starts_with("/v1/ohlcv/BTC/USD/history?"));
        assert!(request.contains("period_id=5MIN"));
        assert!(request.contains("include_empty_items=false"));
        assert!(request.contains("limit=5000"));
        assert!(request.contains("time_start=2024-03-01T12%3A00%3A00Z"));
        assert!(request.contains("time_end=2024-03-01T12%3A10%3A00Z"));
    }

    #[actix_web::test]
    async fn test_range_from_leaves_end_open() {
        let upstream = upstream(200, "[]");

        let rates = upstream
            .client()
            .range_from("BTC", "USD", noon(), 10)
            .await
            .unwrap();

        assert!(rates.is_empty());
        let request = upstream.last_request();
        assert!(request.contains("limit=10"));
        assert!(!request.contains("time_end"));
    }

    #[actix_web::test]
    async fn test_rate_limit_latches() {
        let upstream = upstream(429, "{}");
        let api = upstream.client();

        assert!(matches!(
            api.rate("BTC", "USD", None).await,
            Err(ExchangeError::RateLimited)
        ));
        assert!(api.is_limited());
        assert_eq!(upstream.hits(), 1);

        assert!(matches!(
            api.rate("BTC", "USD", Some(noon())).await,
            Err(ExchangeError::RateLimited)
        ));
        assert!(matches!(
            api.range("BTC", "USD", noon(), None, MAX_LIMIT).await,
            Err(ExchangeError::RateLimited)
        ));
        assert!(matches!(
            api.range_from("BTC", "USD", noon(), MAX_LIMIT).await,
            Err(ExchangeError::RateLimited)
        ));

        // Nothing reached the network after the first 429.
        assert_eq!(upstream.hits(), 1);
    }

    #[actix_web::test]
    async fn test_rate_limit_on_range_latches_rate() {
        let upstream = upstream(429, "{}");
        let api = upstream.client();

        assert!(matches!(
            api.range("BTC", "USD", noon(), None, MAX_LIMIT).await,
            Err(ExchangeError::RateLimited)
        ));
        assert!(matches!(
            api.rate("BTC", "USD", None).await,
            Err(ExchangeError::RateLimited)
        ));

        assert_eq!(upstream.hits(), 1);
    }

    #[actix_web::test]
    async fn test_fresh_client_is_not_limited() {
        let upstream = upstream(429, "{}");

        let first = upstream.client();
        let _ = first.rate("BTC", "USD", None).await;
        assert!(first.is_limited());

        let second = upstream.client();
        assert!(!second.is_limited());
        let _ = second.rate("BTC", "USD", None).await;
        assert_eq!(upstream.hits(), 2);
    }

    #[actix_web::test]
    async fn test_no_data_does_not_latch() {
        let upstream = upstream(550, "{}");
        let api = upstream.client();

        assert!(matches!(
            api.rate("BTC", "USD", None).await,
            Err(ExchangeError::NotFound)
        ));
        assert!(matches!(
            api.rate("BTC", "USD", None).await,
            Err(ExchangeError::NotFound)
        ));

        assert!(!api.is_limited());
        assert_eq!(upstream.hits(), 2);
    }

    #[actix_web::test]
    async fn test_bad_token_is_unauthorized() {
        let upstream = upstream(200, "{}");
        let api = CoinApi::new(upstream.url.clone(), "wrong", Duration::from_secs(5)).unwrap();

        assert!(matches!(
            api.rate("BTC", "USD", None).await,
            Err(ExchangeError::Unauthorized)
        ));
    }
}
