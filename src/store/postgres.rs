use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};

use super::{AT_TOLERANCE, RateStore, StoreError, StoreResult};
use crate::rate::Rate;

/// Rows per INSERT, four bind parameters each.
const BATCH_CHUNK: usize = 5000;

#[derive(Debug, FromRow)]
struct RateRow {
    id: i64,
    date: DateTime<Utc>,
    rate: Decimal,
    coin: String,
    fiat: String,
}

impl TryFrom<RateRow> for Rate {
    type Error = StoreError;

    fn try_from(row: RateRow) -> Result<Self, Self::Error> {
        Ok(Rate::new(row.date, row.coin, row.fiat, row.rate)?.with_id(row.id))
    }
}

/// Rates kept in a Postgres table, one row per coin, fiat and date.
pub struct PostgresStore {
    pool: PgPool,
    table: String,
}

impl PostgresStore {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub async fn connect(url: &str, table: impl Into<String>) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        Ok(Self::new(pool, table))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn initialize(&self) -> StoreResult<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                date TIMESTAMPTZ NOT NULL,
                rate NUMERIC NOT NULL,
                coin TEXT NOT NULL,
                fiat TEXT NOT NULL,
                UNIQUE (coin, fiat, date)
            )
            "#,
            table = self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        debug!("[db] table {} ready", self.table);
        Ok(())
    }

    async fn fetch_one(&self, sql: &str, coin: &str, fiat: &str) -> StoreResult<Rate> {
        sqlx::query_as::<_, RateRow>(sql)
            .bind(coin)
            .bind(fiat)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?
            .try_into()
    }
}

#[async_trait]
impl RateStore for PostgresStore {
    async fn add(&self, rate: &Rate) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (date, rate, coin, fiat) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (coin, fiat, date) DO NOTHING",
            self.table
        );

        sqlx::query(&sql)
            .bind(rate.timestamp())
            .bind(rate.value())
            .bind(rate.coin())
            .bind(rate.fiat())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_batch(&self, rates: &[Rate]) -> StoreResult<()> {
        if rates.is_empty() {
            return Ok(());
        }

        // All chunks land or none do, so a failed batch never looks covered.
        let mut tx = self.pool.begin().await?;

        for chunk in rates.chunks(BATCH_CHUNK) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} (date, rate, coin, fiat) ", self.table));

            builder.push_values(chunk, |mut b, rate| {
                b.push_bind(rate.timestamp())
                    .push_bind(rate.value())
                    .push_bind(rate.coin().to_string())
                    .push_bind(rate.fiat().to_string());
            });
            builder.push(" ON CONFLICT (coin, fiat, date) DO NOTHING");

            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn latest(&self, coin: &str, fiat: &str) -> StoreResult<Rate> {
        let sql = format!(
            "SELECT id, date, rate, coin, fiat FROM {} \
             WHERE coin = $1 AND fiat = $2 ORDER BY date DESC LIMIT 1",
            self.table
        );
        self.fetch_one(&sql, coin, fiat).await
    }

    async fn oldest(&self, coin: &str, fiat: &str) -> StoreResult<Rate> {
        let sql = format!(
            "SELECT id, date, rate, coin, fiat FROM {} \
             WHERE coin = $1 AND fiat = $2 ORDER BY date ASC LIMIT 1",
            self.table
        );
        self.fetch_one(&sql, coin, fiat).await
    }

    async fn at(&self, coin: &str, fiat: &str, at: DateTime<Utc>) -> StoreResult<Rate> {
        let sql = format!(
            "SELECT id, date, rate, coin, fiat FROM {} \
             WHERE coin = $1 AND fiat = $2 AND date BETWEEN $3 AND $4 \
             ORDER BY date ASC LIMIT 1",
            self.table
        );

        sqlx::query_as::<_, RateRow>(&sql)
            .bind(coin)
            .bind(fiat)
            .bind(at)
            .bind(at + AT_TOLERANCE)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?
            .try_into()
    }

    async fn range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Rate>> {
        let sql = format!(
            "SELECT id, date, rate, coin, fiat FROM {} \
             WHERE coin = $1 AND fiat = $2 AND date BETWEEN $3 AND $4 \
             ORDER BY date DESC",
            self.table
        );

        sqlx::query_as::<_, RateRow>(&sql)
            .bind(coin)
            .bind(fiat)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Rate::try_from)
            .collect()
    }

    async fn count_for_range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE coin = $1 AND fiat = $2 AND date BETWEEN $3 AND $4",
            self.table
        );

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(coin)
            .bind(fiat)
            .bind(from)
            .bind(to)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn average_for_range(
        &self,
        coin: &str,
        fiat: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Decimal> {
        let sql = format!(
            "SELECT AVG(rate) FROM {} WHERE coin = $1 AND fiat = $2 AND date BETWEEN $3 AND $4",
            self.table
        );

        let average: Option<Decimal> = sqlx::query_scalar(&sql)
            .bind(coin)
            .bind(fiat)
            .bind(from)
            .bind(to)
            .fetch_one(&self.pool)
            .await?;

        average.ok_or(StoreError::NotFound)
    }
}
