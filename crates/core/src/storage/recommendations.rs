use crate::domain::date::AnalysisDateValue;
use crate::domain::recommendation::{ClosingPrice, Column, ProjectedRow, StockRecommendation};
use crate::storage::error::DuplicateRecommendation;
use crate::storage::{connect, connect_fallback, Backend, BackendKind, ConnectOptions};
use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, SqlitePool};
use std::collections::BTreeSet;
use std::path::Path;

const INSERT_PG: &str = "INSERT INTO stock_market_data_analysis \
     (stock_name, stock_code, market, buy_price, target_price_daily, target_price_weekly, stop_loss, analysis_date, day_end_price) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)";
const INSERT_SQLITE: &str = "INSERT INTO stock_market_data_analysis \
     (stock_name, stock_code, market, buy_price, target_price_daily, target_price_weekly, stop_loss, analysis_date, day_end_price) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_BY_DATE_PG: &str = "SELECT stock_name, stock_code, market, buy_price, target_price_daily, \
     target_price_weekly, stop_loss, analysis_date, day_end_price \
     FROM stock_market_data_analysis \
     WHERE analysis_date = $1 \
     ORDER BY stock_name ASC";
// SQLite keeps whatever text was written, so compare on date() and read the raw text back.
const SELECT_BY_DATE_SQLITE: &str = "SELECT stock_name, stock_code, market, buy_price, target_price_daily, \
     target_price_weekly, stop_loss, CAST(analysis_date AS TEXT), day_end_price \
     FROM stock_market_data_analysis \
     WHERE date(analysis_date) = date(?) \
     ORDER BY stock_name ASC";

const DISTINCT_DATES_PG: &str = "SELECT DISTINCT analysis_date FROM stock_market_data_analysis";
const DISTINCT_DATES_SQLITE: &str =
    "SELECT DISTINCT CAST(analysis_date AS TEXT) FROM stock_market_data_analysis";

const UPDATE_CLOSE_BY_NAME_PG: &str = "UPDATE stock_market_data_analysis SET day_end_price = $1 \
     WHERE analysis_date = $2 AND day_end_price IS NULL AND stock_name = $3";
const UPDATE_CLOSE_BY_CODE_PG: &str = "UPDATE stock_market_data_analysis SET day_end_price = $1 \
     WHERE analysis_date = $2 AND day_end_price IS NULL AND stock_code = $3";
const UPDATE_CLOSE_BY_NAME_SQLITE: &str = "UPDATE stock_market_data_analysis SET day_end_price = ? \
     WHERE date(analysis_date) = date(?) AND day_end_price IS NULL AND stock_name = ?";
const UPDATE_CLOSE_BY_CODE_SQLITE: &str = "UPDATE stock_market_data_analysis SET day_end_price = ? \
     WHERE date(analysis_date) = date(?) AND day_end_price IS NULL AND stock_code = ?";

// The primary key compares raw text on SQLite, so same-day rows written as
// timestamps would slip past it.
const EXISTS_FOR_DAY_SQLITE: &str = "SELECT 1 FROM stock_market_data_analysis \
     WHERE stock_name = ? AND date(analysis_date) = date(?) LIMIT 1";

type PgRecommendationRow = (String, String, String, f64, f64, f64, f64, NaiveDate, Option<f64>);
type SqliteRecommendationRow = (String, String, String, f64, f64, f64, f64, String, Option<f64>);

/// Durable storage for recommendation rows.
///
/// Built once at startup, shared by reference, and closed at shutdown. Every
/// call checks a connection out of the pool and returns it when done.
#[derive(Debug, Clone)]
pub struct RecommendationStore {
    backend: Backend,
}

impl RecommendationStore {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub async fn open(opts: &ConnectOptions) -> anyhow::Result<Self> {
        Ok(Self::new(connect(opts).await?))
    }

    /// Opens the file store directly, skipping the primary.
    pub async fn open_fallback(path: &Path, max_connections: u32) -> anyhow::Result<Self> {
        let pool = connect_fallback(path, max_connections).await?;
        Ok(Self::new(Backend::Fallback(pool)))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub async fn close(&self) {
        match &self.backend {
            Backend::Primary(pool) => pool.close().await,
            Backend::Fallback(pool) => pool.close().await,
        }
    }

    /// Inserts every record in one transaction. Records are validated first
    /// and nothing is written if one fails. Any failure rolls the whole
    /// call back; a duplicate (`stock_name`, `analysis_date`) surfaces as
    /// [`DuplicateRecommendation`].
    pub async fn store(&self, records: &[StockRecommendation]) -> anyhow::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let res = match records.iter().try_for_each(StockRecommendation::validate) {
            Err(err) => Err(err),
            Ok(()) => match &self.backend {
                Backend::Primary(pool) => store_pg(pool, records).await,
                Backend::Fallback(pool) => store_sqlite(pool, records).await,
            },
        };

        match &res {
            Ok(stored) => tracing::info!(stored, "stored stock analysis rows"),
            Err(err) => tracing::error!(
                rows = records.len(),
                error = %format!("{err:#}"),
                "failed to store stock analysis rows; batch rolled back"
            ),
        }
        res
    }

    /// Distinct analysis dates, each once. Values that do not read as a date
    /// are dropped with a warning. Callers must not rely on the order.
    pub async fn list_analysis_dates(&self) -> anyhow::Result<Vec<NaiveDate>> {
        let raw: Vec<AnalysisDateValue> = match &self.backend {
            Backend::Primary(pool) => sqlx::query_scalar::<_, NaiveDate>(DISTINCT_DATES_PG)
                .persistent(false)
                .fetch_all(pool)
                .await
                .context("select distinct analysis_date failed")?
                .into_iter()
                .map(AnalysisDateValue::Date)
                .collect(),
            Backend::Fallback(pool) => sqlx::query_scalar::<_, String>(DISTINCT_DATES_SQLITE)
                .fetch_all(pool)
                .await
                .context("select distinct analysis_date failed")?
                .into_iter()
                .map(AnalysisDateValue::Text)
                .collect(),
        };

        let dates = normalize_dates(raw);
        tracing::debug!(count = dates.len(), "listed stock analysis dates");
        Ok(dates)
    }

    /// Rows for `analysis_date`, projected to `columns`. No match is an empty
    /// result, not an error.
    pub async fn fetch_by_date(
        &self,
        analysis_date: NaiveDate,
        columns: &[Column],
    ) -> anyhow::Result<Vec<ProjectedRow>> {
        let rows = self.fetch_recommendations(analysis_date).await?;
        Ok(rows.iter().map(|r| r.project(columns)).collect())
    }

    pub async fn fetch_recommendations(
        &self,
        analysis_date: NaiveDate,
    ) -> anyhow::Result<Vec<StockRecommendation>> {
        match &self.backend {
            Backend::Primary(pool) => {
                let rows = sqlx::query_as::<_, PgRecommendationRow>(SELECT_BY_DATE_PG)
                    .persistent(false)
                    .bind(analysis_date)
                    .fetch_all(pool)
                    .await
                    .with_context(|| format!("select rows for {analysis_date} failed"))?;
                Ok(rows.into_iter().map(from_pg_row).collect())
            }
            Backend::Fallback(pool) => {
                let rows = sqlx::query_as::<_, SqliteRecommendationRow>(SELECT_BY_DATE_SQLITE)
                    .bind(analysis_date)
                    .fetch_all(pool)
                    .await
                    .with_context(|| format!("select rows for {analysis_date} failed"))?;
                Ok(rows
                    .into_iter()
                    .map(|row| from_sqlite_row(row, analysis_date))
                    .collect())
            }
        }
    }

    /// Rows of `analysis_date` still waiting for their closing price.
    pub async fn pending_closing_prices(
        &self,
        analysis_date: NaiveDate,
    ) -> anyhow::Result<Vec<StockRecommendation>> {
        let mut rows = self.fetch_recommendations(analysis_date).await?;
        rows.retain(|r| r.day_end_price.is_none());
        Ok(rows)
    }

    /// Fills `day_end_price` for the matching row of the same date: by
    /// `stock_name`, or by `stock_code` when the price carries no name. A row
    /// that already has a closing price is left alone. A price matching more
    /// than one row fails the call and rolls it back. Returns the number of
    /// rows updated.
    pub async fn record_closing_prices(&self, prices: &[ClosingPrice]) -> anyhow::Result<u64> {
        if prices.is_empty() {
            return Ok(0);
        }

        let res = match &self.backend {
            Backend::Primary(pool) => record_closing_prices_pg(pool, prices).await,
            Backend::Fallback(pool) => record_closing_prices_sqlite(pool, prices).await,
        };

        match &res {
            Ok(updated) => tracing::info!(
                updated,
                received = prices.len(),
                "recorded closing prices"
            ),
            Err(err) => tracing::error!(
                error = %format!("{err:#}"),
                "failed to record closing prices; batch rolled back"
            ),
        }
        res
    }
}

async fn store_pg(pool: &PgPool, records: &[StockRecommendation]) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    for record in records {
        sqlx::query(INSERT_PG)
            .persistent(false)
            .bind(&record.stock_name)
            .bind(&record.stock_code)
            .bind(&record.market)
            .bind(record.buy_price)
            .bind(record.target_price_daily)
            .bind(record.target_price_weekly)
            .bind(record.stop_loss)
            .bind(record.analysis_date)
            .bind(record.day_end_price)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error(e, record))?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(records.len() as u64)
}

async fn store_sqlite(pool: &SqlitePool, records: &[StockRecommendation]) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    for record in records {
        let existing = sqlx::query_scalar::<_, i64>(EXISTS_FOR_DAY_SQLITE)
            .bind(&record.stock_name)
            .bind(record.analysis_date)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "duplicate check failed (stock_name={}, analysis_date={})",
                    record.stock_name, record.analysis_date
                )
            })?;
        if existing.is_some() {
            return Err(duplicate(record));
        }

        sqlx::query(INSERT_SQLITE)
            .bind(&record.stock_name)
            .bind(&record.stock_code)
            .bind(&record.market)
            .bind(record.buy_price)
            .bind(record.target_price_daily)
            .bind(record.target_price_weekly)
            .bind(record.stop_loss)
            .bind(record.analysis_date)
            .bind(record.day_end_price)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error(e, record))?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(records.len() as u64)
}

async fn record_closing_prices_pg(pool: &PgPool, prices: &[ClosingPrice]) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut updated: u64 = 0;
    for price in prices {
        let (sql, key) = match price_key(price) {
            PriceKey::Name(name) => (UPDATE_CLOSE_BY_NAME_PG, name),
            PriceKey::Code(code) => (UPDATE_CLOSE_BY_CODE_PG, code),
        };
        let res = sqlx::query(sql)
            .persistent(false)
            .bind(price.day_end_price)
            .bind(price.analysis_date)
            .bind(key)
            .execute(&mut *tx)
            .await
            .with_context(|| update_context(price))?;
        updated += note_update(price, res.rows_affected())?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(updated)
}

async fn record_closing_prices_sqlite(
    pool: &SqlitePool,
    prices: &[ClosingPrice],
) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let mut updated: u64 = 0;
    for price in prices {
        let (sql, key) = match price_key(price) {
            PriceKey::Name(name) => (UPDATE_CLOSE_BY_NAME_SQLITE, name),
            PriceKey::Code(code) => (UPDATE_CLOSE_BY_CODE_SQLITE, code),
        };
        let res = sqlx::query(sql)
            .bind(price.day_end_price)
            .bind(price.analysis_date)
            .bind(key)
            .execute(&mut *tx)
            .await
            .with_context(|| update_context(price))?;
        updated += note_update(price, res.rows_affected())?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(updated)
}

fn duplicate(record: &StockRecommendation) -> anyhow::Error {
    DuplicateRecommendation {
        stock_name: record.stock_name.clone(),
        analysis_date: record.analysis_date,
    }
    .into()
}

fn insert_error(err: sqlx::Error, record: &StockRecommendation) -> anyhow::Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return duplicate(record);
        }
    }

    anyhow::Error::new(err).context(format!(
        "insert stock_market_data_analysis failed (stock_name={}, analysis_date={})",
        record.stock_name, record.analysis_date
    ))
}

fn update_context(price: &ClosingPrice) -> String {
    format!(
        "update day_end_price failed (stock_name={}, stock_code={}, analysis_date={})",
        price.stock_name, price.stock_code, price.analysis_date
    )
}

enum PriceKey<'a> {
    Name(&'a str),
    Code(&'a str),
}

// The name is the row identity; the code is only a fallback for nameless prices.
fn price_key(price: &ClosingPrice) -> PriceKey<'_> {
    if price.stock_name.trim().is_empty() {
        PriceKey::Code(price.stock_code.trim())
    } else {
        PriceKey::Name(price.stock_name.trim())
    }
}

fn note_update(price: &ClosingPrice, affected: u64) -> anyhow::Result<u64> {
    anyhow::ensure!(
        affected <= 1,
        "closing price matched {affected} rows (stock_name={}, stock_code={}, analysis_date={})",
        price.stock_name,
        price.stock_code,
        price.analysis_date
    );
    if affected == 0 {
        tracing::warn!(
            stock_name = %price.stock_name,
            stock_code = %price.stock_code,
            analysis_date = %price.analysis_date,
            "no unpriced recommendation matched closing price"
        );
    }
    Ok(affected)
}

fn from_pg_row(row: PgRecommendationRow) -> StockRecommendation {
    let (
        stock_name,
        stock_code,
        market,
        buy_price,
        target_price_daily,
        target_price_weekly,
        stop_loss,
        analysis_date,
        day_end_price,
    ) = row;

    StockRecommendation {
        stock_name,
        stock_code,
        market,
        buy_price,
        target_price_daily,
        target_price_weekly,
        stop_loss,
        analysis_date,
        day_end_price,
    }
}

// `queried` is what the row matched on through date(), so it is the row's date.
fn from_sqlite_row(row: SqliteRecommendationRow, queried: NaiveDate) -> StockRecommendation {
    let (
        stock_name,
        stock_code,
        market,
        buy_price,
        target_price_daily,
        target_price_weekly,
        stop_loss,
        raw_date,
        day_end_price,
    ) = row;

    let analysis_date = AnalysisDateValue::Text(raw_date)
        .normalize()
        .unwrap_or(queried);

    StockRecommendation {
        stock_name,
        stock_code,
        market,
        buy_price,
        target_price_daily,
        target_price_weekly,
        stop_loss,
        analysis_date,
        day_end_price,
    }
}

fn normalize_dates(raw: Vec<AnalysisDateValue>) -> Vec<NaiveDate> {
    let mut out = BTreeSet::new();
    for value in raw {
        match value.normalize() {
            Some(d) => {
                out.insert(d);
            }
            None => tracing::warn!(value = ?value, "skipping unreadable analysis_date"),
        }
    }
    out.into_iter().collect()
}
