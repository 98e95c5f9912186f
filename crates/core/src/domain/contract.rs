use crate::domain::date::parse_date_text;
use crate::domain::recommendation::{ClosingPrice, StockRecommendation};
use anyhow::{bail, ensure, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_STOCK_NAME_LEN: usize = 150;
const MAX_STOCK_CODE_LEN: usize = 20;
const MAX_MARKET_LEN: usize = 20;

/// A recommendation as agents emit it. Every field is optional here so a bad
/// item can be reported instead of failing the whole payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRecommendation {
    #[serde(default)]
    pub stock_name: Option<String>,
    #[serde(default)]
    pub stock_code: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub buy_price: Option<Value>,
    #[serde(default)]
    pub target_price_daily: Option<Value>,
    #[serde(default)]
    pub target_price_weekly: Option<Value>,
    #[serde(default)]
    pub stop_loss: Option<Value>,
    #[serde(default, alias = "analysis_date_time")]
    pub analysis_date: Option<Value>,
    #[serde(default)]
    pub day_end_price: Option<Value>,
}

/// A closing price as the review step receives it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentClosingPrice {
    #[serde(default)]
    pub stock_name: Option<String>,
    #[serde(default)]
    pub stock_code: Option<String>,
    #[serde(default)]
    pub day_end_price: Option<Value>,
    #[serde(default, alias = "analysis_date_time")]
    pub analysis_date: Option<Value>,
}

impl AgentRecommendation {
    pub fn validate_and_into_record(
        self,
        default_date: Option<NaiveDate>,
    ) -> anyhow::Result<StockRecommendation> {
        let stock_name = required_text(self.stock_name, "stock_name", MAX_STOCK_NAME_LEN)?;
        let stock_code = required_text(self.stock_code, "stock_code", MAX_STOCK_CODE_LEN)?;
        let market = required_text(self.market, "market", MAX_MARKET_LEN)?;

        let buy_price = required_price(self.buy_price, "buy_price")?;
        let target_price_daily = required_price(self.target_price_daily, "target_price_daily")?;
        let target_price_weekly = required_price(self.target_price_weekly, "target_price_weekly")?;
        let stop_loss = optional_price(self.stop_loss, "stop_loss")?.unwrap_or(0.0);
        let day_end_price = optional_price(self.day_end_price, "day_end_price")?;

        let analysis_date = match optional_date(self.analysis_date)? {
            Some(d) => d,
            None => default_date.context("analysis_date is required")?,
        };

        Ok(StockRecommendation {
            stock_name,
            stock_code,
            market,
            buy_price,
            target_price_daily,
            target_price_weekly,
            stop_loss,
            analysis_date,
            day_end_price,
        })
    }
}

impl AgentClosingPrice {
    pub fn validate_and_into_price(
        self,
        default_date: Option<NaiveDate>,
    ) -> anyhow::Result<ClosingPrice> {
        let stock_name = self
            .stock_name
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let stock_code = self
            .stock_code
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        ensure!(
            !stock_name.is_empty() || !stock_code.is_empty(),
            "stock_name or stock_code is required"
        );

        let day_end_price = required_price(self.day_end_price, "day_end_price")?;
        let analysis_date = match optional_date(self.analysis_date)? {
            Some(d) => d,
            None => default_date.context("analysis_date is required")?,
        };

        Ok(ClosingPrice {
            stock_name,
            stock_code,
            day_end_price,
            analysis_date,
        })
    }
}

impl StockRecommendation {
    /// Checks a record built outside the agent contract against the same
    /// rules `validate_and_into_record` applies.
    pub fn validate(&self) -> anyhow::Result<()> {
        check_text(&self.stock_name, "stock_name", MAX_STOCK_NAME_LEN)?;
        check_text(&self.stock_code, "stock_code", MAX_STOCK_CODE_LEN)?;
        check_text(&self.market, "market", MAX_MARKET_LEN)?;
        check_price(self.buy_price, "buy_price")?;
        check_price(self.target_price_daily, "target_price_daily")?;
        check_price(self.target_price_weekly, "target_price_weekly")?;
        check_price(self.stop_loss, "stop_loss")?;
        if let Some(close) = self.day_end_price {
            check_price(close, "day_end_price")?;
        }
        Ok(())
    }
}

fn required_text(value: Option<String>, field: &str, max_len: usize) -> anyhow::Result<String> {
    let value = value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{field} must be non-empty"))?;
    check_text(&value, field, max_len)?;
    Ok(value)
}

fn check_text(value: &str, field: &str, max_len: usize) -> anyhow::Result<()> {
    ensure!(!value.trim().is_empty(), "{field} must be non-empty");
    ensure!(
        value.chars().count() <= max_len,
        "{field} must be at most {max_len} characters (got {})",
        value.chars().count()
    );
    Ok(())
}

fn required_price(value: Option<Value>, field: &str) -> anyhow::Result<f64> {
    optional_price(value, field)?.with_context(|| format!("{field} is required"))
}

/// Accepts JSON numbers and numeric strings ("12.5", " 12 ").
fn optional_price(value: Option<Value>, field: &str) -> anyhow::Result<Option<f64>> {
    let price = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .with_context(|| format!("{field} is not representable as f64"))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{field} is not a number: {s:?}"))?,
        Some(other) => bail!("{field} must be a number (got {other})"),
    };

    check_price(price, field).map(Some)
}

fn check_price(price: f64, field: &str) -> anyhow::Result<f64> {
    ensure!(price.is_finite(), "{field} must be finite (got {price})");
    ensure!(price >= 0.0, "{field} must be non-negative (got {price})");
    Ok(price)
}

fn optional_date(value: Option<Value>) -> anyhow::Result<Option<NaiveDate>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_date_text(&s)
            .map(Some)
            .with_context(|| format!("analysis_date is not a date: {s:?}")),
        Some(other) => bail!("analysis_date must be a string (got {other})"),
    }
}
