use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// One stock's buy/target/stop-loss analysis for a market and date.
///
/// Identity is (`stock_name`, `analysis_date`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecommendation {
    pub stock_name: String,
    pub stock_code: String,
    pub market: String,
    pub buy_price: f64,
    pub target_price_daily: f64,
    pub target_price_weekly: f64,
    #[serde(default)]
    pub stop_loss: f64,
    pub analysis_date: NaiveDate,
    #[serde(default)]
    pub day_end_price: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationList {
    pub stocks: Vec<StockRecommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingPrice {
    pub stock_name: String,
    pub stock_code: String,
    pub day_end_price: f64,
    pub analysis_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosingPriceList {
    pub closing_prices: Vec<ClosingPrice>,
}

/// A row reduced to a caller-chosen set of columns, keyed by column name.
pub type ProjectedRow = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    StockName,
    StockCode,
    Market,
    BuyPrice,
    TargetPriceDaily,
    TargetPriceWeekly,
    StopLoss,
    AnalysisDate,
    DayEndPrice,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::StockName,
        Column::StockCode,
        Column::Market,
        Column::BuyPrice,
        Column::TargetPriceDaily,
        Column::TargetPriceWeekly,
        Column::StopLoss,
        Column::AnalysisDate,
        Column::DayEndPrice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Column::StockName => "stock_name",
            Column::StockCode => "stock_code",
            Column::Market => "market",
            Column::BuyPrice => "buy_price",
            Column::TargetPriceDaily => "target_price_daily",
            Column::TargetPriceWeekly => "target_price_weekly",
            Column::StopLoss => "stop_loss",
            Column::AnalysisDate => "analysis_date",
            Column::DayEndPrice => "day_end_price",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Column::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown column: {s}"))
    }
}

/// Parses a comma separated column list such as `stock_name,buy_price`.
pub fn parse_columns(s: &str) -> anyhow::Result<Vec<Column>> {
    let columns = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Column::from_str)
        .collect::<anyhow::Result<Vec<_>>>()?;
    anyhow::ensure!(!columns.is_empty(), "column list must be non-empty");
    Ok(columns)
}

/// Preset projections used by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    /// Fresh recommendations; the closing price is not known yet.
    Morning,
    /// Closing price review.
    Evening,
    #[default]
    Full,
}

impl View {
    pub fn columns(self) -> &'static [Column] {
        match self {
            View::Morning => &[
                Column::StockName,
                Column::StockCode,
                Column::Market,
                Column::BuyPrice,
                Column::TargetPriceDaily,
                Column::TargetPriceWeekly,
                Column::StopLoss,
                Column::AnalysisDate,
            ],
            View::Evening => &[
                Column::StockName,
                Column::StockCode,
                Column::DayEndPrice,
                Column::AnalysisDate,
            ],
            View::Full => &Column::ALL,
        }
    }
}

impl FromStr for View {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(View::Morning),
            "evening" => Ok(View::Evening),
            "full" | "all" => Ok(View::Full),
            other => anyhow::bail!("unknown view: {other} (expected morning, evening or full)"),
        }
    }
}

impl StockRecommendation {
    pub fn value_of(&self, column: Column) -> Value {
        match column {
            Column::StockName => Value::from(self.stock_name.clone()),
            Column::StockCode => Value::from(self.stock_code.clone()),
            Column::Market => Value::from(self.market.clone()),
            Column::BuyPrice => Value::from(self.buy_price),
            Column::TargetPriceDaily => Value::from(self.target_price_daily),
            Column::TargetPriceWeekly => Value::from(self.target_price_weekly),
            Column::StopLoss => Value::from(self.stop_loss),
            Column::AnalysisDate => Value::from(self.analysis_date.to_string()),
            Column::DayEndPrice => self.day_end_price.map(Value::from).unwrap_or(Value::Null),
        }
    }

    pub fn project(&self, columns: &[Column]) -> ProjectedRow {
        let mut row = Map::with_capacity(columns.len());
        for &column in columns {
            row.insert(column.as_str().to_string(), self.value_of(column));
        }
        row
    }
}
