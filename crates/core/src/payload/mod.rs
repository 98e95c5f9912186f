//! Normalizes whatever the agents hand back into canonical records.
//!
//! Items that fail validation are skipped and reported; they never abort the
//! rest of the batch.

pub mod json;

use crate::domain::contract::{AgentClosingPrice, AgentRecommendation};
use crate::domain::recommendation::{ClosingPrice, StockRecommendation};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub skipped: Vec<SkippedItem>,
}

pub type ParsedBatch = Parsed<StockRecommendation>;
pub type ParsedClosingPrices = Parsed<ClosingPrice>;

/// Parses a recommendation payload: `{"stocks": [...]}`, a list, a single
/// object, or any of those as a JSON string or inside a markdown fence.
pub fn parse_batch(text: &str, default_date: Option<NaiveDate>) -> anyhow::Result<ParsedBatch> {
    batch_from_value(json::parse_value(text)?, default_date)
}

pub fn batch_from_value(
    value: Value,
    default_date: Option<NaiveDate>,
) -> anyhow::Result<ParsedBatch> {
    let items = json::items(value, "stocks")?;
    Ok(collect(items, |item| {
        serde_json::from_value::<AgentRecommendation>(item)?.validate_and_into_record(default_date)
    }))
}

/// Parses a closing price payload: `{"closing_prices": [...]}` or the same
/// shapes [`parse_batch`] accepts.
pub fn parse_closing_prices(
    text: &str,
    default_date: Option<NaiveDate>,
) -> anyhow::Result<ParsedClosingPrices> {
    closing_prices_from_value(json::parse_value(text)?, default_date)
}

pub fn closing_prices_from_value(
    value: Value,
    default_date: Option<NaiveDate>,
) -> anyhow::Result<ParsedClosingPrices> {
    let items = json::items(value, "closing_prices")?;
    Ok(collect(items, |item| {
        serde_json::from_value::<AgentClosingPrice>(item)?.validate_and_into_price(default_date)
    }))
}

fn collect<T>(
    items: Vec<Value>,
    mut convert: impl FnMut(Value) -> anyhow::Result<T>,
) -> Parsed<T> {
    let mut out = Parsed {
        records: Vec::with_capacity(items.len()),
        skipped: Vec::new(),
    };

    for (index, item) in items.into_iter().enumerate() {
        match convert(item) {
            Ok(record) => out.records.push(record),
            Err(err) => {
                tracing::warn!(index, error = %err, "skipping malformed payload item");
                out.skipped.push(SkippedItem {
                    index,
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    out
}
