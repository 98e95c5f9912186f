use anyhow::Context;
use std::path::Path;
use stockdesk_core::payload;
use stockdesk_core::prices::review::review_with_prices;
use stockdesk_core::storage::RecommendationStore;
use stockdesk_core::time::analysis_date::{latest_reviewable_date, resolve_analysis_date};

use crate::morning::read_input;

pub async fn run(
    store: &RecommendationStore,
    date: Option<&str>,
    prices_file: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    let review_date = match date {
        Some(_) => resolve_analysis_date(date, now)?,
        None => {
            let dates = store.list_analysis_dates().await?;
            latest_reviewable_date(&dates, now).context("no stored recommendations to review")?
        }
    };

    let text = read_input(prices_file)?;
    let parsed = payload::parse_closing_prices(&text, Some(review_date))?;
    if !parsed.skipped.is_empty() {
        tracing::warn!(skipped = parsed.skipped.len(), "some closing prices were malformed");
    }
    let outcome = review_with_prices(store, review_date, parsed.records, dry_run).await?;

    tracing::info!(
        %review_date,
        pending = outcome.pending,
        received = outcome.received,
        updated = outcome.updated,
        dry_run,
        "evening review finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
