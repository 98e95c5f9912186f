use crate::domain::recommendation::ClosingPrice;
use crate::storage::RecommendationStore;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    /// Rows of the date still missing a closing price before the review.
    pub pending: usize,
    /// Prices usable for the date.
    pub received: usize,
    pub updated: u64,
}

/// Closing price review from prices gathered elsewhere (e.g. an agent run).
/// Prices for other dates are dropped; `dry_run` reports without writing.
pub async fn review_with_prices(
    store: &RecommendationStore,
    analysis_date: NaiveDate,
    prices: Vec<ClosingPrice>,
    dry_run: bool,
) -> anyhow::Result<ReviewOutcome> {
    let pending = store.pending_closing_prices(analysis_date).await?;
    if pending.is_empty() {
        tracing::info!(%analysis_date, "no recommendations awaiting a closing price");
        return Ok(ReviewOutcome::default());
    }
    apply(store, analysis_date, pending.len(), prices, dry_run).await
}

async fn apply(
    store: &RecommendationStore,
    analysis_date: NaiveDate,
    pending: usize,
    mut prices: Vec<ClosingPrice>,
    dry_run: bool,
) -> anyhow::Result<ReviewOutcome> {
    let before = prices.len();
    prices.retain(|p| p.analysis_date == analysis_date);
    if prices.len() != before {
        tracing::warn!(
            %analysis_date,
            dropped = before - prices.len(),
            "ignoring closing prices for other dates"
        );
    }

    let received = prices.len();
    if dry_run {
        tracing::info!(%analysis_date, pending, received, dry_run = true, "closing price review");
        return Ok(ReviewOutcome {
            pending,
            received,
            updated: 0,
        });
    }

    let updated = store.record_closing_prices(&prices).await?;
    Ok(ReviewOutcome {
        pending,
        received,
        updated,
    })
}
