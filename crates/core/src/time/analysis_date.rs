use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// The date a run files its rows under: the explicit `YYYY-MM-DD` argument,
/// else the current UTC date.
pub fn resolve_analysis_date(
    analysis_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = analysis_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid analysis date {s:?} (expected YYYY-MM-DD)"));
    }
    Ok(now_utc.date_naive())
}

/// Newest stored date that is not in the future; the default target of a
/// closing price review.
pub fn latest_reviewable_date(dates: &[NaiveDate], now_utc: DateTime<Utc>) -> Option<NaiveDate> {
    let today = now_utc.date_naive();
    dates.iter().copied().filter(|d| *d <= today).max()
}
