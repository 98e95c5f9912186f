use chrono::NaiveDate;
use std::fmt;

/// A row with the same (`stock_name`, `analysis_date`) already exists.
///
/// Stores reject duplicates instead of overwriting; the batch that hit this
/// was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRecommendation {
    pub stock_name: String,
    pub analysis_date: NaiveDate,
}

impl fmt::Display for DuplicateRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recommendation already stored (stock_name={}, analysis_date={})",
            self.stock_name, self.analysis_date
        )
    }
}

impl std::error::Error for DuplicateRecommendation {}

pub fn is_duplicate(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DuplicateRecommendation>().is_some()
}
