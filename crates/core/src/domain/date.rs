use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// An `analysis_date` value as the store hands it back. PostgreSQL returns a
/// real `DATE`, SQLite returns whatever text was written.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisDateValue {
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl AnalysisDateValue {
    pub fn normalize(&self) -> Option<NaiveDate> {
        match self {
            AnalysisDateValue::Date(d) => Some(*d),
            AnalysisDateValue::Timestamp(ts) => Some(ts.date()),
            AnalysisDateValue::Text(s) => parse_date_text(s),
        }
    }
}

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Reads a calendar date out of `YYYY-MM-DD`, RFC 3339, or a naive ISO
/// timestamp. Offsets are kept as written: `2024-05-01T23:00:00-05:00` is
/// 2024-05-01.
pub fn parse_date_text(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.date_naive());
    }
    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts.date());
        }
    }

    // e.g. "2024-05-01 00:00:00+00" or "2024-05-01Z"
    s.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}
