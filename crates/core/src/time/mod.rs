pub mod analysis_date;
