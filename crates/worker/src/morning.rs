use anyhow::Context;
use std::io::Read;
use std::path::Path;
use stockdesk_core::payload::{self, ParsedBatch};
use stockdesk_core::storage::error::DuplicateRecommendation;
use stockdesk_core::storage::RecommendationStore;
use stockdesk_core::time::analysis_date::resolve_analysis_date;

pub fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

pub fn load_batch(file: Option<&Path>, analysis_date: Option<&str>) -> anyhow::Result<ParsedBatch> {
    let default_date = resolve_analysis_date(analysis_date, chrono::Utc::now())?;
    let text = read_input(file)?;
    payload::parse_batch(&text, Some(default_date))
}

pub async fn run(
    store: &RecommendationStore,
    file: Option<&Path>,
    analysis_date: Option<&str>,
) -> anyhow::Result<()> {
    let batch = load_batch(file, analysis_date)?;
    anyhow::ensure!(
        !batch.records.is_empty(),
        "payload held no valid recommendations ({} skipped)",
        batch.skipped.len()
    );

    match store.store(&batch.records).await {
        Ok(stored) => {
            tracing::info!(stored, skipped = batch.skipped.len(), "morning recommendations stored");
            Ok(())
        }
        Err(err) => {
            if let Some(dup) = err.downcast_ref::<DuplicateRecommendation>() {
                tracing::warn!(
                    stock_name = %dup.stock_name,
                    analysis_date = %dup.analysis_date,
                    "recommendation already stored; nothing written"
                );
            }
            Err(err)
        }
    }
}
