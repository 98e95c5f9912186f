use chrono::NaiveDate;
use stockdesk_core::domain::recommendation::{ClosingPrice, StockRecommendation};
use stockdesk_core::payload::parse_closing_prices;
use stockdesk_core::prices::review::{review_with_prices, ReviewOutcome};
use stockdesk_core::storage::RecommendationStore;
use tempfile::TempDir;

fn may(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
}

fn rec(name: &str, code: &str, analysis_date: NaiveDate) -> StockRecommendation {
    StockRecommendation {
        stock_name: name.to_string(),
        stock_code: code.to_string(),
        market: "USA".to_string(),
        buy_price: 10.0,
        target_price_daily: 10.5,
        target_price_weekly: 11.0,
        stop_loss: 9.0,
        analysis_date,
        day_end_price: None,
    }
}

fn price(code: &str, close: f64, analysis_date: NaiveDate) -> ClosingPrice {
    ClosingPrice {
        stock_name: String::new(),
        stock_code: code.to_string(),
        day_end_price: close,
        analysis_date,
    }
}

async fn seeded_store(dir: &TempDir) -> RecommendationStore {
    let store = RecommendationStore::open_fallback(&dir.path().join("review.db"), 1)
        .await
        .unwrap();
    store
        .store(&[
            rec("ACME", "ACM", may(1)),
            rec("GLOBEX", "GBX", may(1)),
            rec("ACME", "ACM", may(2)),
        ])
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn agent_prices_fill_only_the_review_date() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;

    let agent_output = r#"Closing prices:
```json
{"closing_prices": [
  {"stock_name": "ACME", "stock_code": "ACM", "day_end_price": "10.4"},
  {"stock_code": "GBX", "day_end_price": 121.0, "analysis_date": "2024-05-01"},
  {"stock_code": "ACM", "day_end_price": 99.0, "analysis_date": "2024-05-02"}
]}
```"#;
    let parsed = parse_closing_prices(agent_output, Some(may(1))).unwrap();
    assert!(parsed.skipped.is_empty());

    let outcome = review_with_prices(&store, may(1), parsed.records, false)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReviewOutcome {
            pending: 2,
            received: 2,
            updated: 2,
        }
    );
    assert!(store.pending_closing_prices(may(1)).await.unwrap().is_empty());

    // The other date is untouched.
    let may_second = store.fetch_recommendations(may(2)).await.unwrap();
    assert_eq!(may_second[0].day_end_price, None);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;

    let outcome = review_with_prices(&store, may(1), vec![price("ACM", 10.4, may(1))], true)
        .await
        .unwrap();
    assert_eq!(outcome.updated, 0);
    assert_eq!(outcome.received, 1);
    assert_eq!(store.pending_closing_prices(may(1)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn review_of_fully_priced_date_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    store
        .record_closing_prices(&[price("ACM", 10.4, may(2))])
        .await
        .unwrap();

    let outcome = review_with_prices(&store, may(2), vec![price("ACM", 50.0, may(2))], false)
        .await
        .unwrap();
    assert_eq!(outcome, ReviewOutcome::default());

    let rows = store.fetch_recommendations(may(2)).await.unwrap();
    assert_eq!(rows[0].day_end_price, Some(10.4));
}
