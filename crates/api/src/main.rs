use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockdesk_core::domain::recommendation::{parse_columns, Column, ProjectedRow, View};
use stockdesk_core::payload::{self, SkippedItem};
use stockdesk_core::storage::error::is_duplicate;
use stockdesk_core::storage::{BackendKind, ConnectOptions, RecommendationStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = stockdesk_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let opts = ConnectOptions::from_settings(&settings);
    let store = match RecommendationStore::open(&opts).await {
        Ok(store) => {
            tracing::info!(backend = ?store.backend_kind(), "recommendation store ready");
            Some(Arc::new(store))
        }
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "no database available; starting API in degraded mode");
            None
        }
    };

    let state = AppState {
        store: store.clone(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/analysis-dates", get(list_analysis_dates))
        .route("/recommendations", post(store_recommendations))
        .route("/recommendations/:analysis_date", get(get_recommendations))
        .route("/closing-prices", post(record_closing_prices))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(store) = store {
        store.close().await;
    }

    Ok(())
}

#[derive(Debug, Clone)]
struct AppState {
    store: Option<Arc<RecommendationStore>>,
}

impl AppState {
    fn store(&self) -> Result<&RecommendationStore, StatusCode> {
        self.store
            .as_deref()
            .ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    backend: Option<BackendKind>,
}

async fn healthz(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        backend: state.store.as_ref().map(|s| s.backend_kind()),
    })
}

async fn list_analysis_dates(
    State(state): State<AppState>,
) -> Result<Json<Vec<NaiveDate>>, StatusCode> {
    let store = state.store()?;

    let mut dates = store.list_analysis_dates().await.map_err(internal_error)?;
    dates.sort_unstable_by(|a, b| b.cmp(a));
    Ok(Json(dates))
}

#[derive(Debug, Deserialize)]
struct RowsQuery {
    view: Option<String>,
    columns: Option<String>,
}

impl RowsQuery {
    fn columns(&self) -> anyhow::Result<Vec<Column>> {
        if let Some(columns) = &self.columns {
            return parse_columns(columns);
        }
        let view = match &self.view {
            Some(v) => v.parse::<View>()?,
            None => View::default(),
        };
        Ok(view.columns().to_vec())
    }
}

async fn get_recommendations(
    State(state): State<AppState>,
    Path(analysis_date): Path<String>,
    Query(query): Query<RowsQuery>,
) -> Result<Json<Vec<ProjectedRow>>, StatusCode> {
    let store = state.store()?;

    let analysis_date = parse_date(&analysis_date)?;
    let columns = query.columns().map_err(|e| {
        tracing::debug!(error = %e, "rejected column selection");
        StatusCode::BAD_REQUEST
    })?;

    let rows = store
        .fetch_by_date(analysis_date, &columns)
        .await
        .map_err(internal_error)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct DefaultDateQuery {
    default_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct StoreResponse {
    stored: u64,
    skipped: Vec<SkippedItem>,
}

async fn store_recommendations(
    State(state): State<AppState>,
    Query(query): Query<DefaultDateQuery>,
    body: String,
) -> Result<(StatusCode, Json<StoreResponse>), StatusCode> {
    let store = state.store()?;

    let default_date = query.default_date.as_deref().map(parse_date).transpose()?;
    let batch = payload::parse_batch(&body, default_date).map_err(|e| {
        tracing::warn!(error = %format!("{e:#}"), "rejected recommendation payload");
        StatusCode::BAD_REQUEST
    })?;

    if batch.records.is_empty() {
        tracing::warn!(skipped = batch.skipped.len(), "payload held no valid recommendations");
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let stored = store.store(&batch.records).await.map_err(|e| {
        if is_duplicate(&e) {
            StatusCode::CONFLICT
        } else {
            internal_error(e)
        }
    })?;

    Ok((
        StatusCode::CREATED,
        Json(StoreResponse {
            stored,
            skipped: batch.skipped,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct ClosingPricesResponse {
    updated: u64,
    skipped: Vec<SkippedItem>,
}

async fn record_closing_prices(
    State(state): State<AppState>,
    Query(query): Query<DefaultDateQuery>,
    body: String,
) -> Result<Json<ClosingPricesResponse>, StatusCode> {
    let store = state.store()?;

    let default_date = query.default_date.as_deref().map(parse_date).transpose()?;
    let parsed = payload::parse_closing_prices(&body, default_date).map_err(|e| {
        tracing::warn!(error = %format!("{e:#}"), "rejected closing price payload");
        StatusCode::BAD_REQUEST
    })?;

    let updated = store
        .record_closing_prices(&parsed.records)
        .await
        .map_err(internal_error)?;

    Ok(Json(ClosingPricesResponse {
        updated,
        skipped: parsed.skipped,
    }))
}

fn parse_date(s: &str) -> Result<NaiveDate, StatusCode> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &stockdesk_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_columns_override_view() {
        let q = RowsQuery {
            view: Some("morning".to_string()),
            columns: Some("stock_code,day_end_price".to_string()),
        };
        assert_eq!(
            q.columns().unwrap(),
            vec![Column::StockCode, Column::DayEndPrice]
        );
    }

    #[test]
    fn view_defaults_to_full() {
        let q = RowsQuery {
            view: None,
            columns: None,
        };
        assert_eq!(q.columns().unwrap(), Column::ALL.to_vec());
    }

    #[test]
    fn bad_view_is_rejected() {
        let q = RowsQuery {
            view: Some("noon".to_string()),
            columns: None,
        };
        assert!(q.columns().is_err());
    }

    #[test]
    fn parse_date_maps_to_bad_request() {
        assert_eq!(
            parse_date("2024-05-01"),
            Ok(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
        );
        assert_eq!(parse_date("May 1st"), Err(StatusCode::BAD_REQUEST));
    }

    async fn sqlite_state(dir: &tempfile::TempDir) -> AppState {
        let store = RecommendationStore::open_fallback(&dir.path().join("api.db"), 1)
            .await
            .unwrap();
        AppState {
            store: Some(Arc::new(store)),
        }
    }

    fn acme_payload() -> String {
        r#"{"stocks": [{
            "stock_name": "ACME", "stock_code": "ACM", "market": "USA",
            "buy_price": 10.0, "target_price_daily": 10.5, "target_price_weekly": 11.0,
            "analysis_date": "2024-05-01"
        }]}"#
            .to_string()
    }

    fn no_default_date() -> Query<DefaultDateQuery> {
        Query(DefaultDateQuery { default_date: None })
    }

    #[tokio::test]
    async fn store_maps_outcomes_to_status_codes() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = sqlite_state(&dir).await;

        let (status, Json(created)) =
            store_recommendations(State(state.clone()), no_default_date(), acme_payload())
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.stored, 1);

        let again =
            store_recommendations(State(state.clone()), no_default_date(), acme_payload()).await;
        assert_eq!(again.err(), Some(StatusCode::CONFLICT));

        let nothing_valid = store_recommendations(
            State(state.clone()),
            no_default_date(),
            r#"{"stocks": [{"stock_name": "BROKEN"}]}"#.to_string(),
        )
        .await;
        assert_eq!(nothing_valid.err(), Some(StatusCode::UNPROCESSABLE_ENTITY));

        let not_json =
            store_recommendations(State(state), no_default_date(), "no json here".to_string())
                .await;
        assert_eq!(not_json.err(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn degraded_mode_answers_service_unavailable() {
        let state = AppState { store: None };

        let stored =
            store_recommendations(State(state.clone()), no_default_date(), acme_payload()).await;
        assert_eq!(stored.err(), Some(StatusCode::SERVICE_UNAVAILABLE));

        let dates = list_analysis_dates(State(state.clone())).await;
        assert_eq!(dates.err(), Some(StatusCode::SERVICE_UNAVAILABLE));

        let Json(health) = healthz(State(state)).await;
        assert_eq!(health.backend, None);
    }

    #[tokio::test]
    async fn stored_rows_are_served_by_date() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = sqlite_state(&dir).await;
        store_recommendations(State(state.clone()), no_default_date(), acme_payload())
            .await
            .unwrap();

        let Json(dates) = list_analysis_dates(State(state.clone())).await.unwrap();
        assert_eq!(dates, vec![NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()]);

        let Json(rows) = get_recommendations(
            State(state.clone()),
            Path("2024-05-01".to_string()),
            Query(RowsQuery {
                view: Some("evening".to_string()),
                columns: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains_key("day_end_price"));
        assert!(!rows[0].contains_key("buy_price"));

        let bad_column = get_recommendations(
            State(state),
            Path("2024-05-01".to_string()),
            Query(RowsQuery {
                view: None,
                columns: Some("password".to_string()),
            }),
        )
        .await;
        assert_eq!(bad_column.err(), Some(StatusCode::BAD_REQUEST));
    }
}
