pub mod error;
pub mod recommendations;

pub use recommendations::RecommendationStore;

use crate::config::Settings;
use anyhow::Context;
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

// Every statement in ./migrations must stay valid for both PostgreSQL and SQLite.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

/// The store a process ended up on.
#[derive(Debug, Clone)]
pub enum Backend {
    Primary(PgPool),
    Fallback(SqlitePool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Primary,
    Fallback,
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Primary(_) => BackendKind::Primary,
            Backend::Fallback(_) => BackendKind::Fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub primary_url: String,
    pub fallback_path: PathBuf,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            primary_url: settings.primary_database_url().to_string(),
            fallback_path: PathBuf::from(settings.fallback_database_path()),
            max_connections: settings.database_max_connections(),
            connect_timeout: settings.database_connect_timeout(),
        }
    }
}

/// Opens the primary store, or the fallback file store when the primary
/// cannot be connected to or migrated.
pub async fn connect(opts: &ConnectOptions) -> anyhow::Result<Backend> {
    match connect_primary(&opts.primary_url, opts.max_connections, opts.connect_timeout).await {
        Ok(pool) => {
            tracing::info!("primary database initialized");
            Ok(Backend::Primary(pool))
        }
        Err(err) => {
            tracing::warn!(
                error = %format!("{err:#}"),
                fallback_path = %opts.fallback_path.display(),
                "primary database unavailable; falling back to local SQLite"
            );
            let pool = connect_fallback(&opts.fallback_path, opts.max_connections).await?;
            tracing::info!("fallback SQLite database initialized");
            Ok(Backend::Fallback(pool))
        }
    }
}

pub async fn connect_primary(
    url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(url)
        .await
        .context("connect primary database failed")?;

    if let Err(err) = migrate_postgres(&pool).await {
        pool.close().await;
        return Err(err);
    }
    Ok(pool)
}

pub async fn connect_fallback(path: &Path, max_connections: u32) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create fallback database dir failed: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("open fallback database failed: {}", path.display()))?;

    migrate_sqlite(&pool).await?;
    Ok(pool)
}

pub async fn migrate_postgres(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("sqlx migrations failed (primary)")?;
    Ok(())
}

pub async fn migrate_sqlite(pool: &SqlitePool) -> anyhow::Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("sqlx migrations failed (fallback)")?;
    Ok(())
}
