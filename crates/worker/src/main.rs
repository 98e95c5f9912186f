use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stockdesk_core::storage::{ConnectOptions, RecommendationStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod evening;
mod morning;

#[derive(Debug, Parser)]
#[command(name = "stockdesk_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a batch of agent recommendations (JSON from a file or stdin).
    Store {
        /// Payload file. Reads stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Date (YYYY-MM-DD) for items that carry none. Defaults to today's UTC date.
        #[arg(long)]
        analysis_date: Option<String>,

        /// Parse and validate only; do not write to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print every analysis date that has stored recommendations.
    Dates,

    /// Print the recommendations stored for a date as JSON.
    Show {
        #[arg(long)]
        date: String,

        /// morning, evening or full.
        #[arg(long, default_value = "full")]
        view: String,

        /// Comma separated column list; overrides --view.
        #[arg(long)]
        columns: Option<String>,
    },

    /// Fill in closing prices for a date's recommendations.
    Review {
        /// Review date (YYYY-MM-DD). Defaults to the newest stored date not in the future.
        #[arg(long)]
        date: Option<String>,

        /// Closing price JSON file. Reads stdin when omitted.
        #[arg(long)]
        prices_file: Option<PathBuf>,

        /// Resolve prices but do not write them.
        #[arg(long)]
        dry_run: bool,
    },
}

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

    let args = Args::parse();

    if let Command::Store {
        file,
        analysis_date,
        dry_run: true,
    } = &args.command
    {
        let batch = morning::load_batch(file.as_deref(), analysis_date.as_deref())?;
        tracing::info!(
            dry_run = true,
            valid = batch.records.len(),
            skipped = batch.skipped.len(),
            "recommendation payload parsed"
        );
        return Ok(());
    }

    let store = RecommendationStore::open(&ConnectOptions::from_settings(&settings)).await?;
    tracing::info!(backend = ?store.backend_kind(), "recommendation store ready");

    let res = run(args.command, &store).await;
    store.close().await;

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
    }
    res
}

async fn run(command: Command, store: &RecommendationStore) -> anyhow::Result<()> {
    match command {
        Command::Store {
            file,
            analysis_date,
            ..
        } => morning::run(store, file.as_deref(), analysis_date.as_deref()).await,
        Command::Dates => {
            let mut dates = store.list_analysis_dates().await?;
            dates.sort();
            for d in dates {
                println!("{d}");
            }
            Ok(())
        }
        Command::Show {
            date,
            view,
            columns,
        } => {
            let analysis_date = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("invalid --date {date:?} (expected YYYY-MM-DD)"))?;
            let columns = match columns {
                Some(c) => stockdesk_core::domain::recommendation::parse_columns(&c)?,
                None => view
                    .parse::<stockdesk_core::domain::recommendation::View>()?
                    .columns()
                    .to_vec(),
            };

            let rows = store.fetch_by_date(analysis_date, &columns).await?;
            if rows.is_empty() {
                tracing::info!(%analysis_date, "no recommendations stored for date");
            }
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(())
        }
        Command::Review {
            date,
            prices_file,
            dry_run,
        } => {
            evening::run(store, date.as_deref(), prices_file.as_deref(), dry_run).await
        }
    }
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
