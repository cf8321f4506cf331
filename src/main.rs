//! CLI entry point for the trip tracker.
//!
//! Manages the schema, loads reference data, ingests trip updates and
//! prints live or historical positions as GeoJSON.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use trip_tracker::{
    config::{Config, REQUIRED_VARIABLES},
    fetch::BasicClient,
    ingest::Ingestor,
    model::{NewTripUpdate, ReferenceData, TripUpdate},
    output::{append_records, write_geojson},
    projection::project,
    query::QueryEngine,
    static_feed::StaticFeed,
    store::{PgStore, ReferenceStore, schema},
};

#[derive(Parser)]
#[command(name = "trip_tracker")]
#[command(about = "Record and query live subway trip updates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the static schedule archive unless it is already cached
    FetchStatic,
    #[command(flatten)]
    Database(DatabaseCommands),
}

/// Subcommands that need a database connection.
#[derive(Subcommand)]
enum DatabaseCommands {
    /// Create the routes, stops, trips and trip_updates tables
    InitSchema,
    /// Drop all tables
    DropSchema,
    /// Load routes, stops and trips from a JSON document
    LoadReference {
        #[arg(value_name = "FILE")]
        file: String,
    },
    /// Ingest trip updates from a JSON-lines file
    Ingest {
        #[arg(value_name = "FILE")]
        file: String,
    },
    /// Latest position of every trip heard from in the last 20 minutes
    Live {
        /// GeoJSON file to write (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Last 24 hours of one trip
    Trip {
        id: String,
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Last 24 hours of every trip on a route
    Route {
        id: String,
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Every update at a station's platforms
    Station {
        id: String,
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Append the full update history (identifiers only) to a CSV file
    Dump {
        #[arg(short, long, default_value = "trip_updates.csv")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_logging()?;

    let cli = Cli::parse();

    let config = Config::from_env().inspect_err(|e| {
        error!(
            "config: {e}. Check all required environment variables ({}) are set.",
            REQUIRED_VARIABLES.join(", ")
        );
    })?;
    config.log();

    let command = match cli.command {
        Commands::FetchStatic => return fetch_static(&config).await,
        Commands::Database(command) => command,
    };

    let store = Arc::new(
        PgStore::connect(&config)
            .await
            .context("connecting to database")?,
    );
    info!("Connected to database");

    match command {
        DatabaseCommands::InitSchema => schema::create_schema(store.pool()).await?,
        DatabaseCommands::DropSchema => schema::drop_schema(store.pool()).await?,
        DatabaseCommands::LoadReference { file } => {
            let content = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let data: ReferenceData =
                serde_json::from_str(&content).with_context(|| format!("parsing {file}"))?;
            store.load_reference(&data).await?;
        }
        DatabaseCommands::Ingest { file } => {
            let ingestor = Ingestor::new(store).with_heal_attempts(config.heal_attempts);
            ingest_file(&ingestor, &file).await?;
        }
        DatabaseCommands::Live { output } => {
            let updates = QueryEngine::new(store).live().await?;
            emit(&updates, output)?;
        }
        DatabaseCommands::Trip { id, output } => {
            let updates = QueryEngine::new(store).by_trip(&id).await?;
            emit(&updates, output)?;
        }
        DatabaseCommands::Route { id, output } => {
            let updates = QueryEngine::new(store).by_route(&id).await?;
            emit(&updates, output)?;
        }
        DatabaseCommands::Station { id, output } => {
            let updates = QueryEngine::new(store).by_station(&id).await?;
            emit(&updates, output)?;
        }
        DatabaseCommands::Dump { output } => {
            let records = QueryEngine::new(store).all().await?;
            append_records(&output, &records)?;
            info!(rows = records.len(), output = %output, "History dumped");
        }
    }

    Ok(())
}

async fn fetch_static(config: &Config) -> Result<()> {
    let feed = StaticFeed::new(
        BasicClient::new()?,
        config.static_feed_url.as_str(),
        config.static_cache_dir.as_str(),
    );
    let paths = feed.paths().await?;
    info!(
        routes = %paths.routes.display(),
        stops = %paths.stops.display(),
        shapes = %paths.shapes.display(),
        "Static feed ready"
    );
    Ok(())
}

/// Colored stderr plus a JSON rolling log file. The returned guard flushes
/// the file writer on drop.
fn init_logging() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/trip_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("trip_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(file_guard)
}

fn emit(updates: &[TripUpdate], output: Option<String>) -> Result<()> {
    write_geojson(output.as_deref(), &project(updates))?;
    info!(features = updates.len(), "GeoJSON emitted");
    Ok(())
}

/// Ingests one update per line. Every line is attempted; the command fails
/// afterwards if any of them could not be recorded.
#[tracing::instrument(skip(ingestor))]
async fn ingest_file(ingestor: &Ingestor<PgStore>, file: &str) -> Result<()> {
    let content = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;

    let mut recorded = 0;
    let mut failed = 0;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let update: NewTripUpdate = match serde_json::from_str(line) {
            Ok(update) => update,
            Err(e) => {
                warn!(line = line_no, error = %e, "Malformed trip update");
                failed += 1;
                continue;
            }
        };

        match ingestor.insert(&update).await {
            Ok(_) => recorded += 1,
            Err(e) => {
                error!(line = line_no, error = %e, "Trip update ingestion failed");
                failed += 1;
            }
        }
    }

    info!(recorded, failed, "Ingestion finished");
    if failed > 0 {
        bail!("{failed} trip update(s) could not be ingested");
    }
    Ok(())
}
