//! beaconlens - behavioral telemetry server
//!
//! Receives beacon and direct events, correlates them into sessions, and
//! serves scoped analytics.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/beaconlens/data.db (~/.local/share/beaconlens/data.db)
//! - Logs: $XDG_STATE_HOME/beaconlens/beaconlens.log (~/.local/state/beaconlens/beaconlens.log)
//! - Config: $XDG_CONFIG_HOME/beaconlens/config.toml (~/.config/beaconlens/config.toml)

use anyhow::{Context, Result};
use beaconlens::server::AppState;
use beaconlens_core::analytics::{HeatmapQuery, SummaryQuery};
use beaconlens_core::config::MAX_WINDOW_DAYS;
use beaconlens_core::{AnalyticsEngine, Config, ConfigScopeResolver, Database, ScopeResolver};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "beaconlens")]
#[command(about = "Behavioral telemetry ingestion and exit analytics")]
#[command(version)]
struct Args {
    /// Config file (defaults to the XDG config path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging to stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Override `server.bind`
        #[arg(long)]
        bind: Option<String>,
    },
    /// Create or upgrade the database schema
    Migrate,
    /// Print the analytics report for an API key as JSON
    Report {
        /// API key whose scope the report covers
        #[arg(long)]
        api_key: String,

        /// Restrict to one domain id
        #[arg(long)]
        domain_id: Option<i64>,

        /// Trailing window in days
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_DAYS))]
        days: Option<i64>,

        /// Print the heatmap report instead of the summary
        #[arg(long)]
        heatmap: bool,
    },
    /// Print one session and its events as JSON
    Session {
        /// Client-supplied session id
        session_id: String,
    },
    /// Validate the configuration and print what it resolves to
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if args.verbose > 0 {
        config.logging.stderr = true;
        config.logging.level = if args.verbose > 1 { "trace" } else { "debug" }.to_string();
    }

    let _log_guard =
        beaconlens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Serve { bind } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(serve(config, bind))
        }
        Command::Migrate => migrate(&config),
        Command::Report {
            api_key,
            domain_id,
            days,
            heatmap,
        } => report(&config, &api_key, domain_id, days, heatmap),
        Command::Session { session_id } => show_session(&config, &session_id),
        Command::CheckConfig => check_config(&config),
    }
}

fn open_database(config: &Config) -> Result<Database> {
    let db_path = config.resolved_database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(db)
}

async fn serve(config: Config, bind: Option<String>) -> Result<()> {
    let db = Arc::new(open_database(&config)?);
    let (state, workers) = AppState::from_config(&config, db);

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(
        addr = %addr,
        domains = config.domains.len(),
        api_keys = config.api_keys.len(),
        "beaconlens listening"
    );
    println!("Listening on http://{}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
    };

    beaconlens::server::serve(listener, state, workers, shutdown)
        .await
        .context("server error")?;

    tracing::info!("beaconlens stopped");
    Ok(())
}

fn migrate(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let counts = db.counts().context("failed to read row counts")?;

    println!("Database: {}", config.resolved_database_path().display());
    println!(
        "Schema up to date: {} sessions ({} active), {} events",
        counts.sessions, counts.active_sessions, counts.events
    );
    Ok(())
}

fn report(
    config: &Config,
    api_key: &str,
    domain_id: Option<i64>,
    days: Option<i64>,
    heatmap: bool,
) -> Result<()> {
    let scope = ConfigScopeResolver::from_config(config)
        .resolve(Some(api_key))
        .context("failed to resolve API key")?;

    let db = Arc::new(open_database(config)?);
    let engine = AnalyticsEngine::new(db, config.analytics.clone());
    let now = Utc::now();

    let json = if heatmap {
        let query = HeatmapQuery {
            domain_id,
            window: engine.heatmap_window(days, now),
            page: None,
        };
        let report = engine
            .heatmap_report(&scope, &query)
            .context("failed to compute heatmap")?;
        serde_json::to_string_pretty(&report)?
    } else {
        let window = match days {
            Some(days) => beaconlens_core::TimeWindow::trailing_days(days, now),
            None => engine.default_window(now),
        };
        let query = SummaryQuery {
            domain_id,
            window,
            limit: None,
        };
        let report = engine
            .summary_report(&scope, &query, now)
            .context("failed to compute summary")?;
        serde_json::to_string_pretty(&report)?
    };

    println!("{}", json);
    Ok(())
}

fn show_session(config: &Config, session_id: &str) -> Result<()> {
    let db = open_database(config)?;
    let session = db
        .get_session_by_key(session_id)?
        .ok_or_else(|| beaconlens_core::Error::SessionNotFound(session_id.to_string()))?;
    let events = db
        .get_session_events(&session.id)
        .context("failed to load session events")?;

    let json = serde_json::to_string_pretty(&serde_json::json!({
        "state": session.state(),
        "session": session,
        "events": events,
    }))?;
    println!("{}", json);
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    config.validate().context("invalid configuration")?;

    println!("Config OK");
    println!("  bind: {}", config.server.bind);
    println!("  database: {}", config.resolved_database_path().display());
    println!("  log: {}", beaconlens_core::logging::log_file_path().display());
    println!(
        "  ingest: {} workers, capacity {}, deadline {}ms",
        config.ingest.workers, config.ingest.queue_capacity, config.ingest.beacon_deadline_ms
    );
    println!("  domains: {}", config.domains.len());
    for domain in &config.domains {
        println!(
            "    {} {}{}",
            domain.id,
            domain.name,
            if domain.active { "" } else { " (inactive)" }
        );
    }
    println!("  api keys: {}", config.api_keys.len());
    Ok(())
}
