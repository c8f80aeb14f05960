use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use tarsy_domain::config::Config;
use tarsy_gateway::api;
use tarsy_gateway::bootstrap::build_app_state;

#[derive(Parser)]
#[command(name = "tarsy", about = "SRE alert processing service")]
struct Cli {
    /// Path to the service config (TOML). Falls back to $TARSY_CONFIG, then
    /// ./tarsy.toml, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the service (default).
    Serve,
    /// Validate the configuration and exit.
    ConfigCheck,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(config)).await
        }
        Some(Command::ConfigCheck) => {
            let issues = config.validate();
            for issue in &issues {
                println!("{:?}: {issue}", issue.severity);
            }
            if issues
                .iter()
                .any(|i| i.severity == tarsy_domain::config::ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("config OK");
            Ok(())
        }
        Some(Command::Version) => {
            println!("tarsy {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let path = explicit
        .map(PathBuf::from)
        .or_else(|| std::env::var("TARSY_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("tarsy.toml"));
    if path.exists() {
        Config::load(&path).with_context(|| format!("loading config {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tarsy_gateway=debug")),
        )
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tarsy starting");

    let state = build_app_state(config.clone()).await?;

    // ── CORS ─────────────────────────────────────────────────────────
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    let app = api::router().layer(cors).with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("server error")?;

    // ── Drain + teardown ─────────────────────────────────────────────
    state.alerts.stop_accepting();
    let drained = state.alerts.drain(Duration::from_secs(30)).await;
    if !drained {
        tracing::warn!("in-flight alerts did not finish before the shutdown deadline");
    }
    state.mcp_registry.shutdown().await;
    tracing::info!("tarsy stopped");
    Ok(())
}

async fn shutdown_signal(state: tarsy_gateway::state::AppState) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested; refusing new alerts");
    state.alerts.stop_accepting();
}
