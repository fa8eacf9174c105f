use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensite_core::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use opensite_core::registry::SpatialRegistry;
use opensite_core::{load_config, validate_config, Config, RunOutcome};
use opensite_server::api::create_router;
use opensite_server::setup;
use opensite_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code of a run that stalled with unfinished nodes.
const EXIT_STALLED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("opensite {}", VERSION);

    // Determine config path
    let config_path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config)?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("{} site file(s) configured", config.sites.len());

    // Build the work tree
    let mut tree = setup::load_sites(&config)?;
    setup::apply_catalog_metadata(&config, &mut tree).await?;
    setup::plan(&mut tree);

    // Registry
    let registry: Arc<dyn SpatialRegistry> = setup::open_registry(&config, &tree)?;

    let orchestrator = setup::build_orchestrator(&config, Some(registry))?;

    // Status API
    let state = Arc::new(AppState::new(config.clone(), orchestrator.subscribe()));
    let server = if config.server.enabled {
        Some(start_server(&config, state).await?)
    } else {
        None
    };

    // Orchestrate until done or interrupted
    let outcome = tokio::select! {
        result = orchestrator.run(&mut tree) => result.context("Orchestration failed")?,
        _ = shutdown_signal() => {
            warn!("Interrupted, abandoning run");
            return Ok(ExitCode::FAILURE);
        }
    };

    match &outcome {
        RunOutcome::Completed {
            processed,
            failed,
            skipped,
        } => info!(
            "Run completed: {} processed, {} failed, {} skipped",
            processed, failed, skipped
        ),
        RunOutcome::Stalled { unfinished } => {
            error!("Run stalled with {} unfinished node(s)", unfinished.len())
        }
    }

    if let Some(server) = server {
        info!("Status API stays up until shutdown");
        server
            .await
            .context("Server task panicked")?
            .context("Server error")?;
        info!("Server shutting down...");
    }

    Ok(if outcome.is_stalled() {
        ExitCode::from(EXIT_STALLED)
    } else {
        ExitCode::SUCCESS
    })
}

/// Bind the status API and serve it on a background task.
async fn start_server(
    config: &Config,
    state: Arc<AppState>,
) -> Result<JoinHandle<Result<(), std::io::Error>>> {
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    Ok(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
