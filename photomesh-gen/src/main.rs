//! photomesh-gen - photo-to-mesh reconstruction service
//!
//! Accepts 1-5 photographs over HTTP, optionally removes their backgrounds
//! through Photoroom, runs TripoSR and returns the produced mesh.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use photomesh_common::config::{self as common_config, TomlConfig};
use photomesh_common::events::EventBus;
use photomesh_gen::AppState;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for photomesh-gen
#[derive(Parser, Debug)]
#[command(name = "photomesh-gen")]
#[command(about = "Photo-to-mesh reconstruction service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "PHOTOMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "PHOTOMESH_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PHOTOMESH_PORT")]
    port: Option<u16>,

    /// Root for per-request work directories
    #[arg(short, long)]
    work_root: Option<PathBuf>,

    /// TripoSR checkout, searched before the configured paths
    #[arg(long, env = "TRIPOSR_DIR")]
    triposr_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "PHOTOMESH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(common_config::default_config_path)
        .context("No configuration path available")?;

    if args.write_default_config {
        common_config::write_toml_config(&TomlConfig::default(), &config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let toml_config = common_config::load_toml_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // Initialize tracing
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| toml_config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("photomesh_gen={level},photomesh_common={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting photomesh-gen v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_path.display());

    let work_root = common_config::resolve_work_root(args.work_root.as_deref(), &toml_config);
    tokio::fs::create_dir_all(&work_root)
        .await
        .with_context(|| format!("Failed to create work root {}", work_root.display()))?;
    info!("Work root: {}", work_root.display());

    let search_paths =
        photomesh_gen::config::resolve_search_paths(args.triposr_dir.as_deref(), &toml_config);
    info!("TripoSR search paths: {:?}", search_paths);

    let event_bus = EventBus::new(100);
    let orchestrator =
        photomesh_gen::build_orchestrator(&toml_config, work_root, search_paths, event_bus.clone())
            .context("Failed to build pipeline")?;

    match orchestrator.reconstruction().check_runtime() {
        Ok(runtime) => info!("TripoSR entrypoint: {}", runtime.entrypoint.display()),
        Err(e) => warn!("{} - /generate will answer 503 until it is installed", e),
    }

    let state = AppState::new(orchestrator, event_bus)
        .with_default_credential(photomesh_gen::config::resolve_default_credential(&toml_config))
        .with_demo_image_dir(toml_config.demo_image_dir.clone())
        .with_max_upload_bytes(toml_config.max_upload_bytes);

    // Sweep retained work directories past their TTL
    let shutdown = CancellationToken::new();
    let work_dirs = state.orchestrator.work_directories().clone();
    let sweeper = work_dirs.retains_any().then(|| {
        let ttl = Duration::from_secs(toml_config.work_directory.retention_ttl_secs);
        let shutdown = shutdown.clone();
        info!("Sweeping retained work directories older than {}s", ttl.as_secs());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl.max(Duration::from_secs(60)) / 2);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = work_dirs.sweep_expired(ttl).await {
                            warn!("Work directory sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    });

    let app = photomesh_gen::build_router(state);

    let host = args.host.clone().unwrap_or_else(|| toml_config.host.clone());
    let port = args.port.unwrap_or(toml_config.port);
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind to {}:{}", host, port))?;
    let addr: SocketAddr = listener.local_addr().context("Listener has no local address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
