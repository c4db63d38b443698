use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zynk_live::{
    create_router, resolve_user, AppState, Capabilities, Config, PpmStillEncoder, SessionConfig,
    SessionCoordinator, StaticIdentity, SyntheticCamera, SyntheticCameraConfig,
    SyntheticMediaEncoder, UserId, WebSocketTransport,
};

#[derive(Debug, Parser)]
#[command(name = "zynk-live", about = "Live coaching capture and streaming client")]
struct Cli {
    /// Config file (without extension)
    #[arg(long, default_value = "config/zynk-live")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP control API
    Serve,

    /// Stream one session headless, then print the feedback timeline
    Run {
        /// Seconds to stream before stopping
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// User id (defaults to the configured identity, else anonymous)
        #[arg(long)]
        user: Option<String>,

        /// Seconds to wait for the service to finish after stop
        #[arg(long, default_value_t = 30)]
        finish_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Zynk Live v0.1.0");
    info!("Loaded config: {}", cfg.service.name);
    info!("Analysis service: {}", cfg.stream.server_url);

    let coordinator = Arc::new(SessionCoordinator::new(
        SessionConfig::from(&cfg),
        capabilities(&cfg),
    ));

    match cli.command {
        Command::Serve => serve(&cfg, coordinator).await,
        Command::Run {
            seconds,
            user,
            finish_timeout,
        } => {
            let user = user.or_else(|| cfg.identity.user_id.clone());
            run_once(coordinator, user, seconds, finish_timeout).await
        }
    }
}

fn capabilities(cfg: &Config) -> Capabilities {
    Capabilities {
        device: Arc::new(SyntheticCamera::new(SyntheticCameraConfig {
            width: cfg.capture.width,
            height: cfg.capture.height,
            ..SyntheticCameraConfig::default()
        })),
        media_encoder: Arc::new(SyntheticMediaEncoder::default()),
        still_encoder: Arc::new(PpmStillEncoder),
        transport: Arc::new(WebSocketTransport),
    }
}

async fn serve(cfg: &Config, coordinator: Arc<SessionCoordinator>) -> Result<()> {
    let identity = Arc::new(StaticIdentity::new(cfg.identity.user_id.clone()));
    let app = create_router(AppState::new(coordinator, identity));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}

async fn run_once(
    coordinator: Arc<SessionCoordinator>,
    user: Option<String>,
    seconds: u64,
    finish_timeout: u64,
) -> Result<()> {
    let user_id = match user {
        Some(id) => UserId::new(id),
        None => resolve_user(&StaticIdentity::default()).await,
    };

    if let Err(e) = coordinator.start(user_id).await {
        anyhow::bail!("Could not start session: {}", e);
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    coordinator.stop();

    if tokio::time::timeout(
        Duration::from_secs(finish_timeout),
        coordinator.wait_finished(),
    )
    .await
    .is_err()
    {
        warn!("Service did not finish in {}s, closing", finish_timeout);
        coordinator.teardown();
    }

    let snapshot = coordinator.snapshot();
    info!("Final status: {:?} ({})", snapshot.status, snapshot.caption);
    if let Some(error) = &snapshot.error {
        warn!("Session error: {}", error);
    }
    if let Some(path) = &snapshot.recording_path {
        info!("Local recording: {}", path.display());
    }

    for segment in coordinator.timeline() {
        println!(
            "[{:>6.1}s - {:>6.1}s] {}",
            segment.start_offset_seconds, segment.end_offset_seconds, segment.text
        );
    }

    Ok(())
}
