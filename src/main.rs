use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use facewatch::api::{self, AppState};
use facewatch::camera::{Artifacts, CameraBackend, CameraSupervisor, FrameRenderer, SupervisorConfig};
use facewatch::config::{Config, DEFAULT_CONFIG_PATH};
use facewatch::hub::{BroadcastHub, ViewerSnapshot};
use facewatch::ipc::CommandListener;
use facewatch::router::{ActionRouter, COMMAND_QUEUE_CAPACITY};
use facewatch::storage::{SettingsStore, StatLog};

const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(version, about = "Counts the faces seen by a webcam")]
struct Args {
    /// Replace a command socket left behind by a previous instance
    #[arg(long)]
    force: bool,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

type Vision = (Arc<dyn CameraBackend>, Arc<dyn FrameRenderer>);

#[cfg(feature = "opencv")]
fn vision(config: &Config) -> Result<Vision, Box<dyn std::error::Error>> {
    use facewatch::camera::{OpenCvBackend, OpenCvRenderer};

    let backend: Arc<dyn CameraBackend> =
        Arc::new(OpenCvBackend::new(config.camera.cascade_path.clone()));
    let renderer: Arc<dyn FrameRenderer> = Arc::new(OpenCvRenderer);
    Ok((backend, renderer))
}

#[cfg(not(feature = "opencv"))]
fn vision(_config: &Config) -> Result<Vision, Box<dyn std::error::Error>> {
    Err("built without camera support, rebuild with `--features opencv`".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("facewatch=debug".parse()?))
        .init();

    let args = Args::parse();
    let config = Config::load_from(&args.config)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let artifacts = Artifacts::new(&config.data_dir);
    if config.broken {
        tracing::warn!("broken mode: wiping stats and screenshots");
        StatLog::wipe(&config.stats_path())?;
        artifacts.wipe()?;
    }

    let settings = Arc::new(SettingsStore::load(config.settings_path()));
    let stats = StatLog::open(config.stats_path())?;
    tracing::info!(samples = stats.len(), "stats loaded");

    let (backend, renderer) = vision(&config)?;

    let stop_requested = CancellationToken::new();
    let shutdown = CancellationToken::new();
    let (cameras_tx, cameras_rx) = watch::channel(Vec::new());

    let (hub, hub_task) = BroadcastHub::spawn(
        ViewerSnapshot {
            settings: Arc::clone(&settings),
            stats: stats.clone(),
            cameras: cameras_rx,
            broken: config.broken,
        },
        shutdown.clone(),
    );

    let (camera, camera_task) = CameraSupervisor::spawn(
        SupervisorConfig {
            backend,
            renderer,
            settings: Arc::clone(&settings),
            stats,
            hub: hub.clone(),
            artifacts,
            interval: Duration::from_millis(config.camera.detect_interval_ms),
            max_probe: config.camera.max_probe,
            broken: config.broken,
        },
        cameras_tx,
    );

    let cameras = camera.discover().await;
    if cameras.is_empty() {
        return Err("no camera found".into());
    }

    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

    let listener = CommandListener::bind(config.socket_path(), args.force)?;
    let listener_task = tokio::spawn(listener.run(commands_tx.clone(), shutdown.clone()));

    let state = AppState {
        hub: hub.clone(),
        commands: commands_tx,
    };
    let data_dir = config.data_dir.clone();
    let port = config.http.port;
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = api::start_server(state, &data_dir, port, server_shutdown).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });

    if settings.detection_enabled() {
        tracing::info!(camera = settings.camera(), "resuming face detection");
        camera.start(settings.camera());
    }

    tokio::spawn(forward_signals(stop_requested.clone()));

    ActionRouter::new(settings, camera, hub, commands_rx)
        .run(stop_requested, shutdown)
        .await;

    if let Err(e) = listener_task.await {
        tracing::error!(error = %e, "command listener task failed");
    }
    if tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, server_task)
        .await
        .is_err()
    {
        tracing::warn!("HTTP server did not stop in time");
    }
    for (name, task) in [("camera supervisor", camera_task), ("broadcast hub", hub_task)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "task failed");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn forward_signals(stop_requested: CancellationToken) {
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop_requested.cancel();
                }
                return;
            }
        };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
        _ = terminate.recv() => tracing::info!("terminate received"),
    }
    stop_requested.cancel();
}
