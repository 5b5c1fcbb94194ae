use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::hub::HubHandle;
use crate::protocol::Event;
use crate::storage::{SettingsStore, StatLog};

use super::cycle::{run_cycle, CycleContext};
use super::{Artifacts, CameraBackend, CameraError, Capture, FaceDetector, FrameRenderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

pub struct SupervisorConfig {
    pub backend: Arc<dyn CameraBackend>,
    pub renderer: Arc<dyn FrameRenderer>,
    pub settings: Arc<SettingsStore>,
    pub stats: StatLog,
    pub hub: HubHandle,
    pub artifacts: Artifacts,
    /// Minimum spacing between processed frames.
    pub interval: Duration,
    /// Indices `0..max_probe` are tried by discovery.
    pub max_probe: u32,
    pub broken: bool,
}

enum SupervisorOp {
    Start(u32),
    Stop,
    Restart(u32),
    Switch(u32),
    Discover { reply: oneshot::Sender<Vec<u32>> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to the task owning the camera. Requests are applied one at a time
/// in the order they were sent.
#[derive(Clone)]
pub struct CameraSupervisor {
    ops: mpsc::UnboundedSender<SupervisorOp>,
    state: watch::Receiver<CameraState>,
}

impl CameraSupervisor {
    /// `cameras` receives the 0-based indices found by each discovery.
    pub fn spawn(
        config: SupervisorConfig,
        cameras: watch::Sender<Vec<u32>>,
    ) -> (Self, JoinHandle<()>) {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CameraState::Stopped);

        let supervisor = Supervisor {
            config,
            state: state_tx,
            cameras,
            cycle: None,
        };
        let handle = tokio::spawn(supervisor.run(ops_rx));

        (
            Self {
                ops: ops_tx,
                state: state_rx,
            },
            handle,
        )
    }

    /// Starts capturing from `camera`. Ignored while a cycle is active.
    pub fn start(&self, camera: u32) {
        self.send(SupervisorOp::Start(camera));
    }

    /// Stops the cycle and persists detection as disabled.
    pub fn stop(&self) {
        self.send(SupervisorOp::Stop);
    }

    /// Stops any running cycle, waits for the device to be released, then
    /// starts on `camera`.
    pub fn restart(&self, camera: u32) {
        self.send(SupervisorOp::Restart(camera));
    }

    /// Moves a running cycle over to `camera`. While stopped, starts on
    /// `camera` only if detection is persisted as enabled.
    pub fn switch_camera(&self, camera: u32) {
        self.send(SupervisorOp::Switch(camera));
    }

    /// Probes for reachable cameras and publishes the result.
    pub async fn discover(&self) -> Vec<u32> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorOp::Discover { reply });
        rx.await.unwrap_or_default()
    }

    /// Stops the cycle, waits until the camera is released and ends the
    /// supervisor task. Detection stays persisted as it was.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorOp::Shutdown { reply });
        let _ = rx.await;
    }

    pub fn state(&self) -> CameraState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.state.clone()
    }

    fn send(&self, op: SupervisorOp) {
        if self.ops.send(op).is_err() {
            tracing::warn!("camera supervisor stopped, dropping request");
        }
    }
}

struct RunningCycle {
    camera: u32,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<(), CameraError>>,
}

impl Drop for RunningCycle {
    // the blocking thread outlives a dropped supervisor unless told to stop
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

struct Acquired {
    camera: u32,
    capture: Box<dyn Capture>,
    detector: Box<dyn FaceDetector>,
}

struct Supervisor {
    config: SupervisorConfig,
    state: watch::Sender<CameraState>,
    cameras: watch::Sender<Vec<u32>>,
    cycle: Option<RunningCycle>,
}

impl Supervisor {
    async fn run(mut self, mut ops: mpsc::UnboundedReceiver<SupervisorOp>) {
        tracing::debug!("camera supervisor started");

        loop {
            tokio::select! {
                op = ops.recv() => match op {
                    Some(op) => {
                        if !self.handle(op).await {
                            break;
                        }
                    }
                    None => {
                        self.halt().await;
                        break;
                    }
                },
                result = cycle_exit(&mut self.cycle) => self.on_cycle_exit(result),
            }
        }

        tracing::info!("camera supervisor stopped");
    }

    /// Returns false once the supervisor should exit.
    async fn handle(&mut self, op: SupervisorOp) -> bool {
        match op {
            SupervisorOp::Start(camera) => self.start(camera).await,
            SupervisorOp::Stop => self.stop().await,
            SupervisorOp::Shutdown { reply } => {
                self.halt().await;
                let _ = reply.send(());
                return false;
            }
            SupervisorOp::Restart(camera) => {
                self.halt().await;
                self.start(camera).await;
            }
            SupervisorOp::Switch(camera) => match self.cycle.as_ref().map(|c| c.camera) {
                Some(current) if current != camera => {
                    self.halt().await;
                    self.start(camera).await;
                }
                Some(_) => {}
                None if self.config.settings.detection_enabled() => self.start(camera).await,
                None => {}
            },
            SupervisorOp::Discover { reply } => {
                let found = self.discover().await;
                let _ = reply.send(found);
            }
        }
        true
    }

    async fn start(&mut self, requested: u32) {
        if let Some(cycle) = &self.cycle {
            tracing::info!(camera = cycle.camera, requested, "camera already running, ignoring start");
            return;
        }

        self.set_state(CameraState::Starting);

        let backend = Arc::clone(&self.config.backend);
        let acquired = tokio::task::spawn_blocking(move || acquire(backend.as_ref(), requested))
            .await
            .unwrap_or_else(|e| Err(e.into()));

        let Acquired {
            camera,
            capture,
            detector,
        } = match acquired {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::error!(camera = requested, error = %e, "failed to start camera");
                self.set_state(CameraState::Stopped);
                self.disable_detection();
                return;
            }
        };

        let settings = &self.config.settings;
        let hub = &self.config.hub;

        if camera != requested && settings.set_camera(camera) {
            hub.broadcast(Event::camera_changed(camera));
        }

        self.set_state(CameraState::Running);
        if settings.set_detection_enabled(true) {
            hub.broadcast(Event::FaceDetectionChanged {
                face_detection: true,
            });
        }

        let ctx = CycleContext {
            camera,
            detector,
            renderer: Arc::clone(&self.config.renderer),
            settings: Arc::clone(settings),
            stats: self.config.stats.clone(),
            hub: hub.clone(),
            artifacts: self.config.artifacts.clone(),
            interval: self.config.interval,
            broken: self.config.broken,
        };
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = tokio::task::spawn_blocking(move || run_cycle(ctx, capture, flag));

        self.cycle = Some(RunningCycle {
            camera,
            stop,
            handle,
        });
    }

    async fn stop(&mut self) {
        self.halt().await;
        self.disable_detection();
    }

    /// Ends the running cycle, if any, and waits for the capture to be
    /// dropped.
    async fn halt(&mut self) {
        let Some(mut cycle) = self.cycle.take() else {
            return;
        };

        self.set_state(CameraState::Stopping);
        cycle.stop.store(true, Ordering::Relaxed);

        match (&mut cycle.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(camera = cycle.camera, error = %e, "capture cycle ended with error")
            }
            Err(e) => tracing::error!(camera = cycle.camera, error = %e, "capture cycle panicked"),
        }

        self.set_state(CameraState::Stopped);
        tracing::info!(camera = cycle.camera, "camera released");
    }

    fn on_cycle_exit(&mut self, result: Result<(), CameraError>) {
        let camera = self.cycle.take().map(|c| c.camera);
        match result {
            Ok(()) => tracing::info!(?camera, "capture cycle exited"),
            Err(e) => tracing::error!(?camera, error = %e, "camera lost"),
        }
        self.set_state(CameraState::Stopped);
        self.disable_detection();
    }

    async fn discover(&mut self) -> Vec<u32> {
        let backend = Arc::clone(&self.config.backend);
        let max_probe = self.config.max_probe;
        let active = self.cycle.as_ref().map(|c| c.camera);

        let found =
            match tokio::task::spawn_blocking(move || probe(backend.as_ref(), max_probe, active))
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    tracing::error!(error = %e, "camera discovery failed");
                    Vec::new()
                }
            };

        tracing::info!(cameras = ?found, "camera discovery finished");
        self.cameras.send_replace(found.clone());
        found
    }

    fn disable_detection(&self) {
        if self.config.settings.set_detection_enabled(false) {
            self.config.hub.broadcast(Event::FaceDetectionChanged {
                face_detection: false,
            });
        }
    }

    fn set_state(&self, state: CameraState) {
        let previous = self.state.send_replace(state);
        tracing::debug!(from = ?previous, to = ?state, "camera state");
    }
}

/// Resolves when the running cycle ends on its own; never resolves when idle.
async fn cycle_exit(cycle: &mut Option<RunningCycle>) -> Result<(), CameraError> {
    match cycle {
        Some(cycle) => match (&mut cycle.handle).await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        },
        None => std::future::pending().await,
    }
}

fn acquire(backend: &dyn CameraBackend, requested: u32) -> Result<Acquired, CameraError> {
    let (camera, capture) = match backend.open(requested) {
        Ok(capture) => (requested, capture),
        Err(e) if requested != 0 => {
            tracing::warn!(camera = requested, error = %e, "camera unavailable, falling back to 0");
            (0, backend.open(0)?)
        }
        Err(e) => return Err(e),
    };
    let detector = backend.face_detector()?;

    tracing::info!(camera, "camera opened");
    Ok(Acquired {
        camera,
        capture,
        detector,
    })
}

fn probe(backend: &dyn CameraBackend, max_probe: u32, active: Option<u32>) -> Vec<u32> {
    // the active camera is held by the cycle, so opening it again may fail
    (0..max_probe)
        .filter(|&index| Some(index) == active || backend.open(index).is_ok())
        .collect()
}
