use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraSupervisor;
use crate::hub::HubHandle;
use crate::protocol::{Command, DetectionRequest, Event};
use crate::storage::SettingsStore;

/// Capacity of the queue shared by the socket listener and viewers.
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Applies commands one at a time, in arrival order.
pub struct ActionRouter {
    settings: Arc<SettingsStore>,
    camera: CameraSupervisor,
    hub: HubHandle,
    commands: mpsc::Receiver<Command>,
}

impl ActionRouter {
    pub fn new(
        settings: Arc<SettingsStore>,
        camera: CameraSupervisor,
        hub: HubHandle,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            settings,
            camera,
            hub,
            commands,
        }
    }

    /// Runs until a quit command arrives or `stop_requested` fires. The camera
    /// is released before `shutdown` is cancelled for everyone else.
    pub async fn run(mut self, stop_requested: CancellationToken, shutdown: CancellationToken) {
        tracing::debug!("action router started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.apply(command) {
                            tracing::info!("quit requested");
                            break;
                        }
                    }
                    None => break,
                },
                _ = stop_requested.cancelled() => {
                    tracing::info!("stop signal received");
                    break;
                }
            }
        }

        self.camera.shutdown().await;
        shutdown.cancel();
        tracing::info!("action router stopped");
    }

    /// Returns true when the command asks the daemon to quit.
    fn apply(&self, command: Command) -> bool {
        tracing::debug!(?command, "applying command");

        match command.detection {
            DetectionRequest::Enable => {
                let camera = command
                    .camera_index()
                    .unwrap_or_else(|| self.settings.camera());
                self.camera.start(camera);
            }
            DetectionRequest::Disable => self.camera.stop(),
            DetectionRequest::Unchanged => {}
        }

        if let Some(mode) = command.render.mode() {
            if self.settings.set_render_mode(mode) {
                self.hub.broadcast(Event::RenderingModeChanged {
                    rendering_mode: mode,
                });
            }
        }

        if let Some(camera) = command.camera_index() {
            if self.settings.set_camera(camera) {
                self.hub.broadcast(Event::camera_changed(camera));
                // queued behind any start above, so a cycle it launched moves too
                self.camera.switch_camera(camera);
            }
        }

        command.quit
    }
}
