use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::hub::HubHandle;
use crate::protocol::Event;
use crate::storage::{SettingsStore, Stat, StatLog};

use super::{Artifacts, CameraError, Capture, FaceDetector, FaceRect, Frame, FrameRenderer};

const IDLE_GRAB_DELAY: Duration = Duration::from_millis(10);

pub(super) struct CycleContext {
    pub camera: u32,
    pub detector: Box<dyn FaceDetector>,
    pub renderer: Arc<dyn FrameRenderer>,
    pub settings: Arc<SettingsStore>,
    pub stats: StatLog,
    pub hub: HubHandle,
    pub artifacts: Artifacts,
    pub interval: Duration,
    pub broken: bool,
}

/// Runs the capture/detect loop until `stop` is raised or the device fails.
/// The capture is dropped, releasing the camera, before this returns.
pub(super) fn run_cycle(
    mut ctx: CycleContext,
    mut capture: Box<dyn Capture>,
    stop: Arc<AtomicBool>,
) -> Result<(), CameraError> {
    tracing::info!(camera = ctx.camera, "capture cycle started");

    let mut next_frame = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        if !capture.grab()? {
            thread::sleep(IDLE_GRAB_DELAY);
            continue;
        }

        // Drivers expose no buffer size control: keep grabbing and only
        // decode one frame per interval, otherwise stale frames pile up.
        if Instant::now() < next_frame {
            continue;
        }

        let frame = capture.retrieve()?;
        ctx.process(&frame);
        next_frame = Instant::now() + ctx.interval;
    }

    drop(capture);
    tracing::info!(camera = ctx.camera, "capture cycle stopped");
    Ok(())
}

impl CycleContext {
    fn process(&mut self, frame: &Frame) {
        let faces = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(camera = self.camera, error = %e, "face detection failed");
                return;
            }
        };

        let stat = Stat::now(faces.len() as u32, self.broken);
        let position = self.stats.append(stat);

        let refresh_screenshot = self.save_screenshot(frame);
        let refresh_detect_screenshot = !faces.is_empty() && self.save_detected(frame, &faces);

        tracing::debug!(
            camera = self.camera,
            faces = faces.len(),
            corrupted = stat.corrupted,
            "frame processed"
        );

        self.hub.broadcast_stat(
            position,
            Event::NewStat {
                stat,
                refresh_screenshot,
                refresh_detect_screenshot,
            },
        );
    }

    fn save_screenshot(&self, frame: &Frame) -> bool {
        let png = match self.renderer.encode_png(frame) {
            Ok(png) => png,
            Err(e) => {
                tracing::error!(camera = self.camera, error = %e, "failed to encode screenshot");
                return false;
            }
        };
        if let Err(e) = self.artifacts.save_screenshot(&png) {
            tracing::error!(camera = self.camera, error = %e, "failed to save screenshot");
            return false;
        }
        true
    }

    fn save_detected(&self, frame: &Frame, faces: &[FaceRect]) -> bool {
        let mode = self.settings.render_mode();
        let png = match self
            .renderer
            .annotate(frame, faces, mode)
            .and_then(|annotated| self.renderer.encode_png(&annotated))
        {
            Ok(png) => png,
            Err(e) => {
                tracing::error!(camera = self.camera, error = %e, "failed to render detected faces");
                return false;
            }
        };
        if let Err(e) = self.artifacts.save_detected(&png) {
            tracing::error!(
                camera = self.camera,
                error = %e,
                "failed to save face detection screenshot"
            );
            return false;
        }
        true
    }
}
