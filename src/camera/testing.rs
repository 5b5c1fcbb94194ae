//! In-memory camera stack for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::hub::{BroadcastHub, HubHandle, Viewer, ViewerSnapshot};
use crate::protocol::Event;
use crate::storage::{RenderMode, SettingsStore, StatLog};

use super::{
    Artifacts, CameraBackend, CameraError, CameraState, CameraSupervisor, Capture, FaceDetector,
    FaceRect, Frame, FrameRenderer, SupervisorConfig,
};

#[derive(Default)]
struct FakeState {
    faces: usize,
    unavailable: Mutex<HashSet<u32>>,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    opens: AtomicUsize,
    grabs: AtomicUsize,
    retrieves: AtomicUsize,
    device_lost: AtomicBool,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Arc<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Self::with_faces(0)
    }

    pub fn with_faces(faces: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(FakeState {
                faces,
                ..FakeState::default()
            }),
        })
    }

    pub fn make_unavailable(&self, index: u32) {
        self.state.unavailable.lock().unwrap().insert(index);
    }

    pub fn lose_device(&self) {
        self.state.device_lost.store(true, Ordering::SeqCst);
    }

    /// Captures currently held open.
    pub fn open_now(&self) -> usize {
        self.state.open_now.load(Ordering::SeqCst)
    }

    /// Highest number of captures ever open at once.
    pub fn max_open(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.state.grabs.load(Ordering::SeqCst)
    }

    pub fn retrieves(&self) -> usize {
        self.state.retrieves.load(Ordering::SeqCst)
    }
}

impl CameraBackend for FakeBackend {
    fn open(&self, index: u32) -> Result<Box<dyn Capture>, CameraError> {
        if self.state.unavailable.lock().unwrap().contains(&index) {
            return Err(CameraError::Unavailable { index });
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.state.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            state: Arc::clone(&self.state),
        }))
    }

    fn face_detector(&self) -> Result<Box<dyn FaceDetector>, CameraError> {
        Ok(Box::new(FakeDetector {
            faces: self.state.faces,
        }))
    }
}

struct FakeCapture {
    state: Arc<FakeState>,
}

impl Capture for FakeCapture {
    fn grab(&mut self) -> Result<bool, CameraError> {
        thread::sleep(Duration::from_millis(1));
        if self.state.device_lost.load(Ordering::SeqCst) {
            return Err(CameraError::Device("device unplugged".into()));
        }
        self.state.grabs.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn retrieve(&mut self) -> Result<Frame, CameraError> {
        self.state.retrieves.fetch_add(1, Ordering::SeqCst);
        Ok(Frame {
            width: 2,
            height: 2,
            data: vec![0; 12],
        })
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        self.state.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeDetector {
    faces: usize,
}

impl FaceDetector for FakeDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<FaceRect>, CameraError> {
        Ok((0..self.faces)
            .map(|i| FaceRect {
                x: i as i32,
                y: 0,
                width: 1,
                height: 1,
            })
            .collect())
    }
}

pub(crate) struct FakeRenderer;

impl FrameRenderer for FakeRenderer {
    fn annotate(
        &self,
        frame: &Frame,
        _faces: &[FaceRect],
        _mode: RenderMode,
    ) -> Result<Frame, CameraError> {
        Ok(frame.clone())
    }

    fn encode_png(&self, frame: &Frame) -> Result<Vec<u8>, CameraError> {
        Ok(frame.data.clone())
    }
}

/// A supervisor wired to a fake backend, real stores in a scratch directory
/// and a running hub.
pub(crate) struct Harness {
    pub dir: tempfile::TempDir,
    pub backend: Arc<FakeBackend>,
    pub settings: Arc<SettingsStore>,
    pub stats: StatLog,
    pub hub: HubHandle,
    pub camera: CameraSupervisor,
    pub cameras: watch::Receiver<Vec<u32>>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(backend: Arc<FakeBackend>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(SettingsStore::load(dir.path().join("settings.toml")));
        let stats = StatLog::open(dir.path().join("stats.jsonl")).unwrap();
        let shutdown = CancellationToken::new();
        let (cameras_tx, cameras) = watch::channel(Vec::new());

        let (hub, _) = BroadcastHub::spawn(
            ViewerSnapshot {
                settings: Arc::clone(&settings),
                stats: stats.clone(),
                cameras: cameras.clone(),
                broken: false,
            },
            shutdown.clone(),
        );
        let (camera, _) = CameraSupervisor::spawn(
            SupervisorConfig {
                backend: Arc::clone(&backend) as Arc<dyn CameraBackend>,
                renderer: Arc::new(FakeRenderer),
                settings: Arc::clone(&settings),
                stats: stats.clone(),
                hub: hub.clone(),
                artifacts: Artifacts::new(dir.path()),
                // one frame right after start, then none for the test's duration
                interval: Duration::from_secs(3600),
                max_probe: 4,
                broken: false,
            },
            cameras_tx,
        );

        Self {
            dir,
            backend,
            settings,
            stats,
            hub,
            camera,
            cameras,
            shutdown,
        }
    }

    /// Registers a viewer and consumes its init event.
    pub async fn viewer(&self) -> Viewer {
        let mut viewer = self.hub.register().await.unwrap();
        assert_eq!(viewer.events.recv().await.unwrap().kind(), "init");
        viewer
    }
}

/// Next event that is not a stat sample.
pub(crate) async fn next_change(viewer: &mut Viewer) -> Event {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), viewer.events.recv())
            .await
            .expect("no event received")
            .expect("viewer queue closed");
        if !matches!(event, Event::NewStat { .. }) {
            return event;
        }
    }
}

/// Fails if a non-stat event arrives within a short grace period.
pub(crate) async fn assert_no_change(viewer: &mut Viewer) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
    loop {
        match tokio::time::timeout_at(deadline, viewer.events.recv()).await {
            Err(_) => return,
            Ok(Some(Event::NewStat { .. })) => continue,
            Ok(Some(event)) => panic!("unexpected event {event:?}"),
            Ok(None) => panic!("viewer queue closed"),
        }
    }
}

pub(crate) async fn wait_for(camera: &CameraSupervisor, state: CameraState) {
    let mut rx = camera.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .unwrap();
}
