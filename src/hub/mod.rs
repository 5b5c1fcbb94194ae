//! Fan-out of [`Event`]s to live viewer connections.
//!
//! The registry is owned by a single control loop. Each viewer gets a bounded
//! queue; a viewer whose queue is full when an event is dispatched is evicted
//! instead of holding up the broadcaster.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::{to_wire_camera, Event};
use crate::storage::{SettingsStore, StatLog};

pub const VIEWER_QUEUE_CAPACITY: usize = 100;

pub type ViewerId = u64;

/// A registered viewer: its id and the receiving end of its outbound queue.
/// The queue closes when the viewer is evicted or the hub stops.
pub struct Viewer {
    pub id: ViewerId,
    pub events: mpsc::Receiver<Event>,
}

enum HubOp {
    Register { reply: oneshot::Sender<Viewer> },
    Unregister(ViewerId),
    Broadcast(Event),
    Stat { position: usize, event: Event },
}

#[derive(Clone)]
pub struct HubHandle {
    ops: mpsc::UnboundedSender<HubOp>,
}

impl HubHandle {
    /// Returns `None` once the hub has stopped.
    pub async fn register(&self) -> Option<Viewer> {
        let (reply, rx) = oneshot::channel();
        self.ops.send(HubOp::Register { reply }).ok()?;
        rx.await.ok()
    }

    pub fn unregister(&self, id: ViewerId) {
        let _ = self.ops.send(HubOp::Unregister(id));
    }

    /// Queues `event` for every registered viewer. Never blocks.
    pub fn broadcast(&self, event: Event) {
        self.send(HubOp::Broadcast(event));
    }

    /// Like [`broadcast`](Self::broadcast) for the `newStat` of the sample at
    /// `position` in the stat log. Viewers whose init snapshot already held
    /// that sample are skipped.
    pub fn broadcast_stat(&self, position: usize, event: Event) {
        self.send(HubOp::Stat { position, event });
    }

    fn send(&self, op: HubOp) {
        if self.ops.send(op).is_err() {
            tracing::trace!("hub stopped, dropping event");
        }
    }
}

/// Sources for the `init` event sent to each new viewer.
pub struct ViewerSnapshot {
    pub settings: Arc<SettingsStore>,
    pub stats: StatLog,
    /// 0-based indices of the cameras found at startup.
    pub cameras: watch::Receiver<Vec<u32>>,
    pub broken: bool,
}

impl ViewerSnapshot {
    /// The init event and the number of stat samples it carries.
    fn init_event(&self) -> (Event, usize) {
        let settings = self.settings.snapshot();
        let all_stats = self.stats.all();
        let known_stats = all_stats.len();
        let event = Event::Init {
            all_stats,
            face_detection: settings.detection_enabled,
            rendering_mode: settings.render_mode,
            camera: to_wire_camera(settings.camera),
            available_cameras: self
                .cameras
                .borrow()
                .iter()
                .map(|&i| to_wire_camera(i))
                .collect(),
            broken: self.broken,
        };
        (event, known_stats)
    }
}

struct Connection {
    tx: mpsc::Sender<Event>,
    /// Stat samples already delivered through the init event.
    known_stats: usize,
}

pub struct BroadcastHub {
    snapshot: ViewerSnapshot,
    viewers: HashMap<ViewerId, Connection>,
    next_id: ViewerId,
    queue_capacity: usize,
    ops: mpsc::UnboundedReceiver<HubOp>,
}

impl BroadcastHub {
    pub fn spawn(
        snapshot: ViewerSnapshot,
        shutdown: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        Self::spawn_with_capacity(snapshot, VIEWER_QUEUE_CAPACITY, shutdown)
    }

    pub fn spawn_with_capacity(
        snapshot: ViewerSnapshot,
        queue_capacity: usize,
        shutdown: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            snapshot,
            viewers: HashMap::new(),
            next_id: 1,
            queue_capacity: queue_capacity.max(1),
            ops: rx,
        };
        let handle = tokio::spawn(hub.run(shutdown));
        (HubHandle { ops: tx }, handle)
    }

    async fn run(mut self, shutdown: CancellationToken) {
        tracing::debug!("broadcast hub started");

        loop {
            tokio::select! {
                op = self.ops.recv() => match op {
                    Some(op) => self.handle(op),
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!(viewers = self.viewers.len(), "broadcast hub stopped");
    }

    fn handle(&mut self, op: HubOp) {
        match op {
            HubOp::Register { reply } => {
                let id = self.next_id;
                self.next_id += 1;

                let (tx, rx) = mpsc::channel(self.queue_capacity);
                let (init, known_stats) = self.snapshot.init_event();
                // the queue is empty, so the snapshot always fits
                let _ = tx.try_send(init);

                if reply.send(Viewer { id, events: rx }).is_ok() {
                    self.viewers.insert(id, Connection { tx, known_stats });
                    tracing::info!(viewer = id, viewers = self.viewers.len(), "viewer connected");
                }
            }
            HubOp::Unregister(id) => {
                if self.viewers.remove(&id).is_some() {
                    tracing::info!(viewer = id, viewers = self.viewers.len(), "viewer disconnected");
                }
            }
            HubOp::Broadcast(event) => self.dispatch(event, None),
            HubOp::Stat { position, event } => self.dispatch(event, Some(position)),
        }
    }

    fn dispatch(&mut self, event: Event, stat_position: Option<usize>) {
        tracing::debug!(kind = event.kind(), viewers = self.viewers.len(), "broadcasting");

        let mut dropped = Vec::new();
        for (&id, conn) in &self.viewers {
            if stat_position.is_some_and(|position| position < conn.known_stats) {
                continue;
            }
            match conn.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(viewer = id, "viewer queue full, evicting");
                    dropped.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(id),
            }
        }
        for id in dropped {
            self.viewers.remove(&id);
        }
    }
}
