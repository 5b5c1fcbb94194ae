mod artifacts;
mod cycle;
#[cfg(feature = "opencv")]
mod opencv;
mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

use crate::storage::RenderMode;

pub use artifacts::Artifacts;
#[cfg(feature = "opencv")]
pub use self::opencv::{OpenCvBackend, OpenCvRenderer};
pub use supervisor::{CameraState, CameraSupervisor, SupervisorConfig};

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera {index} could not be opened")]
    Unavailable { index: u32 },
    #[error("camera device error: {0}")]
    Device(String),
    #[error("vision engine error: {0}")]
    Vision(String),
    #[error("camera task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A decoded frame in the camera's native 8-bit BGR layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Opens camera devices and builds the face detector used by a capture cycle.
pub trait CameraBackend: Send + Sync + 'static {
    fn open(&self, index: u32) -> Result<Box<dyn Capture>, CameraError>;

    fn face_detector(&self) -> Result<Box<dyn FaceDetector>, CameraError>;
}

/// An open camera. Dropping it releases the device.
pub trait Capture: Send {
    /// Grabs the next frame without decoding it. `Ok(false)` means no frame
    /// was ready.
    fn grab(&mut self) -> Result<bool, CameraError>;

    /// Decodes the most recently grabbed frame.
    fn retrieve(&mut self) -> Result<Frame, CameraError>;
}

pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRect>, CameraError>;
}

pub trait FrameRenderer: Send + Sync + 'static {
    fn annotate(
        &self,
        frame: &Frame,
        faces: &[FaceRect],
        mode: RenderMode,
    ) -> Result<Frame, CameraError>;

    fn encode_png(&self, frame: &Frame) -> Result<Vec<u8>, CameraError>;
}
