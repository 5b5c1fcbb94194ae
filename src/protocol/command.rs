use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::RenderMode;

/// Largest command payload accepted from a socket peer.
pub const MAX_COMMAND_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty command payload")]
    Empty,
    #[error("command payload too large: {0} bytes")]
    TooLarge(usize),
    #[error("malformed command: {0}")]
    Binary(#[from] bincode::Error),
    #[error("trailing bytes after command: expected {expected}, got {actual}")]
    Trailing { expected: usize, actual: usize },
    #[error("malformed json command: {0}")]
    Json(#[from] serde_json::Error),
}

// Variant order is the wire discriminant; append only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionRequest {
    #[default]
    Unchanged,
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderRequest {
    #[default]
    Unchanged,
    Normal,
    Fun,
}

impl RenderRequest {
    pub fn mode(self) -> Option<RenderMode> {
        match self {
            RenderRequest::Unchanged => None,
            RenderRequest::Normal => Some(RenderMode::Normal),
            RenderRequest::Fun => Some(RenderMode::Fun),
        }
    }
}

/// One control request, either from `facewatch-ctl` (bincode over the unix
/// socket) or from a viewer (JSON over the websocket).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Command {
    pub detection: DetectionRequest,
    pub render: RenderRequest,
    /// 1-based camera number, 0 leaves the camera unchanged.
    pub camera: u32,
    pub quit: bool,
}

impl Command {
    pub fn quit() -> Self {
        Self {
            quit: true,
            ..Self::default()
        }
    }

    /// Internal 0-based index requested by this command, if any.
    pub fn camera_index(&self) -> Option<u32> {
        self.camera.checked_sub(1)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if bytes.len() > MAX_COMMAND_BYTES {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }

        let command: Command = bincode::deserialize(bytes)?;
        let expected = bincode::serialized_size(&command)? as usize;
        if expected != bytes.len() {
            return Err(ProtocolError::Trailing {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(command)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
