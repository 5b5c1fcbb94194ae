mod command;
mod event;

pub use command::{Command, DetectionRequest, ProtocolError, RenderRequest, MAX_COMMAND_BYTES};
pub use event::{Event, to_wire_camera};
