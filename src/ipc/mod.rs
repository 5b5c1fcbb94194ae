//! Local control channel between `facewatch-ctl` and the daemon.
//!
//! One connection carries exactly one bincode [`Command`](crate::protocol::Command):
//! the client writes it, shuts down its write half and disconnects. The
//! daemon never replies.

mod client;
mod listener;

pub use client::{send_command, ClientError};
pub use listener::{CommandListener, ListenerError};
