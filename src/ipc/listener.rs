use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Command, MAX_COMMAND_BYTES};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("socket {} already in use, is another instance running? (use --force to replace it)", .0.display())]
    InUse(PathBuf),
    #[error("failed to bind socket {}: {source}", .path.display())]
    Bind { path: PathBuf, source: io::Error },
}

pub struct CommandListener {
    path: PathBuf,
    listener: UnixListener,
}

impl CommandListener {
    /// Binds `path`. With `force`, a leftover socket file is removed and the
    /// bind retried once.
    pub fn bind(path: impl Into<PathBuf>, force: bool) -> Result<Self, ListenerError> {
        let path = path.into();
        let bind_error = |source| ListenerError::Bind {
            path: path.clone(),
            source,
        };

        let listener = match UnixListener::bind(&path) {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && force => {
                tracing::warn!(path = %path.display(), "replacing existing socket");
                std::fs::remove_file(&path).map_err(bind_error)?;
                UnixListener::bind(&path).map_err(bind_error)?
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                return Err(ListenerError::InUse(path.clone()));
            }
            Err(e) => return Err(bind_error(e)),
        };

        // any local user may send commands
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))
            .map_err(bind_error)?;

        tracing::info!(path = %path.display(), "command socket listening");
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until `shutdown` fires, forwarding each decoded
    /// command to `commands`. Removes the socket file on return.
    pub async fn run(self, commands: mpsc::Sender<Command>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(read_command(stream, commands.clone()));
                    }
                    Err(e) => tracing::error!(error = %e, "failed to accept connection"),
                },
                _ = shutdown.cancelled() => break,
            }
        }

        drop(self.listener);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to remove socket"),
        }
        tracing::info!("command socket closed");
    }
}

async fn read_command(stream: UnixStream, commands: mpsc::Sender<Command>) {
    // one byte over the limit is enough to reject the payload
    let mut payload = Vec::new();
    let mut limited = stream.take(MAX_COMMAND_BYTES as u64 + 1);
    if let Err(e) = limited.read_to_end(&mut payload).await {
        tracing::warn!(error = %e, "failed to read command");
        return;
    }

    let command = match Command::decode(&payload) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, bytes = payload.len(), "dropping malformed command");
            return;
        }
    };

    tracing::debug!(?command, "command received");
    if commands.send(command).await.is_err() {
        tracing::warn!("router stopped, dropping command");
    }
}
