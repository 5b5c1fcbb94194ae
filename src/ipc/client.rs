use std::io;
use std::path::Path;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::protocol::{Command, ProtocolError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("service not running")]
    NotRunning,
    #[error("failed to send command: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Delivers one command to the daemon listening on `path`.
pub async fn send_command(path: &Path, command: &Command) -> Result<(), ClientError> {
    let payload = command.encode()?;

    let mut stream = match UnixStream::connect(path).await {
        Ok(stream) => stream,
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Err(ClientError::NotRunning);
        }
        Err(e) => return Err(e.into()),
    };

    stream.write_all(&payload).await?;
    stream.shutdown().await?;
    Ok(())
}
