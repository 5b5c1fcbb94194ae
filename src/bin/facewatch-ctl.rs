use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use facewatch::config::Config;
use facewatch::ipc::{send_command, ClientError};
use facewatch::protocol::{Command, DetectionRequest, RenderRequest};

/// Sends one command to a running facewatch daemon.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[arg(long, conflicts_with = "disable_camera")]
    enable_camera: bool,
    #[arg(long)]
    disable_camera: bool,
    /// Draw logos over detected faces
    #[arg(long, conflicts_with = "normal")]
    fun: bool,
    /// Draw circles around detected faces
    #[arg(long)]
    normal: bool,
    /// Camera number to use, starting at 1
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    camera: Option<u32>,
    /// Stop the daemon
    #[arg(long)]
    quit: bool,
    /// Daemon socket; defaults to the one named by the daemon config
    #[arg(long)]
    socket: Option<PathBuf>,
}

impl Args {
    fn command(&self) -> Command {
        let detection = if self.enable_camera {
            DetectionRequest::Enable
        } else if self.disable_camera {
            DetectionRequest::Disable
        } else {
            DetectionRequest::Unchanged
        };
        let render = if self.fun {
            RenderRequest::Fun
        } else if self.normal {
            RenderRequest::Normal
        } else {
            RenderRequest::Unchanged
        };
        Command {
            detection,
            render,
            camera: self.camera.unwrap_or(0),
            quit: self.quit,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let socket = match &args.socket {
        Some(path) => path.clone(),
        None => match Config::load() {
            Ok(config) => config.socket_path(),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(send_command(&socket, &args.command())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(ClientError::NotRunning) => {
            eprintln!("service not running");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
