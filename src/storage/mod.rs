mod atomic;
mod settings;
mod stats;

use thiserror::Error;

pub use atomic::write_atomic;
pub use settings::{RenderMode, Settings, SettingsStore};
pub use stats::{Stat, StatLog};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("failed to encode stat: {0}")]
    Json(#[from] serde_json::Error),
}
