use std::path::{Path, PathBuf};

use crate::storage::{write_atomic, StoreError};

pub const SCREENSHOT_FILE: &str = "screenshot.png";
pub const DETECTED_SCREENSHOT_FILE: &str = "screenshot-detected.png";

/// Image files rewritten by every detection cycle.
#[derive(Debug, Clone)]
pub struct Artifacts {
    dir: PathBuf,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn screenshot_path(&self) -> PathBuf {
        self.dir.join(SCREENSHOT_FILE)
    }

    pub fn detected_path(&self) -> PathBuf {
        self.dir.join(DETECTED_SCREENSHOT_FILE)
    }

    pub fn save_screenshot(&self, png: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.screenshot_path(), png)
    }

    pub fn save_detected(&self, png: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.detected_path(), png)
    }

    pub fn wipe(&self) -> Result<(), StoreError> {
        for path in [self.screenshot_path(), self.detected_path()] {
            remove_if_present(&path)?;
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
