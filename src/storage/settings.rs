use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use super::{write_atomic, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Circles around detected faces.
    #[default]
    Normal,
    /// Logos drawn over detected faces.
    Fun,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detection_enabled: bool,
    pub render_mode: RenderMode,
    pub camera: u32,
}

/// Process-wide settings, persisted to disk on every change.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Loads `path`, falling back to defaults when it is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<Settings>(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "unreadable settings, reverting to defaults"
                    );
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read settings");
                Settings::default()
            }
        };
        tracing::debug!(?current, "settings loaded");

        Self {
            path,
            current: RwLock::new(current),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Settings {
        *self.current.read().unwrap()
    }

    pub fn detection_enabled(&self) -> bool {
        self.snapshot().detection_enabled
    }

    pub fn render_mode(&self) -> RenderMode {
        self.snapshot().render_mode
    }

    pub fn camera(&self) -> u32 {
        self.snapshot().camera
    }

    /// Returns whether the value changed. An unchanged value is neither
    /// persisted nor reported.
    pub fn set_detection_enabled(&self, enabled: bool) -> bool {
        self.update(|s| &mut s.detection_enabled, enabled)
    }

    pub fn set_render_mode(&self, mode: RenderMode) -> bool {
        self.update(|s| &mut s.render_mode, mode)
    }

    pub fn set_camera(&self, camera: u32) -> bool {
        self.update(|s| &mut s.camera, camera)
    }

    fn update<T: PartialEq>(&self, field: impl FnOnce(&mut Settings) -> &mut T, value: T) -> bool {
        // held across the in-memory change and the write so files land in
        // the same order as the changes
        let _guard = self.write_lock.lock().unwrap();

        let snapshot = {
            let mut current = self.current.write().unwrap();
            let slot = field(&mut current);
            if *slot == value {
                return false;
            }
            *slot = value;
            *current
        };

        if let Err(e) = self.persist(&snapshot) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "failed to save settings, keeping in-memory value"
            );
        }
        true
    }

    fn persist(&self, settings: &Settings) -> Result<(), StoreError> {
        let data = toml::to_string(settings)?;
        write_atomic(&self.path, data.as_bytes())?;
        tracing::debug!(?settings, "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.toml"));
        assert_eq!(store.snapshot(), Settings::default());
        assert!(!store.detection_enabled());
        assert_eq!(store.render_mode(), RenderMode::Normal);
        assert_eq!(store.camera(), 0);
    }

    #[test]
    fn changes_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let store = SettingsStore::load(&path);
        assert!(store.set_detection_enabled(true));
        assert!(store.set_render_mode(RenderMode::Fun));
        assert!(store.set_camera(2));

        let reloaded = SettingsStore::load(&path);
        assert_eq!(
            reloaded.snapshot(),
            Settings {
                detection_enabled: true,
                render_mode: RenderMode::Fun,
                camera: 2,
            }
        );
    }

    #[test]
    fn unchanged_value_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let store = SettingsStore::load(&path);

        assert!(!store.set_detection_enabled(false));
        assert!(!store.set_render_mode(RenderMode::Normal));
        assert!(!store.set_camera(0));
        assert!(!path.exists());

        assert!(store.set_camera(1));
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
        assert!(!store.set_camera(1));
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_reverts_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "detection_enabled = \"yes please\"").unwrap();
        let store = SettingsStore::load(&path);
        assert_eq!(store.snapshot(), Settings::default());
    }

    #[test]
    fn concurrent_setters_leave_a_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let store = Arc::new(SettingsStore::load(&path));

        let handles: Vec<_> = (1..=8)
            .map(|camera| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.set_camera(camera);
                    store.set_detection_enabled(camera % 2 == 0);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let on_disk = SettingsStore::load(&path).snapshot();
        assert_eq!(on_disk, store.snapshot());
    }

    #[test]
    fn write_failure_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("missing-dir").join("settings.toml"));
        assert!(store.set_render_mode(RenderMode::Fun));
        assert_eq!(store.render_mode(), RenderMode::Fun);
    }
}
