use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::StoreError;

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".new");
    path.with_file_name(name)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes `data` next to `path` and renames it into place, so `path` holds
/// either its previous complete contents or the new ones.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp_path = temp_path_for(path);

    let mut file = fs::File::create(&temp_path).map_err(io_error(&temp_path))?;
    file.write_all(data).map_err(io_error(&temp_path))?;
    file.sync_all().map_err(io_error(&temp_path))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error(path)(e));
    }

    Ok(())
}
