use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// One detection sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stat {
    pub timestamp: DateTime<Utc>,
    pub person_count: u32,
    /// Recorded while the daemon ran in broken mode.
    #[serde(default)]
    pub corrupted: bool,
}

impl Stat {
    pub fn now(person_count: u32, corrupted: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            person_count,
            corrupted,
        }
    }
}

struct Inner {
    path: PathBuf,
    stats: RwLock<Vec<Stat>>,
    file: Mutex<File>,
}

/// Append-only history of detection samples, mirrored to a JSON-lines file.
#[derive(Clone)]
pub struct StatLog {
    inner: Arc<Inner>,
}

impl StatLog {
    /// Opens (creating if needed) the store at `path` and replays its records
    /// oldest first.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let io_error = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let mut stats = match File::open(&path) {
            Ok(file) => replay(&path, file).map_err(io_error)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_error(e)),
        };
        stats.sort_by_key(|s| s.timestamp);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error)?;

        tracing::info!(path = %path.display(), records = stats.len(), "stat log loaded");

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                stats: RwLock::new(stats),
                file: Mutex::new(file),
            }),
        })
    }

    /// Removes the store at `path`, existing or not.
    pub fn wipe(path: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Records `stat` in memory, then durably, and returns its position in
    /// the history. A failed write is logged; the in-memory history keeps the
    /// sample.
    pub fn append(&self, stat: Stat) -> usize {
        let mut file = self.inner.file.lock().unwrap();
        let position = {
            let mut stats = self.inner.stats.write().unwrap();
            stats.push(stat);
            stats.len() - 1
        };

        if let Err(e) = write_record(&self.inner.path, &mut file, &stat) {
            tracing::error!(
                path = %self.inner.path.display(),
                error = %e,
                "failed to save stat"
            );
        }
        position
    }

    pub fn all(&self) -> Vec<Stat> {
        self.inner.stats.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.stats.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn write_record(path: &Path, file: &mut File, stat: &Stat) -> Result<(), StoreError> {
    let mut line = serde_json::to_vec(stat)?;
    line.push(b'\n');
    file.write_all(&line)
        .and_then(|_| file.sync_data())
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn replay(path: &Path, file: File) -> std::io::Result<Vec<Stat>> {
    let mut stats = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Stat>(&line) {
            Ok(stat) => stats.push(stat),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping malformed stat record"
                );
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn stat(secs: i64, person_count: u32) -> Stat {
        Stat {
            timestamp: at(secs),
            person_count,
            corrupted: false,
        }
    }

    #[test]
    fn appends_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = StatLog::open(dir.path().join("stats.jsonl")).unwrap();
        assert!(log.is_empty());

        assert_eq!(log.append(stat(0, 2)), 0);
        assert_eq!(log.append(stat(5, 0)), 1);

        assert_eq!(log.all(), vec![stat(0, 2), stat(5, 0)]);
    }

    #[test]
    fn history_is_replayed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");

        {
            let log = StatLog::open(&path).unwrap();
            log.append(stat(0, 1));
            log.append(stat(5, 3));
        }

        let log = StatLog::open(&path).unwrap();
        assert_eq!(log.all(), vec![stat(0, 1), stat(5, 3)]);

        log.append(stat(10, 0));
        assert_eq!(StatLog::open(&path).unwrap().len(), 3);
    }

    #[test]
    fn replay_sorts_by_time_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let lines = [
            serde_json::to_string(&stat(10, 4)).unwrap(),
            "{not json".to_string(),
            String::new(),
            serde_json::to_string(&stat(0, 1)).unwrap(),
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let log = StatLog::open(&path).unwrap();
        assert_eq!(log.all(), vec![stat(0, 1), stat(10, 4)]);
    }

    #[test]
    fn corrupted_flag_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        let log = StatLog::open(&path).unwrap();
        let sample = Stat {
            corrupted: true,
            ..stat(0, 2)
        };
        log.append(sample);
        assert_eq!(StatLog::open(&path).unwrap().all(), vec![sample]);
    }

    #[test]
    fn wipe_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        StatLog::wipe(&path).unwrap();

        StatLog::open(&path).unwrap().append(stat(0, 1));
        StatLog::wipe(&path).unwrap();
        assert!(StatLog::open(&path).unwrap().is_empty());
    }
}
