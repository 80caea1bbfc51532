/// State file: the last observed uptime and last alert time, carried between runs.
///
/// Loads are forgiving (a missing or corrupt file reads as "no prior
/// observation"). Saves use the atomic write pattern: write a temp file in
/// the same directory, then rename over the target.
use crate::detector::PersistedState;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from state file operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse state file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to create state directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write temp state file in {}: {source}", .dir.display())]
    Write {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to rename temp state file onto {}: {source}", .path.display())]
    Rename {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Reads and writes one unit's state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, falling back to the zero state on any failure.
    pub fn load(&self) -> PersistedState {
        match self.try_load() {
            Ok(state) => state,
            Err(StateError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::debug!(path = %self.path.display(), "no state file yet, starting fresh");
                PersistedState::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unusable state file");
                PersistedState::default()
            }
        }
    }

    fn try_load(&self) -> Result<PersistedState, StateError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| StateError::Read {
            path: self.path.clone(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| StateError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Atomically replace the state file, creating parent directories as needed.
    ///
    /// A crash before the rename leaves the previous file untouched.
    pub fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| StateError::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let write_err = |e| StateError::Write {
            dir: dir.to_path_buf(),
            source: e,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".unit-watch-state.")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        tmp.persist(&self.path).map_err(|e| StateError::Rename {
            path: self.path.clone(),
            source: e.error,
        })?;

        tracing::debug!(
            path = %self.path.display(),
            last_uptime_ms = state.last_uptime_ms,
            last_alert_ms = state.last_alert_at_ms,
            "state saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> PersistedState {
        PersistedState {
            last_uptime_ms: 123_456,
            last_alert_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_load_missing_file_is_zero_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load(), PersistedState::default());
    }

    #[test]
    fn test_load_corrupt_file_is_zero_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(StateStore::new(&path).load(), PersistedState::default());
    }

    #[test]
    fn test_load_negative_values_is_zero_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"last_uptime_ms": -5, "last_alert_ms": 0}"#).unwrap();
        assert_eq!(StateStore::new(&path).load(), PersistedState::default());
    }

    #[test]
    fn test_load_missing_fields_default_to_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"last_uptime_ms": 900}"#).unwrap();
        let state = StateStore::new(&path).load();
        assert_eq!(state.last_uptime_ms, 900);
        assert_eq!(state.last_alert_at_ms, 0);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load(), sample());
    }

    #[test]
    fn test_save_writes_indented_json_with_wire_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        StateStore::new(&path).save(&sample()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n  \"last_uptime_ms\": 123456"));
        assert!(contents.contains("\"last_alert_ms\": 1700000000000"));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("state.json");
        StateStore::new(&path).save(&sample()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();
        store.save(&PersistedState::default()).unwrap();

        assert_eq!(store.load(), PersistedState::default());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_save_fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let store = StateStore::new(blocker.join("state.json"));
        let err = store.save(&sample()).unwrap_err();
        assert!(matches!(err, StateError::CreateDir { .. }));
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "x");
    }
}
