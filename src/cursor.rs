//! Persistence of the pagination cursor.
//!
//! The cursor is the capture time of the asset last promoted to current, so a
//! restart resumes near where playback stopped. `None` means "start from the
//! most recent asset".

use crate::error::CursorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Where the pagination cursor survives restarts.
pub trait CursorStore: Send + Sync {
    /// Read the saved cursor, `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<DateTime<Utc>>, CursorError>;
    /// Replace the saved cursor.
    fn save(&self, cursor: Option<DateTime<Utc>>) -> Result<(), CursorError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CursorFile {
    /// ISO-8601, absent when playback should start from the latest asset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cursor: Option<DateTime<Utc>>,
}

/// Stores the cursor in a small JSON file.
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    /// Create a store backed by the file at `path`. The file is created on
    /// first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<DateTime<Utc>>, CursorError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)?;
        let file: CursorFile = serde_json::from_str(&json)?;
        tracing::info!("Restored cursor {:?} from {:?}", file.cursor, self.path);
        Ok(file.cursor)
    }

    fn save(&self, cursor: Option<DateTime<Utc>>) -> Result<(), CursorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&CursorFile { cursor })?;

        // write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!("Persisted cursor {:?}", cursor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_file_means_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCursorStore::new(dir.path().join("cursor.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn cursor_round_trips_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cursor.json");
        let store = FileCursorStore::new(&path);

        let at = Utc.with_ymd_and_hms(2021, 8, 14, 18, 30, 0).unwrap();
        store.save(Some(at)).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("2021-08-14T18:30:00"));
        assert_eq!(FileCursorStore::new(&path).load().unwrap(), Some(at));

        store.save(None).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileCursorStore::new(&path).load(),
            Err(CursorError::Parse(_))
        ));
    }
}
