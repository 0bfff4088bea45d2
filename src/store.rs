//! Spool for resolved media payloads.
//!
//! Every downloaded rendition is written to its own file and handed out as a
//! [`ResourceHandle`]. A handle stays valid until it is released, which
//! deletes the file. Releasing the same handle twice is reported as an error
//! rather than silently ignored, so lifecycle bugs surface in logs and tests.

use crate::assets::{AssetDescriptor, MediaKind, Variant};
use crate::error::ResourceError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use url::Url;
use walkdir::WalkDir;

const PLAYLIST_FILE: &str = "playlist.json";

/// One spooled rendition.
#[derive(Debug)]
pub struct ResourceHandle {
    serial: u64,
    asset_id: String,
    variant: Variant,
    path: PathBuf,
    size: u64,
}

impl ResourceHandle {
    /// Unique per stored payload, even when an asset is loaded twice.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// `file://` URL the renderer can load directly.
    pub fn url(&self) -> Option<Url> {
        Url::from_file_path(&self.path).ok()
    }
}

#[derive(Debug, Clone)]
struct SpoolEntry {
    path: PathBuf,
    size: u64,
}

/// Spool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpoolStats {
    /// Handles stored and not yet released.
    pub live: usize,
    pub live_bytes: u64,
    /// Handles ever stored.
    pub stored: u64,
    /// Handles released exactly once.
    pub released: u64,
    /// Release attempts on handles that were already gone.
    pub double_releases: u64,
}

#[derive(Debug, Default)]
struct SpoolState {
    next_serial: u64,
    live: HashMap<u64, SpoolEntry>,
    stats: SpoolStats,
}

pub struct ResourceStore {
    spool_dir: PathBuf,
    state: Mutex<SpoolState>,
}

impl ResourceStore {
    /// Open the spool directory, creating it if needed.
    ///
    /// Payload files left behind by a previous run are deleted: no handle
    /// in this process can refer to them.
    pub fn open(spool_dir: impl Into<PathBuf>) -> Result<Self, ResourceError> {
        let spool_dir = spool_dir.into();
        fs::create_dir_all(&spool_dir)?;

        let store = Self {
            spool_dir,
            state: Mutex::new(SpoolState::default()),
        };
        let purged = store.purge_stale();
        tracing::info!(
            "Spool initialized at {:?} ({} stale files removed)",
            store.spool_dir,
            purged
        );
        Ok(store)
    }

    fn purge_stale(&self) -> usize {
        let mut removed = 0;
        for entry in WalkDir::new(&self.spool_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove stale spool file {:?}: {}", entry.path(), e),
            }
            if let Some(parent) = entry.path().parent() {
                let _ = fs::remove_dir(parent); // only succeeds once empty
            }
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, SpoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Directory for one asset: a digest of the id, so arbitrary ids are
    /// safe as path components.
    fn asset_dir(&self, asset_id: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(asset_id.as_bytes()));
        self.spool_dir.join(&digest[..16])
    }

    /// Write a payload to the spool and return its handle.
    pub async fn store(
        &self,
        asset_id: &str,
        kind: MediaKind,
        variant: Variant,
        bytes: &[u8],
    ) -> Result<ResourceHandle, ResourceError> {
        let serial = {
            let mut state = self.lock();
            state.next_serial += 1;
            state.next_serial
        };

        let dir = self.asset_dir(asset_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!(
            "{}-{}.{}",
            variant.as_str(),
            serial,
            variant.extension(kind)
        ));

        let mut file = tokio::fs::File::create(&path).await?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        let size = bytes.len() as u64;
        {
            let mut state = self.lock();
            state.live.insert(
                serial,
                SpoolEntry {
                    path: path.clone(),
                    size,
                },
            );
            state.stats.stored += 1;
            state.stats.live_bytes += size;
        }

        tracing::debug!(
            "Spooled {} {} ({:.2} KB) as #{}",
            asset_id,
            variant.as_str(),
            size as f64 / 1024.0,
            serial
        );

        Ok(ResourceHandle {
            serial,
            asset_id: asset_id.to_string(),
            variant,
            path,
            size,
        })
    }

    /// Free a handle's payload.
    pub fn release(&self, handle: &ResourceHandle) -> Result<(), ResourceError> {
        let entry = {
            let mut state = self.lock();
            match state.live.remove(&handle.serial) {
                Some(entry) => {
                    state.stats.released += 1;
                    state.stats.live_bytes = state.stats.live_bytes.saturating_sub(entry.size);
                    entry
                }
                None => {
                    state.stats.double_releases += 1;
                    return Err(ResourceError::AlreadyReleased(handle.serial));
                }
            }
        };

        tracing::debug!("Releasing #{} ({:?})", handle.serial, entry.path);
        if let Err(e) = fs::remove_file(&entry.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove spooled file {:?}: {}", entry.path, e);
            }
        }
        if let Some(parent) = entry.path.parent() {
            let _ = fs::remove_dir(parent); // fails while other renditions remain
        }
        Ok(())
    }

    pub fn stats(&self) -> SpoolStats {
        let state = self.lock();
        SpoolStats {
            live: state.live.len(),
            ..state.stats
        }
    }

    /// Save the pending playlist so a restart without network can resume.
    pub fn save_playlist(&self, playlist: &[AssetDescriptor]) -> Result<(), ResourceError> {
        let path = self.spool_dir.join(PLAYLIST_FILE);
        let json = serde_json::to_string_pretty(playlist)?;
        fs::write(&path, json)?;
        tracing::debug!("Saved playlist snapshot with {} items", playlist.len());
        Ok(())
    }

    /// Load the last saved playlist, or an empty one if none exists.
    pub fn load_playlist(&self) -> Result<Vec<AssetDescriptor>, ResourceError> {
        let path = self.spool_dir.join(PLAYLIST_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&path)?;
        let playlist: Vec<AssetDescriptor> = serde_json::from_str(&json)?;
        tracing::info!("Loaded cached playlist with {} items", playlist.len());
        Ok(playlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::descriptor;

    #[tokio::test]
    async fn store_and_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::open(dir.path()).unwrap();

        let handle = store
            .store("asset/1", MediaKind::Image, Variant::Primary, b"payload")
            .await
            .unwrap();
        assert!(handle.path().exists());
        assert_eq!(handle.size(), 7);
        assert!(handle.url().unwrap().as_str().starts_with("file://"));
        assert_eq!(store.stats().live, 1);

        store.release(&handle).unwrap();
        assert!(!handle.path().exists());
        let stats = store.stats();
        assert_eq!((stats.live, stats.stored, stats.released), (0, 1, 1));
        assert_eq!(stats.live_bytes, 0);
    }

    #[tokio::test]
    async fn second_release_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::open(dir.path()).unwrap();
        let handle = store
            .store("a", MediaKind::Video, Variant::Preview, b"x")
            .await
            .unwrap();

        store.release(&handle).unwrap();
        assert!(matches!(
            store.release(&handle),
            Err(ResourceError::AlreadyReleased(serial)) if serial == handle.serial()
        ));
        assert_eq!(store.stats().released, 1);
        assert_eq!(store.stats().double_releases, 1);
    }

    #[tokio::test]
    async fn same_asset_twice_gets_independent_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::open(dir.path()).unwrap();
        let first = store
            .store("dup", MediaKind::Image, Variant::Primary, b"1")
            .await
            .unwrap();
        let second = store
            .store("dup", MediaKind::Image, Variant::Primary, b"2")
            .await
            .unwrap();
        assert_ne!(first.serial(), second.serial());
        assert_ne!(first.path(), second.path());

        store.release(&first).unwrap();
        assert!(second.path().exists());
        store.release(&second).unwrap();
    }

    #[tokio::test]
    async fn reopening_purges_leftover_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = {
            let store = ResourceStore::open(dir.path()).unwrap();
            let handle = store
                .store("old", MediaKind::Image, Variant::Primary, b"stale")
                .await
                .unwrap();
            handle.path().to_path_buf()
        };
        assert!(leftover.exists());

        let _store = ResourceStore::open(dir.path()).unwrap();
        assert!(!leftover.exists());
    }

    #[test]
    fn playlist_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResourceStore::open(dir.path()).unwrap();
        assert!(store.load_playlist().unwrap().is_empty());

        let items = vec![
            descriptor("a", MediaKind::Image, 30),
            descriptor("b", MediaKind::Video, 20),
        ];
        store.save_playlist(&items).unwrap();

        let reopened = ResourceStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_playlist().unwrap(), items);
    }
}
