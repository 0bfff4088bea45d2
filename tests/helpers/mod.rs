//! Shared fakes for the playback scenarios.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use frame_slideshow::assets::{AssetDescriptor, AssetMetadata, MediaKind, Variant};
use frame_slideshow::error::{CatalogError, CursorError, LoadError};
use frame_slideshow::{
    AssetCatalog, AssetLoader, ControllerHandle, CursorStore, EngineConfig, Filters, MediaFetcher,
    PlaybackController, Playlist, ResourceStore, Snapshot,
};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

pub fn image(id: &str, secs: i64) -> AssetDescriptor {
    AssetDescriptor {
        id: id.to_string(),
        kind: MediaKind::Image,
        captured_at: at(secs),
        duration_secs: None,
        width: Some(4),
        height: Some(3),
        favorite: false,
        archived: false,
        metadata: AssetMetadata::default(),
    }
}

pub fn video(id: &str, secs: i64, duration_secs: f64) -> AssetDescriptor {
    AssetDescriptor {
        kind: MediaKind::Video,
        duration_secs: Some(duration_secs),
        ..image(id, secs)
    }
}

fn png() -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 3))
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Catalog over an in-memory list, newest first, with at-or-before paging.
#[derive(Default)]
pub struct ScriptedCatalog {
    assets: Mutex<Vec<AssetDescriptor>>,
    cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
    offline: AtomicBool,
    /// When set, each request waits for a permit before answering.
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedCatalog {
    pub fn new(assets: Vec<AssetDescriptor>) -> Self {
        let catalog = Self::default();
        catalog.replace(assets);
        catalog
    }

    /// A catalog whose requests block until the returned semaphore gets
    /// permits.
    pub fn gated(assets: Vec<AssetDescriptor>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let catalog = Self {
            gate: Some(gate.clone()),
            ..Self::new(assets)
        };
        (catalog, gate)
    }

    pub fn replace(&self, mut assets: Vec<AssetDescriptor>) {
        assets.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        *self.assets.lock().unwrap() = assets;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.cursors.lock().unwrap().len()
    }

    pub fn cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetCatalog for ScriptedCatalog {
    async fn fetch_page(
        &self,
        cursor: Option<DateTime<Utc>>,
        page_size: u32,
        _filters: &Filters,
    ) -> Result<Vec<AssetDescriptor>, CatalogError> {
        self.cursors.lock().unwrap().push(cursor);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CatalogError::Connect("connection refused".into()));
        }
        Ok(self
            .assets
            .lock()
            .unwrap()
            .iter()
            .filter(|a| cursor.map_or(true, |c| a.captured_at <= c))
            .take(page_size as usize)
            .cloned()
            .collect())
    }
}

/// Serves a small PNG for images and dummy bytes for videos.
#[derive(Default)]
pub struct ScriptedFetcher {
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedFetcher {
    /// Every fetch of `id` fails with a 404.
    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    /// Fetches of `id` block until [`ScriptedFetcher::open`] is called.
    pub fn hold(&self, id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn open(&self, id: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(id) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch(&self, asset: &AssetDescriptor, variant: Variant) -> Result<Vec<u8>, LoadError> {
        *self.calls.lock().unwrap().entry(asset.id.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().get(&asset.id).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.failing.lock().unwrap().contains(&asset.id) {
            return Err(LoadError::Status {
                id: asset.id.clone(),
                variant: variant.as_str(),
                status: 404,
            });
        }
        Ok(match (asset.kind, variant) {
            (MediaKind::Video, Variant::Primary) => b"not really an mp4".to_vec(),
            _ => png(),
        })
    }
}

/// Cursor store that keeps every saved value.
#[derive(Default)]
pub struct MemoryCursorStore {
    initial: Option<DateTime<Utc>>,
    saved: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl MemoryCursorStore {
    pub fn starting_at(cursor: DateTime<Utc>) -> Self {
        Self {
            initial: Some(cursor),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<Option<DateTime<Utc>>> {
        self.saved.lock().unwrap().clone()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<DateTime<Utc>>, CursorError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .last()
            .copied()
            .unwrap_or(self.initial))
    }

    fn save(&self, cursor: Option<DateTime<Utc>>) -> Result<(), CursorError> {
        self.saved.lock().unwrap().push(cursor);
        Ok(())
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        fetch_timeout: Duration::from_secs(3600),
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub handle: ControllerHandle,
    pub task: JoinHandle<()>,
    pub catalog: Arc<ScriptedCatalog>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub cursor: Arc<MemoryCursorStore>,
    pub store: Arc<ResourceStore>,
    _spool: TempDir,
}

pub struct Setup {
    pub config: EngineConfig,
    pub catalog: ScriptedCatalog,
    pub fetcher: ScriptedFetcher,
    pub cursor: MemoryCursorStore,
    /// Written as the saved playlist before the controller starts.
    pub saved_playlist: Vec<AssetDescriptor>,
}

impl Setup {
    pub fn new(assets: Vec<AssetDescriptor>) -> Self {
        Self::with_catalog(ScriptedCatalog::new(assets))
    }

    pub fn with_catalog(catalog: ScriptedCatalog) -> Self {
        Self {
            config: config(),
            catalog,
            fetcher: ScriptedFetcher::default(),
            cursor: MemoryCursorStore::default(),
            saved_playlist: Vec::new(),
        }
    }

    pub fn start(self) -> Harness {
        let spool = tempfile::tempdir().unwrap();
        let store = Arc::new(ResourceStore::open(spool.path()).unwrap());
        if !self.saved_playlist.is_empty() {
            store.save_playlist(&self.saved_playlist).unwrap();
        }

        let catalog = Arc::new(self.catalog);
        let fetcher = Arc::new(self.fetcher);
        let cursor = Arc::new(self.cursor);
        let loader = AssetLoader::new(
            fetcher.clone(),
            store.clone(),
            self.config.fetch_timeout,
            self.config.retry_delay,
        );
        let playlist = Playlist::new(
            self.config.page_size,
            self.config.refill_low_water,
            self.config.max_pages_per_refill,
            Filters::default(),
        );
        let (handle, task) = PlaybackController::spawn(
            self.config,
            catalog.clone(),
            Arc::new(loader),
            cursor.clone(),
            playlist,
        );

        Harness {
            handle,
            task,
            catalog,
            fetcher,
            cursor,
            store,
            _spool: spool,
        }
    }
}

impl Harness {
    /// Wait for a snapshot matching `pred`, failing after ten virtual minutes.
    pub async fn wait_for(&self, what: &str, pred: impl FnMut(&Snapshot) -> bool) -> Snapshot {
        let mut rx = self.handle.subscribe();
        let snapshot = match tokio::time::timeout(Duration::from_secs(600), rx.wait_for(pred)).await {
            Ok(Ok(snapshot)) => snapshot.clone(),
            Ok(Err(_)) => panic!("controller stopped while waiting for {}", what),
            Err(_) => panic!(
                "timed out waiting for {}, last state {:?}",
                what,
                self.handle.snapshot().state
            ),
        };
        snapshot
    }

    /// Wait for the first snapshot published from now on.
    pub async fn next_publish(&self) -> Snapshot {
        let mut rx = self.handle.subscribe();
        rx.borrow_and_update();
        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        snapshot
    }

    pub async fn stop(self) -> Arc<ResourceStore> {
        self.handle.shutdown().await;
        self.task.await.unwrap();
        self.store
    }
}
