//! Wiring from [`Settings`] to a running controller.

use crate::catalog::HttpCatalogClient;
use crate::config::Settings;
use crate::cursor::FileCursorStore;
use crate::loader::{AssetLoader, HttpMediaFetcher};
use crate::playback::{ControllerHandle, PlaybackController};
use crate::playlist::Playlist;
use crate::store::ResourceStore;
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Start playback against the configured photo server.
///
/// Anything that prevents the controller from starting (missing keys, an
/// unusable spool directory) is reported through a handle stuck in `Fatal`
/// instead of an error, so the caller always has something to render.
pub fn launch(settings: &Settings) -> (ControllerHandle, Option<JoinHandle<()>>) {
    match build(settings) {
        Ok((controller, handle)) => (handle, Some(tokio::spawn(controller.run()))),
        Err(e) => {
            let reason = format!("{:#}", e);
            tracing::error!("Cannot start playback: {}", reason);
            (ControllerHandle::fatal(reason), None)
        }
    }
}

fn build(settings: &Settings) -> Result<(PlaybackController, ControllerHandle)> {
    settings.validate()?;
    let engine = settings.engine();

    let catalog = HttpCatalogClient::new(&settings.catalog)?;
    // media downloads are bounded by the loader's own fetch timeout
    let fetcher = HttpMediaFetcher::new(
        Client::new(),
        &settings.catalog.url,
        &settings.catalog.api_key,
    );

    let store = ResourceStore::open(&settings.storage.spool_dir).with_context(|| {
        format!("opening spool directory {:?}", settings.storage.spool_dir)
    })?;
    let loader = AssetLoader::new(
        Arc::new(fetcher),
        Arc::new(store),
        engine.fetch_timeout,
        engine.retry_delay,
    );
    let cursor_store = FileCursorStore::new(&settings.storage.state_file);
    let playlist = Playlist::new(
        engine.page_size,
        engine.refill_low_water,
        engine.max_pages_per_refill,
        settings.filters.clone(),
    );

    Ok(PlaybackController::new(
        engine,
        Arc::new(catalog),
        Arc::new(loader),
        Arc::new(cursor_store),
        playlist,
    ))
}
