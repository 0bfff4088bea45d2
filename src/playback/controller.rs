//! The playback state machine.
//!
//! A single task owns every piece of playback state. Catalog pages and asset
//! resolves run on spawned tasks and report back over a channel, tagged with
//! the epoch they were started in. A jump or reset bumps the epoch, so results
//! that arrive late are dropped and their resources released.

use super::handle::{Command, ControllerHandle};
use super::state::{progress_percent, Notice, PlaybackState, Snapshot};
use crate::assets::AssetDescriptor;
use crate::catalog::AssetCatalog;
use crate::config::EngineConfig;
use crate::cursor::CursorStore;
use crate::error::{CatalogError, LoadError};
use crate::loader::{AssetLoader, PlayableResource};
use crate::playlist::{fetch_refill, Playlist, Refill, RefillBatch};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const COMMAND_BUFFER: usize = 32;

/// Which slot a resolve will fill when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Current,
    Next,
}

enum Completion {
    Refill {
        epoch: u64,
        result: Result<RefillBatch, CatalogError>,
    },
    Resolved {
        epoch: u64,
        slot: Slot,
        asset_id: String,
        result: Result<PlayableResource, LoadError>,
    },
}

enum Event {
    Command(Option<Command>),
    Completion(Completion),
    RotationDue,
    ReleaseDue,
    RefillRetryDue,
    Tick,
}

pub struct PlaybackController {
    config: EngineConfig,
    catalog: Arc<dyn AssetCatalog>,
    loader: Arc<AssetLoader>,
    cursor_store: Arc<dyn CursorStore>,
    playlist: Playlist,

    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    snapshots: watch::Sender<Snapshot>,

    cursor: Option<DateTime<Utc>>,
    /// A cursor was persisted from an earlier run.
    resumed: bool,
    /// Descriptors saved by an earlier run, used if the catalog never answers.
    offline_playlist: Vec<AssetDescriptor>,
    epoch: u64,

    current: Option<Arc<PlayableResource>>,
    next: Option<Arc<PlayableResource>>,
    shown_at: Option<Instant>,
    length: Duration,
    rotation_at: Option<Instant>,
    /// Current is due to be replaced as soon as next is ready.
    advance_pending: bool,
    ever_shown: bool,

    resolving: bool,
    refilling: bool,
    refill_failures: u32,
    refill_retry_at: Option<Instant>,
    releases: VecDeque<(Instant, Arc<PlayableResource>)>,

    terminal: Option<PlaybackState>,
    notice: Option<Notice>,
    promotions: u64,
    last_state: PlaybackState,
}

impl PlaybackController {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn AssetCatalog>,
        loader: Arc<AssetLoader>,
        cursor_store: Arc<dyn CursorStore>,
        playlist: Playlist,
    ) -> (Self, ControllerHandle) {
        let cursor = cursor_store.load().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable cursor, starting from latest: {}", e);
            None
        });
        let offline_playlist = loader.store().load_playlist().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable playlist snapshot: {}", e);
            Vec::new()
        });

        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(Snapshot::initial(cursor));

        let controller = Self {
            config,
            catalog,
            loader,
            cursor_store,
            playlist,
            commands,
            completions_tx,
            completions_rx,
            snapshots,
            cursor,
            resumed: cursor.is_some(),
            offline_playlist,
            epoch: 0,
            current: None,
            next: None,
            shown_at: None,
            length: Duration::ZERO,
            rotation_at: None,
            advance_pending: false,
            ever_shown: false,
            resolving: false,
            refilling: false,
            refill_failures: 0,
            refill_retry_at: None,
            releases: VecDeque::new(),
            terminal: None,
            notice: None,
            promotions: 0,
            last_state: PlaybackState::Loading,
        };
        (controller, ControllerHandle::new(commands_tx, snapshots_rx))
    }

    /// Build a controller and run it on its own task.
    pub fn spawn(
        config: EngineConfig,
        catalog: Arc<dyn AssetCatalog>,
        loader: Arc<AssetLoader>,
        cursor_store: Arc<dyn CursorStore>,
        playlist: Playlist,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(config, catalog, loader, cursor_store, playlist);
        (handle, tokio::spawn(controller.run()))
    }

    /// Drive playback until shut down or every handle is dropped.
    pub async fn run(mut self) {
        match self.cursor {
            Some(at) => tracing::info!("Playback resuming at {}", at),
            None => tracing::info!("Playback starting from the latest asset"),
        }
        self.pump();
        self.publish();

        let mut tick = tokio::time::interval(self.config.progress_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reply = None;

        loop {
            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                Some(done) = self.completions_rx.recv() => Event::Completion(done),
                _ = wait_until(self.rotation_at) => Event::RotationDue,
                _ = wait_until(self.releases.front().map(|(at, _)| *at)) => Event::ReleaseDue,
                _ = wait_until(self.refill_retry_at) => Event::RefillRetryDue,
                _ = tick.tick() => Event::Tick,
            };

            match event {
                Event::Command(None) => {
                    tracing::debug!("Every controller handle dropped");
                    break;
                }
                Event::Command(Some(command)) => {
                    if let ControlFlow::Break(done) = self.handle_command(command) {
                        reply = Some(done);
                        break;
                    }
                }
                Event::Completion(completion) => self.handle_completion(completion),
                Event::RotationDue => {
                    self.rotation_at = None;
                    self.on_rotation_due();
                }
                Event::ReleaseDue => self.release_due(Instant::now()),
                Event::RefillRetryDue => {
                    self.refill_retry_at = None;
                    self.pump();
                }
                Event::Tick => {}
            }
            self.publish();
        }

        self.shutdown();
        if let Some(done) = reply {
            let _ = done.send(());
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::AdvanceNow => {
                if self.terminal.is_none() {
                    tracing::info!("Advance requested");
                    self.advance();
                }
            }
            Command::JumpToDate(at) => self.reset(Some(at)),
            Command::ResetToLatest => self.reset(None),
            Command::VideoEnded(id) => {
                if self.current_video_is(&id) {
                    tracing::debug!("Video {} ended", id);
                    self.advance();
                } else {
                    tracing::debug!("Ignoring end of {}, no longer current", id);
                }
            }
            Command::VideoDuration(id, secs) => {
                if self.current_video_is(&id) && secs.is_finite() && secs > 0.0 {
                    tracing::debug!("Video {} reports {:.2}s", id, secs);
                    self.length = Duration::from_secs_f64(secs);
                    if !self.advance_pending {
                        self.arm_rotation();
                    }
                }
            }
            Command::DismissNotice => self.notice = None,
            Command::Shutdown(done) => return ControlFlow::Break(done),
        }
        ControlFlow::Continue(())
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Refill { epoch, result } => {
                if epoch != self.epoch {
                    tracing::debug!("Dropping refill started before a reset");
                    return;
                }
                self.refilling = false;
                match result {
                    Ok(batch) => self.on_refilled(batch),
                    Err(e) => self.on_refill_failed(e),
                }
            }
            Completion::Resolved {
                epoch,
                slot,
                asset_id,
                result,
            } => {
                if epoch != self.epoch {
                    if let Ok(resource) = result {
                        tracing::debug!("Discarding {} resolved before a reset", asset_id);
                        self.release_now(&resource);
                    }
                    return;
                }
                self.resolving = false;
                match result {
                    Ok(resource) => self.on_resolved(slot, resource),
                    Err(e) => tracing::warn!("Skipping {}: {}", asset_id, e),
                }
            }
        }
        self.pump();
    }

    /// Start whatever background work the current state calls for. Never starts
    /// a second resolve or refill while one is in flight.
    fn pump(&mut self) {
        if self.terminal.is_some() {
            return;
        }

        if !self.resolving {
            let slot = if self.current.is_none() {
                Some(Slot::Current)
            } else if self.next.is_none() {
                Some(Slot::Next)
            } else {
                None
            };
            if let Some(slot) = slot {
                if let Some(asset) = self.playlist.pop_front() {
                    self.spawn_resolve(asset, slot);
                }
            }
        }

        if !self.refilling && self.refill_retry_at.is_none() && self.playlist.needs_refill() {
            self.spawn_refill();
        }
    }

    fn spawn_refill(&mut self) {
        self.refilling = true;
        let plan = self.playlist.plan(self.cursor);
        tracing::debug!("Refilling playlist from {:?}", plan.boundary());

        let catalog = self.catalog.clone();
        let tx = self.completions_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = fetch_refill(catalog.as_ref(), plan).await;
            let _ = tx.send(Completion::Refill { epoch, result });
        });
    }

    fn spawn_resolve(&mut self, asset: AssetDescriptor, slot: Slot) {
        self.resolving = true;
        tracing::debug!("Resolving {} for {:?}", asset.id, slot);

        let loader = self.loader.clone();
        let tx = self.completions_tx.clone();
        let epoch = self.epoch;
        let retries = self.config.retry_count;
        tokio::spawn(async move {
            let result = loader.retry_resolve(&asset, retries).await;
            let completion = Completion::Resolved {
                epoch,
                slot,
                asset_id: asset.id,
                result,
            };
            // the controller has stopped; nobody else will free this
            if let Err(mpsc::error::SendError(Completion::Resolved {
                result: Ok(resource),
                ..
            })) = tx.send(completion)
            {
                if let Err(e) = loader.release(&resource) {
                    tracing::warn!("Failed to release orphaned {}: {}", resource.descriptor().id, e);
                }
            }
        });
    }

    fn on_resolved(&mut self, slot: Slot, resource: PlayableResource) {
        let resource = Arc::new(resource);
        match slot {
            Slot::Current => {
                self.current = Some(resource);
                self.ever_shown = true;
                self.begin_showing();
            }
            Slot::Next => {
                tracing::debug!("Next up: {}", resource.descriptor().id);
                self.next = Some(resource);
                if self.advance_pending {
                    self.advance();
                }
            }
        }
    }

    fn on_refilled(&mut self, batch: RefillBatch) {
        if self.refill_failures >= self.config.refill_attempts && self.refill_failures > 0 {
            tracing::info!("Catalog reachable again");
            self.notice = None;
        }
        self.refill_failures = 0;

        let outcome = self.playlist.absorb(batch);
        match outcome {
            Refill::NotNeeded => {}
            Refill::Appended(count) => {
                tracing::debug!("Queued {} assets, {} waiting", count, self.playlist.len());
            }
            Refill::Wrapped(count) => {
                tracing::info!("Reached the oldest asset, restarting from the latest ({} queued)", count);
                self.set_cursor(None);
            }
            Refill::NoMedia => {
                self.on_no_media();
                return;
            }
        }
        self.save_offline_playlist();
    }

    fn on_no_media(&mut self) {
        if self.is_idle() {
            tracing::warn!("No assets to show; waiting for a jump or reset");
            self.terminal = Some(PlaybackState::NoMedia);
        } else {
            tracing::warn!(
                "Catalog returned nothing playable, asking again in {:?}",
                self.config.refill_retry_delay
            );
            self.refill_retry_at = Some(Instant::now() + self.config.refill_retry_delay);
        }
    }

    fn on_refill_failed(&mut self, err: CatalogError) {
        self.refill_failures += 1;
        tracing::warn!(
            "Catalog request failed ({}/{}): {}",
            self.refill_failures,
            self.config.refill_attempts,
            err
        );

        if self.refill_failures >= self.config.refill_attempts {
            if self.is_idle() && !self.offline_playlist.is_empty() {
                tracing::warn!(
                    "Catalog unreachable, playing {} saved assets",
                    self.offline_playlist.len()
                );
                self.playlist.seed(std::mem::take(&mut self.offline_playlist));
            } else if self.is_idle()
                && !self.ever_shown
                && !self.resumed
                && err.is_connection_failure()
            {
                let reason = err.to_string();
                tracing::error!("Giving up: {}", reason);
                self.terminal = Some(PlaybackState::Fatal(reason));
                return;
            }

            if self.refill_failures == self.config.refill_attempts.max(1) {
                self.notice = Some(Notice {
                    message: format!(
                        "Photo server unavailable, retrying every {}s",
                        self.config.refill_retry_delay.as_secs()
                    ),
                });
            }
        }
        self.refill_retry_at = Some(Instant::now() + self.config.refill_retry_delay);
    }

    fn on_rotation_due(&mut self) {
        if let Some(current) = &self.current {
            if current.descriptor().is_video() {
                tracing::warn!(
                    "Video {} never reported its end, moving on",
                    current.descriptor().id
                );
            }
        }
        self.advance();
    }

    /// Promote next to current, or mark the advance as pending until next is
    /// ready.
    fn advance(&mut self) {
        if self.current.is_none() {
            return;
        }
        let Some(next) = self.next.take() else {
            if !self.advance_pending {
                tracing::info!("Next asset not ready, holding current");
            }
            self.advance_pending = true;
            self.rotation_at = None;
            self.pump();
            return;
        };

        self.advance_pending = false;
        let captured_at = next.descriptor().captured_at;
        if let Some(previous) = self.current.replace(next) {
            // the renderer may still be fading it out
            self.releases
                .push_back((Instant::now() + self.config.release_delay, previous));
        }
        self.promotions += 1;
        self.set_cursor(Some(captured_at));
        self.begin_showing();
        self.pump();
    }

    fn begin_showing(&mut self) {
        let Some(current) = &self.current else {
            return;
        };
        let descriptor = current.descriptor();
        tracing::info!(
            "Showing {} ({:?}, captured {})",
            descriptor.id,
            descriptor.kind,
            descriptor.captured_at
        );
        self.length = current.display_duration(self.config.display_duration);
        self.shown_at = Some(Instant::now());
        self.arm_rotation();
    }

    /// Images advance after their display time. Videos advance when the
    /// renderer says they ended; the deadline here is only a watchdog.
    fn arm_rotation(&mut self) {
        let (Some(shown_at), Some(current)) = (self.shown_at, &self.current) else {
            return;
        };
        let grace = if current.descriptor().is_video() {
            self.config.video_end_grace
        } else {
            Duration::ZERO
        };
        self.rotation_at = Some(shown_at + self.length + grace);
    }

    fn reset(&mut self, cursor: Option<DateTime<Utc>>) {
        if matches!(self.terminal, Some(PlaybackState::Fatal(_))) {
            tracing::warn!("Ignoring reset, playback has failed");
            return;
        }
        match cursor {
            Some(at) => tracing::info!("Jumping to {}", at),
            None => tracing::info!("Resetting to the latest asset"),
        }

        self.epoch += 1;
        self.resolving = false;
        self.refilling = false;
        self.refill_failures = 0;
        self.refill_retry_at = None;
        self.terminal = None;
        self.notice = None;
        self.advance_pending = false;
        self.playlist.clear();

        let dropped: Vec<_> = self.current.take().into_iter().chain(self.next.take()).collect();
        for resource in dropped {
            self.release_now(&resource);
        }
        self.shown_at = None;
        self.length = Duration::ZERO;
        self.rotation_at = None;

        self.set_cursor(cursor);
        self.pump();
    }

    fn set_cursor(&mut self, cursor: Option<DateTime<Utc>>) {
        self.cursor = cursor;
        if let Err(e) = self.cursor_store.save(cursor) {
            tracing::warn!("Failed to persist cursor: {}", e);
        }
    }

    fn release_now(&self, resource: &PlayableResource) {
        if let Err(e) = self.loader.release(resource) {
            tracing::warn!("Failed to release {}: {}", resource.descriptor().id, e);
        }
    }

    fn release_due(&mut self, now: Instant) {
        while self.releases.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, resource)) = self.releases.pop_front() {
                self.release_now(&resource);
            }
        }
    }

    fn save_offline_playlist(&self) {
        let mut descriptors: Vec<AssetDescriptor> = self
            .current
            .iter()
            .chain(self.next.iter())
            .map(|r| r.descriptor().clone())
            .collect();
        descriptors.extend(self.playlist.snapshot());
        if let Err(e) = self.loader.store().save_playlist(&descriptors) {
            tracing::warn!("Failed to save playlist snapshot: {}", e);
        }
    }

    fn current_video_is(&self, id: &str) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.descriptor().id == id && c.descriptor().is_video())
    }

    /// Nothing on screen, nothing ready and nothing on the way.
    fn is_idle(&self) -> bool {
        self.current.is_none() && self.next.is_none() && !self.resolving && self.playlist.is_empty()
    }

    fn state(&self) -> PlaybackState {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }
        match (&self.current, self.advance_pending) {
            (None, _) => PlaybackState::Loading,
            (Some(_), true) => PlaybackState::Stalled,
            (Some(_), false) => PlaybackState::Playing,
        }
    }

    fn publish(&mut self) {
        let state = self.state();
        if state != self.last_state {
            tracing::info!("Playback {:?} -> {:?}", self.last_state, state);
            self.last_state = state.clone();
        }

        let progress = match (self.shown_at, &self.current) {
            (Some(at), Some(_)) => progress_percent(Instant::now().saturating_duration_since(at), self.length),
            _ => 0.0,
        };
        self.snapshots.send_replace(Snapshot {
            state,
            current: self.current.clone(),
            next: self.next.clone(),
            shown_at: self.shown_at,
            length: self.length,
            progress,
            cursor: self.cursor,
            notice: self.notice.clone(),
            promotions: self.promotions,
            queued: self.playlist.len(),
        });
    }

    fn shutdown(&mut self) {
        tracing::info!("Playback stopping");
        self.epoch += 1;
        self.save_offline_playlist();

        // late resolves release their own resources once the channel is closed
        self.completions_rx.close();
        while let Ok(completion) = self.completions_rx.try_recv() {
            if let Completion::Resolved {
                result: Ok(resource),
                ..
            } = completion
            {
                self.release_now(&resource);
            }
        }

        let outstanding: Vec<_> = self
            .releases
            .drain(..)
            .map(|(_, resource)| resource)
            .chain(self.current.take())
            .chain(self.next.take())
            .collect();
        for resource in outstanding {
            self.release_now(&resource);
        }
        self.shown_at = None;
        self.advance_pending = false;
        self.publish();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
