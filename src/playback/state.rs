//! Observable playback state, as published to the rendering layer.

use crate::loader::PlayableResource;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing on screen yet.
    Loading,
    /// Current is on screen and the rotation timer is armed.
    Playing,
    /// Current is due to be replaced but no next resource is ready.
    Stalled,
    /// The catalog holds nothing that passes the filters. Left only by a reset.
    NoMedia,
    /// Unrecoverable; carries the reason. Left only by restarting.
    Fatal(String),
}

impl PlaybackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::NoMedia | PlaybackState::Fatal(_))
    }
}

/// A transient, dismissible problem worth showing the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: PlaybackState,
    pub current: Option<Arc<PlayableResource>>,
    /// Ready to be preloaded by the renderer.
    pub next: Option<Arc<PlayableResource>>,
    /// When current went on screen.
    pub shown_at: Option<Instant>,
    /// How long current stays on screen.
    pub length: Duration,
    /// 0 to 100.
    pub progress: f64,
    pub cursor: Option<DateTime<Utc>>,
    pub notice: Option<Notice>,
    /// Number of next-to-current promotions so far.
    pub promotions: u64,
    /// Descriptors waiting in the playlist.
    pub queued: usize,
}

impl Snapshot {
    pub fn initial(cursor: Option<DateTime<Utc>>) -> Self {
        Self {
            state: PlaybackState::Loading,
            current: None,
            next: None,
            shown_at: None,
            length: Duration::ZERO,
            progress: 0.0,
            cursor,
            notice: None,
            promotions: 0,
            queued: 0,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            state: PlaybackState::Fatal(reason.into()),
            ..Self::initial(None)
        }
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|r| r.descriptor().id.as_str())
    }

    pub fn next_id(&self) -> Option<&str> {
        self.next.as_ref().map(|r| r.descriptor().id.as_str())
    }
}

/// Percentage of `length` covered by `elapsed`, clamped to 0..=100.
pub fn progress_percent(elapsed: Duration, length: Duration) -> f64 {
    if length.is_zero() {
        return 100.0;
    }
    (elapsed.as_secs_f64() / length.as_secs_f64() * 100.0).clamp(0.0, 100.0)
}
