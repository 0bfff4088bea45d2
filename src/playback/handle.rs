//! Entry points for the rendering layer.
//!
//! The handle never touches controller state directly: every request becomes a
//! [`Command`] handled by the control loop in arrival order.

use super::state::Snapshot;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug)]
pub enum Command {
    AdvanceNow,
    JumpToDate(DateTime<Utc>),
    ResetToLatest,
    /// The renderer finished playing the video with this asset id.
    VideoEnded(String),
    /// The renderer learned the real length of the current video, in seconds.
    VideoDuration(String, f64),
    DismissNotice,
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl ControllerHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, snapshots: watch::Receiver<Snapshot>) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    /// A handle whose controller never started, stuck in `Fatal`.
    pub fn fatal(reason: impl Into<String>) -> Self {
        let (commands, _) = mpsc::channel(1);
        let (_, snapshots) = watch::channel(Snapshot::fatal(reason));
        Self::new(commands, snapshots)
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    async fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command).await {
            tracing::debug!("Controller is gone, dropping {:?}", e.0);
        }
    }

    /// Replace current with next right away, or as soon as next is ready.
    pub async fn advance_now(&self) {
        self.send(Command::AdvanceNow).await;
    }

    /// Drop everything loaded and continue from assets captured at or before `at`.
    pub async fn jump_to_date(&self, at: DateTime<Utc>) {
        self.send(Command::JumpToDate(at)).await;
    }

    /// Drop everything loaded and continue from the most recent asset.
    pub async fn reset_to_latest(&self) {
        self.send(Command::ResetToLatest).await;
    }

    /// Report that the video `asset_id` finished playing.
    pub async fn video_ended(&self, asset_id: &str) {
        self.send(Command::VideoEnded(asset_id.to_string())).await;
    }

    /// Report the real length of the video `asset_id`, replacing the
    /// catalog's figure for progress and the end-of-video watchdog.
    pub async fn report_video_duration(&self, asset_id: &str, secs: f64) {
        self.send(Command::VideoDuration(asset_id.to_string(), secs))
            .await;
    }

    /// Clear the notice shown to the viewer.
    pub async fn dismiss_notice(&self) {
        self.send(Command::DismissNotice).await;
    }

    /// Stop the control loop and release every outstanding resource.
    /// Returns once the loop has finished.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await;
        let _ = rx.await;
    }
}
