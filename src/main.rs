//! Headless runner: plays the configured catalog and logs what would be on
//! screen. Useful for checking a server and filter setup without a display.

use anyhow::{bail, Result};
use frame_slideshow::{launch, ControllerHandle, PlaybackState, Settings, Snapshot};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("frame_slideshow=info")),
        )
        .init();

    let (handle, task) = match Settings::load() {
        Ok(settings) => launch(&settings),
        Err(e) => (ControllerHandle::fatal(e.to_string()), None),
    };

    let mut updates = handle.subscribe();
    let mut shown: Option<Showing> = None;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if let PlaybackState::Fatal(reason) = &snapshot.state {
                    bail!("playback failed: {}", reason);
                }
                let showing = Showing::of(&snapshot);
                if showing != shown {
                    shown = showing;
                    on_new_current(&handle, &snapshot);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if let PlaybackState::Fatal(reason) = handle.snapshot().state {
        bail!("playback failed: {}", reason);
    }
    handle.shutdown().await;
    if let Some(task) = task {
        task.await?;
    }
    Ok(())
}

/// One stint of an asset on screen. The same asset shown again after a wrap
/// or a jump is a new showing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Showing {
    promotion: u64,
    id: String,
}

impl Showing {
    fn of(snapshot: &Snapshot) -> Option<Self> {
        Some(Self {
            promotion: snapshot.promotions,
            id: snapshot.current_id()?.to_string(),
        })
    }
}

/// Stand in for a renderer: report the end of each video once its length
/// has elapsed.
fn on_new_current(handle: &ControllerHandle, snapshot: &Snapshot) {
    let Some(current) = &snapshot.current else {
        return;
    };
    let descriptor = current.descriptor();
    tracing::info!(
        "On screen: {} {} {}",
        descriptor.id,
        current.display_url().map(|u| u.to_string()).unwrap_or_default(),
        descriptor.metadata.location().unwrap_or_default()
    );

    if descriptor.is_video() {
        let Some(showing) = Showing::of(snapshot) else {
            return;
        };
        let handle = handle.clone();
        let length = snapshot.length.max(Duration::from_millis(1));
        tokio::spawn(async move {
            tokio::time::sleep(length).await;
            if Showing::of(&handle.snapshot()).as_ref() == Some(&showing) {
                handle.video_ended(&showing.id).await;
            }
        });
    }
}
