//! Playback control: which asset is on screen, which one is ready next, and
//! when to move between them.

mod controller;
mod handle;
mod state;

pub use controller::PlaybackController;
pub use handle::{Command, ControllerHandle};
pub use state::{progress_percent, Notice, PlaybackState, Snapshot};
