//! Slideshow engine for a photo frame.
//!
//! Pages through a remote photo catalog newest-first, keeps one asset ready
//! behind the one on screen, and rotates between them. Rendering is left to
//! the caller, which drives the engine through a [`ControllerHandle`].

pub mod assets;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod filter;
pub mod loader;
pub mod playback;
pub mod playlist;
pub mod store;

pub use assets::{AssetDescriptor, MediaKind, Variant};
pub use catalog::{AssetCatalog, HttpCatalogClient};
pub use config::{EngineConfig, Settings};
pub use cursor::{CursorStore, FileCursorStore};
pub use engine::launch;
pub use filter::{AssetPredicate, Filters};
pub use loader::{AssetLoader, MediaFetcher, PlayableResource};
pub use playback::{ControllerHandle, PlaybackController, PlaybackState, Snapshot};
pub use playlist::{Playlist, Refill};
pub use store::ResourceStore;
