//! Settings loading.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file
//! (`frame-slideshow.toml`, or the path in `FRAME_CONFIG`), then environment
//! variables such as `FRAME_CATALOG__URL` and `FRAME_PLAYBACK__DISPLAY_SECS`.

use crate::error::ConfigError;
use crate::filter::Filters;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "frame-slideshow.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub catalog: CatalogSettings,
    pub playback: PlaybackSettings,
    pub filters: Filters,
    pub storage: StorageSettings,
}

/// Where the catalog lives and how to talk to it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub url: String,
    pub api_key: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            page_size: 50,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// How long an image stays on screen.
    pub display_secs: f64,
    /// Extra resolve attempts per asset before it is skipped.
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub fetch_timeout_secs: u64,
    /// Delay between the start of a transition and freeing the outgoing asset.
    pub release_delay_ms: u64,
    pub progress_tick_ms: u64,
    /// Refill once the playlist holds this many descriptors or fewer.
    pub refill_low_water: usize,
    /// Consecutive failed page fetches before a notice is raised.
    pub refill_attempts: u32,
    pub refill_retry_secs: u64,
    /// Slack past a video's length before it is advanced without an end signal.
    pub video_end_grace_secs: u64,
    pub max_pages_per_refill: u32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            display_secs: 15.0,
            retry_count: 1,
            retry_delay_ms: 1000,
            fetch_timeout_secs: 10,
            release_delay_ms: 1000,
            progress_tick_ms: 250,
            refill_low_water: 0,
            refill_attempts: 3,
            refill_retry_secs: 10,
            video_end_grace_secs: 5,
            max_pages_per_refill: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory resolved payloads are written to while on screen.
    pub spool_dir: PathBuf,
    /// File holding the persisted pagination cursor.
    pub state_file: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from("cache/spool"),
            state_file: PathBuf::from("cache/cursor.json"),
        }
    }
}

/// Timing and sizing knobs handed to the engine components.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub page_size: u32,
    pub display_duration: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub fetch_timeout: Duration,
    pub release_delay: Duration,
    pub progress_tick: Duration,
    pub refill_low_water: usize,
    pub refill_attempts: u32,
    pub refill_retry_delay: Duration,
    pub video_end_grace: Duration,
    pub max_pages_per_refill: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Settings::default().engine()
    }
}

impl Settings {
    /// Load settings from the default file location and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("FRAME_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        tracing::info!("Loading configuration from {} and FRAME_* environment", path);

        let cfg = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("FRAME")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.url.trim().is_empty() {
            return Err(ConfigError::Missing("catalog.url"));
        }
        if self.catalog.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("catalog.api_key"));
        }

        let url = url::Url::parse(&self.catalog.url).map_err(|e| ConfigError::Invalid {
            key: "catalog.url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "catalog.url",
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if self.catalog.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "catalog.page_size",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.playback.display_secs.is_finite() && self.playback.display_secs > 0.0) {
            return Err(ConfigError::Invalid {
                key: "playback.display_secs",
                reason: "must be a positive number of seconds".into(),
            });
        }
        Ok(())
    }

    pub fn engine(&self) -> EngineConfig {
        let p = &self.playback;
        EngineConfig {
            page_size: self.catalog.page_size.max(1),
            display_duration: Duration::from_secs_f64(p.display_secs.max(0.001)),
            retry_count: p.retry_count,
            retry_delay: Duration::from_millis(p.retry_delay_ms),
            fetch_timeout: Duration::from_secs(p.fetch_timeout_secs),
            release_delay: Duration::from_millis(p.release_delay_ms),
            progress_tick: Duration::from_millis(p.progress_tick_ms.max(1)),
            refill_low_water: p.refill_low_water,
            refill_attempts: p.refill_attempts.max(1),
            refill_retry_delay: Duration::from_secs(p.refill_retry_secs),
            video_end_grace: Duration::from_secs(p.video_end_grace_secs),
            max_pages_per_refill: p.max_pages_per_refill.max(1),
        }
    }
}
