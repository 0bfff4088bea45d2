//! Asset descriptors as delivered by the catalog.
//!
//! A descriptor names one media item and carries everything the engine needs
//! to schedule it, but none of its bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of media an asset holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaKind {
    Image,
    Video,
}

/// Shape of an asset after rotation has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

/// Free-form capture metadata. Only displayed, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub city: Option<String>,
    pub country: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens: Option<String>,
    pub f_number: Option<f64>,
    pub exposure_time: Option<String>,
    pub iso: Option<u32>,
}

impl AssetMetadata {
    /// "City, Country" with whichever parts are known.
    pub fn location(&self) -> Option<String> {
        match (self.city.as_deref(), self.country.as_deref()) {
            (Some(city), Some(country)) => Some(format!("{}, {}", city, country)),
            (Some(part), None) | (None, Some(part)) => Some(part.to_string()),
            (None, None) => None,
        }
    }
}

/// One catalog item.
///
/// Descriptors are produced by the catalog client and never modified
/// afterwards. The catalog may repeat an id; the engine does not deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub id: String,
    pub kind: MediaKind,
    pub captured_at: DateTime<Utc>,
    /// Length of a video in seconds, as reported by the catalog.
    pub duration_secs: Option<f64>,
    /// Display width after EXIF rotation.
    pub width: Option<u32>,
    /// Display height after EXIF rotation.
    pub height: Option<u32>,
    pub favorite: bool,
    pub archived: bool,
    #[serde(default)]
    pub metadata: AssetMetadata,
}

impl AssetDescriptor {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Orientation derived from the display dimensions, if both are known.
    pub fn orientation(&self) -> Option<Orientation> {
        let (w, h) = (self.width?, self.height?);
        Some(if w > h {
            Orientation::Landscape
        } else if h > w {
            Orientation::Portrait
        } else {
            Orientation::Square
        })
    }

    /// Playback length of a video. `None` for images and for missing,
    /// zero, negative or non-finite durations.
    pub fn video_duration(&self) -> Option<Duration> {
        if !self.is_video() {
            return None;
        }
        self.duration_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Which rendition of an asset is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Full resolution image, or the playable video stream.
    Primary,
    /// Reduced rendition: blurred backdrop for images, poster for videos.
    Preview,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Primary => "primary",
            Variant::Preview => "preview",
        }
    }

    pub fn extension(&self, kind: MediaKind) -> &'static str {
        match (self, kind) {
            (Variant::Primary, MediaKind::Video) => "mp4",
            (Variant::Primary, MediaKind::Image) => "img",
            (Variant::Preview, _) => "jpg",
        }
    }
}
