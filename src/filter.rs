//! Static asset filters.
//!
//! Filters are fixed at startup. The catalog client forwards whatever the
//! server can evaluate as query parameters, and the playlist re-applies the
//! full predicate client-side, so a server that ignores a parameter never
//! leaks a non-matching asset into the slideshow.

use crate::assets::{AssetDescriptor, Orientation};
use serde::Deserialize;

/// Which orientations the display accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationFilter {
    #[default]
    Any,
    Landscape,
    Portrait,
}

/// Predicate applied to every descriptor before it enters the playlist.
pub trait AssetPredicate: Send + Sync {
    fn accepts(&self, asset: &AssetDescriptor) -> bool;
}

/// Adapts a closure into an [`AssetPredicate`].
pub struct FnPredicate<F>(pub F);

impl<F> AssetPredicate for FnPredicate<F>
where
    F: Fn(&AssetDescriptor) -> bool + Send + Sync,
{
    fn accepts(&self, asset: &AssetDescriptor) -> bool {
        (self.0)(asset)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub favorites_only: bool,
    pub include_archived: bool,
    pub orientation: OrientationFilter,
    pub include_videos: bool,
    /// Videos longer than this are skipped. Videos of unknown length pass.
    pub max_video_secs: Option<f64>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            favorites_only: false,
            include_archived: false,
            orientation: OrientationFilter::Any,
            include_videos: true,
            max_video_secs: None,
        }
    }
}

impl AssetPredicate for Filters {
    fn accepts(&self, asset: &AssetDescriptor) -> bool {
        if self.favorites_only && !asset.favorite {
            return false;
        }
        if asset.archived && !self.include_archived {
            return false;
        }
        if asset.is_video() {
            if !self.include_videos {
                return false;
            }
            if let (Some(limit), Some(secs)) = (self.max_video_secs, asset.duration_secs) {
                if secs > limit {
                    return false;
                }
            }
        }

        // Square and unknown shapes fit either mode.
        match (self.orientation, asset.orientation()) {
            (OrientationFilter::Landscape, Some(Orientation::Portrait)) => false,
            (OrientationFilter::Portrait, Some(Orientation::Landscape)) => false,
            _ => true,
        }
    }
}
