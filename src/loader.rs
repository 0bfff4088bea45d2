//! Resolving descriptors into playable resources.
//!
//! A resolve downloads the primary and preview renditions in parallel, checks
//! image payloads, and spools both. Either both renditions end up spooled or
//! neither does.

use crate::assets::{AssetDescriptor, MediaKind, Variant};
use crate::error::{LoadError, ResourceError};
use crate::store::{ResourceHandle, ResourceStore};
use async_trait::async_trait;
use reqwest::Client;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Raw byte access to asset renditions.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, asset: &AssetDescriptor, variant: Variant) -> Result<Vec<u8>, LoadError>;
}

/// Fetches renditions from the photo server.
pub struct HttpMediaFetcher {
    client: Client,
    base: String,
    api_key: String,
}

impl HttpMediaFetcher {
    pub fn new(client: Client, base: &str, api_key: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Endpoint for one rendition of an asset.
    pub fn variant_url(&self, asset: &AssetDescriptor, variant: Variant) -> String {
        let id = urlencoding::encode(&asset.id);
        match (variant, asset.kind) {
            (Variant::Primary, MediaKind::Image) => format!("{}/api/assets/{}/original", self.base, id),
            (Variant::Primary, MediaKind::Video) => {
                format!("{}/api/assets/{}/video/playback", self.base, id)
            }
            (Variant::Preview, _) => {
                format!("{}/api/assets/{}/thumbnail?size=preview", self.base, id)
            }
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, asset: &AssetDescriptor, variant: Variant) -> Result<Vec<u8>, LoadError> {
        let url = self.variant_url(asset, variant);
        tracing::debug!("Downloading {} of {} from {}", variant.as_str(), asset.id, url);

        let fetch_error = |e: reqwest::Error| {
            if e.is_timeout() {
                LoadError::Timeout {
                    id: asset.id.clone(),
                    variant: variant.as_str(),
                }
            } else {
                LoadError::Fetch {
                    id: asset.id.clone(),
                    variant: variant.as_str(),
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(fetch_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                id: asset.id.clone(),
                variant: variant.as_str(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(fetch_error)?;
        Ok(bytes.to_vec())
    }
}

/// A descriptor with both renditions spooled and ready to show.
#[derive(Debug)]
pub struct PlayableResource {
    descriptor: AssetDescriptor,
    primary: ResourceHandle,
    preview: ResourceHandle,
    display_size: Option<(u32, u32)>,
}

impl PlayableResource {
    pub fn descriptor(&self) -> &AssetDescriptor {
        &self.descriptor
    }

    pub fn primary(&self) -> &ResourceHandle {
        &self.primary
    }

    /// Blurred backdrop for images, poster frame for videos.
    pub fn preview(&self) -> &ResourceHandle {
        &self.preview
    }

    pub fn display_url(&self) -> Option<Url> {
        self.primary.url()
    }

    pub fn preview_url(&self) -> Option<Url> {
        self.preview.url()
    }

    /// Pixel size read from the payload, or the catalog's idea of it.
    pub fn display_size(&self) -> Option<(u32, u32)> {
        self.display_size
            .or_else(|| Some((self.descriptor.width?, self.descriptor.height?)))
    }

    /// How long this resource stays current: the video's own length when it
    /// has a usable one, otherwise the fixed image duration.
    pub fn display_duration(&self, fallback: Duration) -> Duration {
        self.descriptor.video_duration().unwrap_or(fallback)
    }
}

pub struct AssetLoader {
    fetcher: Arc<dyn MediaFetcher>,
    store: Arc<ResourceStore>,
    fetch_timeout: Duration,
    retry_delay: Duration,
}

impl AssetLoader {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<ResourceStore>,
        fetch_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            fetch_timeout,
            retry_delay,
        }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    async fn fetch_variant(
        &self,
        asset: &AssetDescriptor,
        variant: Variant,
    ) -> Result<Vec<u8>, LoadError> {
        tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(asset, variant))
            .await
            .map_err(|_| LoadError::Timeout {
                id: asset.id.clone(),
                variant: variant.as_str(),
            })?
    }

    /// One attempt at resolving `asset`.
    pub async fn resolve(&self, asset: &AssetDescriptor) -> Result<PlayableResource, LoadError> {
        let (primary, preview) = tokio::join!(
            self.fetch_variant(asset, Variant::Primary),
            self.fetch_variant(asset, Variant::Preview)
        );
        let primary = primary?;
        let preview = preview?;

        let display_size = match asset.kind {
            MediaKind::Image => probe_image(&asset.id, &primary)?,
            MediaKind::Video => None,
        };

        let spool_error = |source: ResourceError| LoadError::Store {
            id: asset.id.clone(),
            source,
        };
        let primary = self
            .store
            .store(&asset.id, asset.kind, Variant::Primary, &primary)
            .await
            .map_err(spool_error)?;
        let preview = match self
            .store
            .store(&asset.id, asset.kind, Variant::Preview, &preview)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(release_err) = self.store.release(&primary) {
                    tracing::warn!("Failed to drop half-spooled {}: {}", asset.id, release_err);
                }
                return Err(spool_error(e));
            }
        };

        Ok(PlayableResource {
            descriptor: asset.clone(),
            primary,
            preview,
            display_size,
        })
    }

    /// Resolve with up to `max_retries` extra attempts, pausing a fixed delay
    /// between attempts. The last error is returned once attempts run out.
    pub async fn retry_resolve(
        &self,
        asset: &AssetDescriptor,
        max_retries: u32,
    ) -> Result<PlayableResource, LoadError> {
        let mut attempt = 0;
        loop {
            match self.resolve(asset).await {
                Ok(resource) => return Ok(resource),
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Loading {} failed ({}), retry {}/{} in {:?}",
                        asset.id,
                        e,
                        attempt,
                        max_retries,
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::warn!("Giving up on {} after {} attempts: {}", asset.id, attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }

    /// Free both renditions of a resource.
    pub fn release(&self, resource: &PlayableResource) -> Result<(), ResourceError> {
        let primary = self.store.release(&resource.primary);
        let preview = self.store.release(&resource.preview);
        primary.and(preview)
    }
}

/// Read the pixel size of an image payload.
///
/// Formats the decoder does not know (HEIC, RAW) are passed through without a
/// size; a recognised format that fails to decode is corrupt.
fn probe_image(id: &str, bytes: &[u8]) -> Result<Option<(u32, u32)>, LoadError> {
    let corrupt = |reason: String| LoadError::Corrupt {
        id: id.to_string(),
        reason,
    };
    if bytes.is_empty() {
        return Err(corrupt("empty payload".into()));
    }

    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| corrupt(e.to_string()))?;
    match reader.into_dimensions() {
        Ok(size) => Ok(Some(size)),
        Err(image::ImageError::Unsupported(_)) => Ok(None),
        Err(e) => Err(corrupt(e.to_string())),
    }
}
