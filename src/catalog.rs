//! Remote asset catalog access.
//!
//! The catalog is queried one page at a time with a capture-time cursor. The
//! client performs exactly one request per call and never retries; the
//! playlist and controller own the retry policy.

use crate::assets::{AssetDescriptor, AssetMetadata, MediaKind};
use crate::config::CatalogSettings;
use crate::error::CatalogError;
use crate::filter::Filters;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Source of asset descriptors.
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    /// Fetch up to `page_size` descriptors captured at or before `cursor`
    /// (the most recent ones when `cursor` is `None`), newest first.
    ///
    /// An empty page is the end-of-catalog signal, not an error.
    async fn fetch_page(
        &self,
        cursor: Option<DateTime<Utc>>,
        page_size: u32,
        filters: &Filters,
    ) -> Result<Vec<AssetDescriptor>, CatalogError>;
}

/// Body of a metadata search request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    size: u32,
    order: &'static str,
    with_exif: bool,
    with_archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    taken_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_favorite: Option<bool>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    asset_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    assets: SearchPage,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<WireAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAsset {
    id: String,
    #[serde(rename = "type")]
    asset_type: String,
    file_created_at: DateTime<Utc>,
    duration: Option<String>,
    #[serde(default)]
    is_favorite: bool,
    #[serde(default)]
    is_archived: bool,
    exif_info: Option<WireExif>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExif {
    exif_image_width: Option<u32>,
    exif_image_height: Option<u32>,
    orientation: Option<serde_json::Value>,
    city: Option<String>,
    country: Option<String>,
    make: Option<String>,
    model: Option<String>,
    lens_model: Option<String>,
    f_number: Option<f64>,
    exposure_time: Option<String>,
    iso: Option<u32>,
}

impl WireExif {
    /// EXIF orientations 5 through 8 are rotated by a quarter turn.
    fn is_quarter_turn(&self) -> bool {
        let value = match &self.orientation {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        matches!(value, Some(5..=8))
    }
}

impl WireAsset {
    fn into_descriptor(self) -> Option<AssetDescriptor> {
        let kind = match self.asset_type.as_str() {
            "IMAGE" => MediaKind::Image,
            "VIDEO" => MediaKind::Video,
            other => {
                tracing::debug!("Ignoring asset {} of unsupported type {}", self.id, other);
                return None;
            }
        };

        let exif = self.exif_info.unwrap_or_default();
        let (mut width, mut height) = (exif.exif_image_width, exif.exif_image_height);
        if exif.is_quarter_turn() {
            std::mem::swap(&mut width, &mut height);
        }

        Some(AssetDescriptor {
            id: self.id,
            kind,
            captured_at: self.file_created_at,
            duration_secs: self.duration.as_deref().and_then(parse_duration),
            width,
            height,
            favorite: self.is_favorite,
            archived: self.is_archived,
            metadata: AssetMetadata {
                city: exif.city,
                country: exif.country,
                camera_make: exif.make,
                camera_model: exif.model,
                lens: exif.lens_model,
                f_number: exif.f_number,
                exposure_time: exif.exposure_time,
                iso: exif.iso,
            },
        })
    }
}

/// Parse a catalog duration of the form `H:MM:SS.ffffff` into seconds.
pub fn parse_duration(raw: &str) -> Option<f64> {
    let mut parts = raw.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    total.is_finite().then_some(total)
}

/// Catalog client speaking the photo server's search API.
pub struct HttpCatalogClient {
    client: Client,
    base: String,
    api_key: String,
}

impl HttpCatalogClient {
    /// Create a client with its own connection pool and the configured
    /// request timeout.
    pub fn new(settings: &CatalogSettings) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| CatalogError::Connect(e.to_string()))?;
        Self::with_client(client, &settings.url, &settings.api_key)
    }

    /// Build on top of an existing HTTP client so connections are shared
    /// with the media fetcher.
    pub fn with_client(client: Client, base: &str, api_key: &str) -> Result<Self, CatalogError> {
        let base = base.trim_end_matches('/');
        Url::parse(base)?;
        Ok(Self {
            client,
            base: base.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn search_request(
        cursor: Option<DateTime<Utc>>,
        page_size: u32,
        filters: &Filters,
    ) -> SearchRequest {
        SearchRequest {
            size: page_size,
            order: "desc",
            with_exif: true,
            with_archived: filters.include_archived,
            taken_before: cursor.map(|c| c.to_rfc3339_opts(SecondsFormat::Millis, true)),
            is_favorite: filters.favorites_only.then_some(true),
            asset_type: (!filters.include_videos).then_some("IMAGE"),
        }
    }
}

#[async_trait]
impl AssetCatalog for HttpCatalogClient {
    async fn fetch_page(
        &self,
        cursor: Option<DateTime<Utc>>,
        page_size: u32,
        filters: &Filters,
    ) -> Result<Vec<AssetDescriptor>, CatalogError> {
        let url = Url::parse(&format!("{}/api/search/metadata", self.base))?;
        let body = Self::search_request(cursor, page_size, filters);
        tracing::debug!("Fetching catalog page: size={} before={:?}", page_size, body.taken_before);

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            tracing::warn!("Catalog search failed with {}: {}", status, message);
            return Err(CatalogError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;

        let page: Vec<AssetDescriptor> = parsed
            .assets
            .items
            .into_iter()
            .filter_map(WireAsset::into_descriptor)
            .collect();
        tracing::debug!("Catalog page returned {} assets", page.len());
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn durations_parse_to_seconds() {
        assert_eq!(parse_duration("0:00:09.500000"), Some(9.5));
        assert_eq!(parse_duration("1:02:03"), Some(3723.0));
        assert_eq!(parse_duration("bogus"), None);
        assert_eq!(parse_duration("0:00"), None);
    }

    #[test]
    fn wire_assets_map_to_descriptors() {
        let json = serde_json::json!({
            "assets": { "items": [
                {
                    "id": "img-1",
                    "type": "IMAGE",
                    "fileCreatedAt": "2023-06-01T10:00:00.000Z",
                    "isFavorite": true,
                    "exifInfo": {
                        "exifImageWidth": 4000,
                        "exifImageHeight": 3000,
                        "orientation": "6",
                        "city": "Kosice",
                        "make": "FUJIFILM"
                    }
                },
                {
                    "id": "vid-1",
                    "type": "VIDEO",
                    "fileCreatedAt": "2023-05-01T10:00:00.000Z",
                    "duration": "0:00:09.500000"
                },
                {
                    "id": "audio-1",
                    "type": "AUDIO",
                    "fileCreatedAt": "2023-04-01T10:00:00.000Z"
                }
            ]}
        });
        let parsed: SearchResponse = serde_json::from_value(json).unwrap();
        let page: Vec<_> = parsed
            .assets
            .items
            .into_iter()
            .filter_map(WireAsset::into_descriptor)
            .collect();

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "img-1");
        assert!(page[0].favorite);
        assert_eq!((page[0].width, page[0].height), (Some(3000), Some(4000)));
        assert_eq!(page[0].metadata.city.as_deref(), Some("Kosice"));
        assert_eq!(
            page[0].captured_at,
            Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(page[1].kind, MediaKind::Video);
        assert_eq!(page[1].duration_secs, Some(9.5));
    }

    #[test]
    fn search_request_carries_server_side_filters() {
        let filters = Filters {
            favorites_only: true,
            include_videos: false,
            ..Filters::default()
        };
        let cursor = Utc.with_ymd_and_hms(2022, 1, 2, 3, 4, 5).unwrap();
        let body = HttpCatalogClient::search_request(Some(cursor), 25, &filters);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["size"], 25);
        assert_eq!(json["order"], "desc");
        assert_eq!(json["isFavorite"], true);
        assert_eq!(json["type"], "IMAGE");
        assert_eq!(json["withArchived"], false);
        assert_eq!(json["takenBefore"], "2022-01-02T03:04:05.000Z");

        let open = HttpCatalogClient::search_request(None, 25, &Filters::default());
        let json = serde_json::to_value(&open).unwrap();
        assert!(json.get("takenBefore").is_none());
        assert!(json.get("isFavorite").is_none());
        assert!(json.get("type").is_none());
    }
}
