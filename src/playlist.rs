//! Queue of descriptors waiting to be shown, and the paging logic that fills it.
//!
//! Descriptors leave the queue when they are picked for loading, so nothing
//! held as current or next is ever still queued. Paging walks backwards in
//! capture time; an empty page means the oldest asset has been reached and the
//! walk wraps around to the most recent one.

use crate::assets::AssetDescriptor;
use crate::catalog::AssetCatalog;
use crate::error::CatalogError;
use crate::filter::{AssetPredicate, Filters};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// What a refill did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refill {
    /// The queue was above its low-water mark; nothing was fetched.
    NotNeeded,
    /// Descriptors appended (possibly zero if every page was filtered out).
    Appended(usize),
    /// The end of the catalog was reached and paging restarted from the most
    /// recent asset. The persisted cursor must be reset.
    Wrapped(usize),
    /// Nothing playable exists even from the top of the catalog.
    NoMedia,
}

/// Everything needed to fetch a batch without borrowing the playlist, so the
/// controller can run it on a background task.
#[derive(Clone)]
pub struct RefillPlan {
    boundary: Option<DateTime<Utc>>,
    seen_at_boundary: HashSet<String>,
    page_size: u32,
    max_pages: u32,
    filters: Arc<Filters>,
    extra: Option<Arc<dyn AssetPredicate>>,
}

impl RefillPlan {
    /// Capture time the first page will be fetched at or before.
    pub fn boundary(&self) -> Option<DateTime<Utc>> {
        self.boundary
    }

    fn accepts(&self, asset: &AssetDescriptor) -> bool {
        self.filters.accepts(asset) && self.extra.as_ref().map_or(true, |p| p.accepts(asset))
    }
}

/// Result of [`fetch_refill`], applied with [`Playlist::absorb`].
#[derive(Debug)]
pub struct RefillBatch {
    items: Vec<AssetDescriptor>,
    wrapped: bool,
    no_media: bool,
    continuation: Option<DateTime<Utc>>,
    seen_at_boundary: HashSet<String>,
}

/// Fetch pages until at least one playable descriptor turns up, the catalog
/// proves empty, or the page budget is spent.
pub async fn fetch_refill(
    catalog: &dyn AssetCatalog,
    plan: RefillPlan,
) -> Result<RefillBatch, CatalogError> {
    let mut boundary = plan.boundary;
    let mut seen = plan.seen_at_boundary.clone();
    let mut wrapped = false;
    let mut pages = 0;
    let mut size = plan.page_size;

    loop {
        pages += 1;
        let page = catalog.fetch_page(boundary, size, &plan.filters).await?;
        let raw_len = page.len();
        let fresh: Vec<AssetDescriptor> = page
            .into_iter()
            .filter(|asset| !seen.contains(&asset.id))
            .collect();

        let Some(oldest) = fresh.iter().map(|asset| asset.captured_at).min() else {
            if boundary.is_some() && raw_len >= size as usize && pages < plan.max_pages {
                // more assets share the boundary time than fit in a page
                size = (seen.len() as u32).saturating_add(plan.page_size);
                tracing::debug!(
                    "Page at {:?} held only already-seen assets, widening to {}",
                    boundary,
                    size
                );
                continue;
            }
            if raw_len > 0 {
                tracing::debug!("Page at {:?} held only already-seen assets", boundary);
            }
            if boundary.is_none() {
                tracing::warn!("Catalog has no assets to show");
                return Ok(RefillBatch {
                    items: Vec::new(),
                    wrapped,
                    no_media: true,
                    continuation: None,
                    seen_at_boundary: HashSet::new(),
                });
            }
            tracing::info!("Reached end of catalog at {:?}, wrapping to latest", boundary);
            boundary = None;
            seen.clear();
            wrapped = true;
            continue;
        };

        size = plan.page_size;
        if boundary != Some(oldest) {
            seen.clear();
        }
        seen.extend(
            fresh
                .iter()
                .filter(|asset| asset.captured_at == oldest)
                .map(|asset| asset.id.clone()),
        );
        boundary = Some(oldest);

        let accepted: Vec<AssetDescriptor> =
            fresh.into_iter().filter(|asset| plan.accepts(asset)).collect();
        if !accepted.is_empty() || pages >= plan.max_pages {
            tracing::debug!(
                "Refill fetched {} pages, {} playable, continuing from {:?}",
                pages,
                accepted.len(),
                boundary
            );
            return Ok(RefillBatch {
                items: accepted,
                wrapped,
                no_media: false,
                continuation: boundary,
                seen_at_boundary: seen,
            });
        }
        tracing::debug!("Page of {} assets filtered out entirely, fetching further", raw_len);
    }
}

pub struct Playlist {
    queue: VecDeque<AssetDescriptor>,
    page_size: u32,
    low_water: usize,
    max_pages: u32,
    filters: Arc<Filters>,
    extra: Option<Arc<dyn AssetPredicate>>,
    /// Capture time of the oldest descriptor fetched so far.
    continuation: Option<DateTime<Utc>>,
    /// Ids already fetched whose capture time equals `continuation`.
    seen_at_boundary: HashSet<String>,
    /// A wrap-around produced nothing playable and nothing has since.
    fruitless_wrap: bool,
}

impl Playlist {
    /// Create an empty playlist. `low_water` is the queue length at or below
    /// which a refill is due.
    pub fn new(page_size: u32, low_water: usize, max_pages: u32, filters: Filters) -> Self {
        Self {
            queue: VecDeque::new(),
            page_size: page_size.max(1),
            low_water,
            max_pages: max_pages.max(1),
            filters: Arc::new(filters),
            extra: None,
            continuation: None,
            seen_at_boundary: HashSet::new(),
            fruitless_wrap: false,
        }
    }

    /// Add a predicate evaluated on top of the static filters.
    pub fn with_predicate(mut self, predicate: Arc<dyn AssetPredicate>) -> Self {
        self.extra = Some(predicate);
        self
    }

    /// Number of descriptors waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether the queue has drained to its low-water mark.
    pub fn needs_refill(&self) -> bool {
        self.queue.len() <= self.low_water
    }

    /// Take the next descriptor to load.
    pub fn pop_front(&mut self) -> Option<AssetDescriptor> {
        self.queue.pop_front()
    }

    /// Drop everything queued and forget the paging position.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.continuation = None;
        self.seen_at_boundary.clear();
        self.fruitless_wrap = false;
    }

    /// Queue descriptors from an offline snapshot. The paging position is
    /// left alone; the next refill starts from the caller's cursor.
    pub fn seed(&mut self, items: Vec<AssetDescriptor>) {
        self.queue.extend(items);
    }

    /// Copy of the queued descriptors, in playback order.
    pub fn snapshot(&self) -> Vec<AssetDescriptor> {
        self.queue.iter().cloned().collect()
    }

    /// Plan the next fetch. The playlist's own position wins over `cursor`
    /// once a page has been fetched.
    pub fn plan(&self, cursor: Option<DateTime<Utc>>) -> RefillPlan {
        let boundary = self.continuation.or(cursor);
        RefillPlan {
            boundary,
            seen_at_boundary: if self.continuation.is_some() {
                self.seen_at_boundary.clone()
            } else {
                HashSet::new()
            },
            page_size: self.page_size,
            max_pages: self.max_pages,
            filters: self.filters.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Apply a fetched batch.
    pub fn absorb(&mut self, batch: RefillBatch) -> Refill {
        if batch.no_media {
            self.continuation = None;
            self.seen_at_boundary.clear();
            return Refill::NoMedia;
        }

        self.continuation = batch.continuation;
        self.seen_at_boundary = batch.seen_at_boundary;
        let appended = batch.items.len();

        if batch.wrapped {
            if appended == 0 && self.fruitless_wrap {
                tracing::warn!("Full pass over the catalog found nothing matching the filters");
                return Refill::NoMedia;
            }
            self.fruitless_wrap = appended == 0;
        } else if appended > 0 {
            self.fruitless_wrap = false;
        }

        self.queue.extend(batch.items);
        if batch.wrapped {
            Refill::Wrapped(appended)
        } else {
            Refill::Appended(appended)
        }
    }

    /// Fetch more descriptors if the queue is at or below its low-water mark.
    pub async fn refill_if_needed(
        &mut self,
        catalog: &dyn AssetCatalog,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Refill, CatalogError> {
        if !self.needs_refill() {
            return Ok(Refill::NotNeeded);
        }
        let batch = fetch_refill(catalog, self.plan(cursor)).await?;
        Ok(self.absorb(batch))
    }
}
