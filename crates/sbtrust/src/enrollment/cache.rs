//! Single-flight cache of the privileged MOK listing.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::debug;

use sbtrust_core::{MokListing, Result};

/// Holds the last listing until explicitly invalidated.
///
/// Readers check the cached value without waiting. On a miss they queue on
/// the fetch lock and check again, so concurrent misses cost one privileged
/// call between them. Every invalidation bumps a generation; a fetch that
/// started before the bump still answers its caller but is not stored.
#[derive(Default)]
pub struct ListingCache {
    slot: RwLock<Slot>,
    fetch_lock: Mutex<()>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    listing: Option<Arc<MokListing>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached listing, if any.
    pub fn peek(&self) -> Option<Arc<MokListing>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listing
            .clone()
    }

    fn generation(&self) -> u64 {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).generation
    }

    /// Return the cached listing or run `fetch` to fill it.
    ///
    /// A failed fetch leaves the cache empty, and so does a fetch that was
    /// overtaken by [`ListingCache::invalidate`].
    ///
    /// # Errors
    ///
    /// Whatever `fetch` returns.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Arc<MokListing>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<MokListing>> + Send,
    {
        if let Some(hit) = self.peek() {
            return Ok(hit);
        }

        let _guard = self.fetch_lock.lock().await;
        if let Some(hit) = self.peek() {
            debug!("MOK listing filled while waiting");
            return Ok(hit);
        }

        let started = self.generation();
        let listing = Arc::new(fetch().await?);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation == started {
            slot.listing = Some(Arc::clone(&listing));
        } else {
            debug!("MOK listing changed during fetch, not caching");
        }
        Ok(listing)
    }

    /// Forget the cached listing, including one still being fetched.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.generation = slot.generation.wrapping_add(1);
        slot.listing = None;
    }
}
