/// External service abstraction
///
/// The engine talks to two capabilities: an id lookup that maps IMDb ids to
/// target catalog items, and the target watchlist itself (read and mutate).
/// Each is a trait so runs can be exercised against the in-memory backend.
use std::collections::HashMap;

use crate::{error::AppResult, models::TargetItemRef};

pub mod memory;
pub mod plex;
pub mod wikidata;

pub use memory::{InMemoryWatchlist, StaticLookup};
pub use plex::PlexClient;
pub use wikidata::WikidataClient;

/// Trait for external id lookup providers
#[async_trait::async_trait]
pub trait IdLookupProvider: Send + Sync {
    /// Look up every target item claiming this external id
    ///
    /// Returns an empty list when the id is unknown. More than one result means
    /// the mapping is ambiguous; the caller decides what to do with that.
    async fn lookup(&self, external_id: &str) -> AppResult<Vec<TargetItemRef>>;

    /// Look up several ids at once
    ///
    /// Default implementation calls `lookup` for each id in turn. Providers can
    /// override for bulk endpoints and raise `max_batch_size` accordingly.
    async fn lookup_batch(
        &self,
        external_ids: &[String],
    ) -> HashMap<String, AppResult<Vec<TargetItemRef>>> {
        let mut results = HashMap::with_capacity(external_ids.len());
        for external_id in external_ids {
            let result = self.lookup(external_id).await;
            if let Err(e) = &result {
                tracing::warn!(imdb_id = %external_id, error = %e, "Lookup failed");
            }
            results.insert(external_id.clone(), result);
        }
        results
    }

    /// How many ids `lookup_batch` should receive per call
    fn max_batch_size(&self) -> usize {
        1
    }

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Trait for the watchlist being kept in sync
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait WatchlistProvider: Send + Sync {
    /// Every item currently on the watchlist, in retrieval order
    async fn list_watchlist(&self) -> AppResult<Vec<TargetItemRef>>;

    async fn add_to_watchlist(&self, target: &TargetItemRef) -> AppResult<()>;

    async fn remove_from_watchlist(&self, target: &TargetItemRef) -> AppResult<()>;

    fn name(&self) -> &'static str;
}
