use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{
    error::{AppError, AppResult},
    models::{Resolution, ResolvedItem, SourceEntry, TargetItemRef},
    services::providers::IdLookupProvider,
};

/// Turns a raw lookup result into a resolution
///
/// Multiple distinct candidates are reported as ambiguous, never guessed.
pub fn classify(result: &AppResult<Vec<TargetItemRef>>) -> Resolution {
    match result {
        Err(e) => Resolution::LookupFailed(e.to_string()),
        Ok(candidates) => {
            let mut distinct: Vec<TargetItemRef> = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                if !distinct.contains(candidate) {
                    distinct.push(candidate.clone());
                }
            }
            match distinct.len() {
                0 => Resolution::NotFound,
                1 => Resolution::Resolved(distinct.remove(0)),
                _ => Resolution::Ambiguous(distinct),
            }
        }
    }
}

/// Resolves source entries to target items through an id lookup provider
pub struct IdentifierResolver {
    lookup: Arc<dyn IdLookupProvider>,
    concurrency_limit: usize,
}

impl IdentifierResolver {
    pub fn new(lookup: Arc<dyn IdLookupProvider>, concurrency_limit: usize) -> Self {
        Self {
            lookup,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// Resolves every entry, one `ResolvedItem` per entry in input order
    ///
    /// Each distinct external id is looked up once. Batches run in parallel up
    /// to the concurrency limit and all of them finish before this returns.
    pub async fn resolve_all(&self, entries: Vec<SourceEntry>) -> Vec<ResolvedItem> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = entries
            .iter()
            .filter(|entry| seen.insert(entry.external_id.as_str()))
            .map(|entry| entry.external_id.clone())
            .collect();

        let batch_size = self.lookup.max_batch_size().max(1);
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));

        tracing::info!(
            ids = ids.len(),
            batch_size,
            provider = self.lookup.name(),
            "Resolving source entries"
        );

        let mut tasks = Vec::new();
        for chunk in ids.chunks(batch_size) {
            let chunk = chunk.to_vec();
            let lookup = Arc::clone(&self.lookup);
            let semaphore = Arc::clone(&semaphore);
            let batch = chunk.clone();
            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                lookup.lookup_batch(&batch).await
            });
            tasks.push((chunk, task));
        }

        let mut results: HashMap<String, AppResult<Vec<TargetItemRef>>> =
            HashMap::with_capacity(ids.len());
        for (chunk, task) in tasks {
            match task.await {
                Ok(batch) => results.extend(batch),
                Err(e) => {
                    tracing::error!(error = %e, ids = chunk.len(), "Lookup task join error");
                    for id in chunk {
                        results.insert(
                            id,
                            Err(AppError::Internal(format!("lookup task failed: {}", e))),
                        );
                    }
                }
            }
        }

        let resolved: Vec<ResolvedItem> = entries
            .into_iter()
            .map(|entry| {
                let resolution = match results.get(&entry.external_id) {
                    Some(result) => classify(result),
                    None => Resolution::LookupFailed("no lookup result returned".to_string()),
                };
                if let Resolution::Ambiguous(candidates) = &resolution {
                    tracing::warn!(
                        imdb_id = %entry.external_id,
                        candidates = candidates.len(),
                        "Ambiguous match, skipping"
                    );
                }
                ResolvedItem { entry, resolution }
            })
            .collect();

        let found = resolved.iter().filter(|item| item.is_resolved()).count();
        if found < resolved.len() {
            tracing::warn!("Found {}/{} IMDb IDs", found, resolved.len());
        } else {
            tracing::info!("Found all {} IMDb IDs", resolved.len());
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;
    use crate::services::providers::StaticLookup;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn entry(id: &str) -> SourceEntry {
        SourceEntry::new(id, format!("Title {}", id), MediaKind::Movie)
    }

    /// Records the batches it receives
    struct RecordingLookup {
        batches: Mutex<Vec<Vec<String>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingLookup {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl IdLookupProvider for RecordingLookup {
        async fn lookup(&self, external_id: &str) -> AppResult<Vec<TargetItemRef>> {
            Ok(vec![TargetItemRef::new(format!("key-{}", external_id))])
        }

        async fn lookup_batch(
            &self,
            external_ids: &[String],
        ) -> HashMap<String, AppResult<Vec<TargetItemRef>>> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            self.batches.lock().unwrap().push(external_ids.to_vec());
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut results = HashMap::new();
            for id in external_ids {
                results.insert(id.clone(), self.lookup(id).await);
            }
            results
        }

        fn max_batch_size(&self) -> usize {
            2
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[test]
    fn test_classify_policy() {
        let a = TargetItemRef::new("a");
        let b = TargetItemRef::new("b");

        assert_eq!(classify(&Ok(vec![])), Resolution::NotFound);
        assert_eq!(classify(&Ok(vec![a.clone()])), Resolution::Resolved(a.clone()));
        assert_eq!(
            classify(&Ok(vec![a.clone(), b.clone()])),
            Resolution::Ambiguous(vec![a.clone(), b])
        );
        assert_eq!(
            classify(&Err(AppError::Lookup("timed out".into()))),
            Resolution::LookupFailed("Lookup error: timed out".into())
        );
    }

    #[test]
    fn test_classify_repeated_candidate_is_not_ambiguous() {
        let a = TargetItemRef::new("a");
        assert_eq!(classify(&Ok(vec![a.clone(), a.clone()])), Resolution::Resolved(a));
    }

    #[tokio::test]
    async fn test_resolve_all_preserves_order_and_classifies() {
        let lookup = Arc::new(
            StaticLookup::new()
                .with_match("tt1", &["k1"])
                .with_match("tt3", &["k3a", "k3b"])
                .with_failure("tt4"),
        );
        let resolver = IdentifierResolver::new(lookup.clone(), 2);

        let resolved = resolver
            .resolve_all(vec![entry("tt1"), entry("tt2"), entry("tt3"), entry("tt4")])
            .await;

        let ids: Vec<&str> = resolved.iter().map(|r| r.entry.external_id.as_str()).collect();
        assert_eq!(ids, vec!["tt1", "tt2", "tt3", "tt4"]);
        assert_eq!(resolved[0].resolution, Resolution::Resolved(TargetItemRef::new("k1")));
        assert_eq!(resolved[1].resolution, Resolution::NotFound);
        assert!(matches!(resolved[2].resolution, Resolution::Ambiguous(ref c) if c.len() == 2));
        assert!(matches!(resolved[3].resolution, Resolution::LookupFailed(_)));
        assert_eq!(lookup.calls(), 4);
    }

    #[tokio::test]
    async fn test_each_distinct_id_is_looked_up_once() {
        let lookup = Arc::new(StaticLookup::new().with_match("tt1", &["k1"]));
        let resolver = IdentifierResolver::new(lookup.clone(), 4);

        let resolved = resolver.resolve_all(vec![entry("tt1"), entry("tt1")]).await;

        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(ResolvedItem::is_resolved));
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_batches_respect_size_and_concurrency() {
        let lookup = Arc::new(RecordingLookup::new());
        let resolver = IdentifierResolver::new(lookup.clone(), 2);

        let entries: Vec<SourceEntry> = (1..=7).map(|i| entry(&format!("tt{}", i))).collect();
        let resolved = resolver.resolve_all(entries).await;

        assert_eq!(resolved.len(), 7);
        assert!(resolved.iter().all(ResolvedItem::is_resolved));

        let batches = lookup.batches.lock().unwrap();
        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(|b| b.len() <= 2));
        assert!(lookup.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let resolver = IdentifierResolver::new(Arc::new(StaticLookup::new()), 1);
        assert!(resolver.resolve_all(Vec::new()).await.is_empty());
    }
}
