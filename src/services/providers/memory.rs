/// In-memory providers
///
/// Behave like the real services but keep everything in process. Used to
/// exercise whole runs without network access.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{SyncOperation, TargetItemRef},
    services::providers::{IdLookupProvider, WatchlistProvider},
};

/// Fixed external id table
#[derive(Debug, Default)]
pub struct StaticLookup {
    table: HashMap<String, Vec<TargetItemRef>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, external_id: &str, keys: &[&str]) -> Self {
        self.table.insert(
            external_id.to_string(),
            keys.iter().map(|k| TargetItemRef::new(*k)).collect(),
        );
        self
    }

    /// Make lookups for this id error out
    pub fn with_failure(mut self, external_id: &str) -> Self {
        self.failing.insert(external_id.to_string());
        self
    }

    /// Number of `lookup` calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IdLookupProvider for StaticLookup {
    async fn lookup(&self, external_id: &str) -> AppResult<Vec<TargetItemRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(external_id) {
            return Err(AppError::Lookup(format!("lookup for {} timed out", external_id)));
        }
        Ok(self.table.get(external_id).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[derive(Debug, Default)]
struct WatchlistState {
    items: Vec<TargetItemRef>,
    /// Queued errors returned by the next mutations of a key
    failures: HashMap<TargetItemRef, VecDeque<AppError>>,
    unavailable: bool,
    history: Vec<SyncOperation>,
}

/// Watchlist held in memory
#[derive(Debug, Default)]
pub struct InMemoryWatchlist {
    state: Mutex<WatchlistState>,
}

impl InMemoryWatchlist {
    pub fn with_items(keys: &[&str]) -> Self {
        let watchlist = Self::default();
        watchlist.lock().items = keys.iter().map(|k| TargetItemRef::new(*k)).collect();
        watchlist
    }

    /// Queue `count` failures for the next mutations of `key`
    pub fn fail_next(&self, key: &str, count: usize, retryable: bool) {
        let mut state = self.lock();
        let queue = state.failures.entry(TargetItemRef::new(key)).or_default();
        for _ in 0..count {
            queue.push_back(AppError::Mutation {
                retryable,
                message: format!("simulated failure for {}", key),
            });
        }
    }

    /// Make `list_watchlist` fail as if the service were down
    pub fn set_unavailable(&self) {
        self.lock().unavailable = true;
    }

    pub fn items(&self) -> Vec<TargetItemRef> {
        self.lock().items.clone()
    }

    /// Every mutation call received, including failed ones
    pub fn history(&self) -> Vec<SyncOperation> {
        self.lock().history.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WatchlistState> {
        // A poisoned lock only means a test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate(&self, operation: SyncOperation) -> AppResult<()> {
        let mut state = self.lock();
        state.history.push(operation.clone());

        if let Some(error) = state
            .failures
            .get_mut(operation.target())
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        match operation {
            SyncOperation::Add(target) => {
                if !state.items.contains(&target) {
                    state.items.push(target);
                }
            }
            SyncOperation::Remove(target) => state.items.retain(|k| *k != target),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WatchlistProvider for InMemoryWatchlist {
    async fn list_watchlist(&self) -> AppResult<Vec<TargetItemRef>> {
        let state = self.lock();
        if state.unavailable {
            return Err(AppError::TargetUnavailable(
                "in-memory watchlist marked unavailable".to_string(),
            ));
        }
        Ok(state.items.clone())
    }

    async fn add_to_watchlist(&self, target: &TargetItemRef) -> AppResult<()> {
        self.mutate(SyncOperation::Add(target.clone()))
    }

    async fn remove_from_watchlist(&self, target: &TargetItemRef) -> AppResult<()> {
        self.mutate(SyncOperation::Remove(target.clone()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
