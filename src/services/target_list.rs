use std::collections::HashSet;

use crate::{
    error::{AppError, AppResult},
    models::TargetItemRef,
    services::providers::WatchlistProvider,
};

/// Snapshot of the target watchlist taken at run start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetWatchlistState {
    items: Vec<TargetItemRef>,
    index: HashSet<TargetItemRef>,
}

impl TargetWatchlistState {
    /// Builds a snapshot, dropping repeated keys but keeping retrieval order
    pub fn from_items(items: impl IntoIterator<Item = TargetItemRef>) -> Self {
        let mut state = Self::default();
        for item in items {
            if state.index.insert(item.clone()) {
                state.items.push(item);
            }
        }
        state
    }

    pub fn contains(&self, target: &TargetItemRef) -> bool {
        self.index.contains(target)
    }

    /// Items in retrieval order
    pub fn items(&self) -> &[TargetItemRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Reads the full target watchlist
///
/// Any failure is reported as `TargetUnavailable`: without this baseline the
/// run cannot decide what to add or remove.
pub async fn read_target_state(provider: &dyn WatchlistProvider) -> AppResult<TargetWatchlistState> {
    let items = provider.list_watchlist().await.map_err(|e| match e {
        AppError::TargetUnavailable(_) => e,
        other => AppError::TargetUnavailable(other.to_string()),
    })?;

    let state = TargetWatchlistState::from_items(items);
    tracing::info!(
        items = state.len(),
        provider = provider.name(),
        "Read target watchlist"
    );
    Ok(state)
}
