use std::collections::HashSet;

use crate::{
    models::{Resolution, ResolvedItem, SyncOperation, TargetItemRef},
    services::target_list::TargetWatchlistState,
};

/// Operations needed to bring the target watchlist in line with the source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Adds in source order, then removes in target retrieval order
    pub operations: Vec<SyncOperation>,
    /// Desired items already on the watchlist
    pub already_present: usize,
    /// Target items outside the desired set that stay because remove mode is off
    pub untouched: usize,
    /// Removals held back because the desired set is incomplete
    pub withheld_removes: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn adds(&self) -> usize {
        self.operations.iter().filter(|op| op.is_add()).count()
    }

    pub fn removes(&self) -> usize {
        self.operations.len() - self.adds()
    }
}

/// Computes the add/remove operations for one run
///
/// Only `resolved` items count towards the desired set. Adds and removes are
/// set differences of the same two sets, so no target item appears twice.
///
/// When any lookup failed the desired set may be missing items that are
/// really wanted, so no removal is planned at all; adds still go ahead.
pub fn reconcile(
    resolved: &[ResolvedItem],
    target: &TargetWatchlistState,
    remove_mode: bool,
) -> SyncPlan {
    let mut desired: Vec<&TargetItemRef> = Vec::new();
    let mut desired_set: HashSet<&TargetItemRef> = HashSet::new();
    for target_ref in resolved.iter().filter_map(ResolvedItem::target_ref) {
        if desired_set.insert(target_ref) {
            desired.push(target_ref);
        }
    }

    let lookups_incomplete = resolved
        .iter()
        .any(|item| matches!(item.resolution, Resolution::LookupFailed(_)));

    let mut plan = SyncPlan::default();

    for target_ref in desired {
        if target.contains(target_ref) {
            plan.already_present += 1;
        } else {
            plan.operations.push(SyncOperation::Add(target_ref.clone()));
        }
    }

    for target_ref in target.items() {
        if desired_set.contains(target_ref) {
            continue;
        }
        if !remove_mode {
            plan.untouched += 1;
        } else if lookups_incomplete {
            plan.withheld_removes += 1;
        } else {
            plan.operations.push(SyncOperation::Remove(target_ref.clone()));
        }
    }

    if plan.withheld_removes > 0 {
        tracing::warn!(
            withheld = plan.withheld_removes,
            "Some lookups failed, withholding removals"
        );
    }

    tracing::info!(
        adds = plan.adds(),
        removes = plan.removes(),
        already_present = plan.already_present,
        untouched = plan.untouched,
        withheld_removes = plan.withheld_removes,
        remove_mode,
        "Reconciled watchlists"
    );

    plan
}
