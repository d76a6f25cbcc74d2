use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    config::EngineConfig,
    error::AppResult,
    models::RunReport,
    services::{
        executor::SyncExecutor,
        providers::{IdLookupProvider, WatchlistProvider},
        reconciler::reconcile,
        resolver::IdentifierResolver,
        source_list::parse_source_list,
        target_list::read_target_state,
    },
};

/// One-shot IMDb to Plex watchlist reconciliation
///
/// A run parses the source list, resolves every entry and snapshots the
/// target watchlist, then applies the computed operations. Fatal errors are
/// returned before any mutation is attempted. Everything else ends up in the
/// returned [`RunReport`].
pub struct SyncEngine {
    lookup: Arc<dyn IdLookupProvider>,
    watchlist: Arc<dyn WatchlistProvider>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        lookup: Arc<dyn IdLookupProvider>,
        watchlist: Arc<dyn WatchlistProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            lookup,
            watchlist,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, source: &[u8]) -> AppResult<RunReport> {
        let report = RunReport::new(self.config.dry_run, self.config.remove_mode);
        let span = tracing::info_span!("sync_run", run_id = %report.run_id);
        self.run_with_report(source, report).instrument(span).await
    }

    async fn run_with_report(&self, source: &[u8], mut report: RunReport) -> AppResult<RunReport> {
        tracing::info!(
            remove_mode = self.config.remove_mode,
            dry_run = self.config.dry_run,
            "Starting sync run"
        );

        let parsed = parse_source_list(source)?;
        report.source_rows = parsed.total_rows;
        report.dropped_rows = parsed.dropped;
        report.duplicate_rows = parsed.duplicate_rows;

        let resolver = IdentifierResolver::new(Arc::clone(&self.lookup), self.config.concurrency_limit);
        let (resolved, target) = tokio::join!(
            resolver.resolve_all(parsed.entries),
            read_target_state(self.watchlist.as_ref())
        );
        let target = target?;

        report.record_resolutions(&resolved);
        report.target_items = target.len();

        let plan = reconcile(&resolved, &target, self.config.remove_mode);
        report.already_present = plan.already_present;
        report.untouched = plan.untouched;
        report.withheld_removes = plan.withheld_removes;

        if plan.is_empty() {
            tracing::info!("Watchlist already in sync");
        }

        let executor = SyncExecutor::new(
            Arc::clone(&self.watchlist),
            &self.config,
            self.cancel.clone(),
        );
        report.outcomes = executor.execute(&plan.operations).await;
        report.cancelled = self.cancel.is_cancelled();
        report.finish();

        tracing::info!("{}", report);
        match serde_json::to_string(&report) {
            Ok(json) => tracing::debug!(report = %json, "Run report"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize run report"),
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{OperationStatus, SyncOperation, TargetItemRef};
    use crate::services::providers::{InMemoryWatchlist, StaticLookup};
    use crate::services::RetryPolicy;

    const SOURCE: &str = "Const,Title,Title Type\n\
tt0000001,One,movie\n\
tt0000002,Two,tvSeries\n\
tt0000003,Three,movie\n";

    fn lookup() -> Arc<StaticLookup> {
        Arc::new(
            StaticLookup::new()
                .with_match("tt0000001", &["aaaaaaaaaaaaaaaaaaaaaaa1"])
                .with_match("tt0000002", &["aaaaaaaaaaaaaaaaaaaaaaa2"]),
        )
    }

    fn config(remove_mode: bool) -> EngineConfig {
        EngineConfig {
            remove_mode,
            dry_run: false,
            concurrency_limit: 2,
            retry: RetryPolicy::new(1).with_initial_backoff(1).with_max_backoff(1),
        }
    }

    #[tokio::test]
    async fn test_run_adds_resolved_entries() {
        let watchlist = Arc::new(InMemoryWatchlist::with_items(&["bbbbbbbbbbbbbbbbbbbbbbbb"]));
        let engine = SyncEngine::new(lookup(), watchlist.clone(), config(false));

        let report = engine.run(SOURCE.as_bytes()).await.unwrap();

        let summary = report.summary();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.skipped_not_found, 1);
        assert_eq!(report.untouched, 1);
        assert_eq!(watchlist.items().len(), 3);
        assert!(report.finished_at.is_some());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let watchlist = Arc::new(InMemoryWatchlist::with_items(&["bbbbbbbbbbbbbbbbbbbbbbbb"]));
        let engine = SyncEngine::new(lookup(), watchlist.clone(), config(true));

        let first = engine.run(SOURCE.as_bytes()).await.unwrap();
        assert_eq!(first.summary().added, 2);
        assert_eq!(first.summary().removed, 1);

        let second = engine.run(SOURCE.as_bytes()).await.unwrap();
        assert!(second.outcomes.is_empty());
        assert_eq!(second.already_present, 2);
    }

    #[tokio::test]
    async fn test_unavailable_target_aborts_before_mutations() {
        let watchlist = Arc::new(InMemoryWatchlist::default());
        watchlist.set_unavailable();
        let engine = SyncEngine::new(lookup(), watchlist.clone(), config(true));

        let result = engine.run(SOURCE.as_bytes()).await;

        assert!(matches!(result, Err(AppError::TargetUnavailable(_))));
        assert!(watchlist.history().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_source_aborts_before_lookups() {
        let lookup = lookup();
        let watchlist = Arc::new(InMemoryWatchlist::default());
        let engine = SyncEngine::new(lookup.clone(), watchlist.clone(), config(true));

        let result = engine.run(b"Title,Year\nThe Matrix,1999\n").await;

        assert!(matches!(result, Err(AppError::MalformedInput(_))));
        assert_eq!(lookup.calls(), 0);
        assert!(watchlist.history().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_outage_does_not_empty_watchlist() {
        let lookup = Arc::new(
            StaticLookup::new()
                .with_failure("tt0000001")
                .with_failure("tt0000002")
                .with_failure("tt0000003"),
        );
        let watchlist = Arc::new(InMemoryWatchlist::with_items(&[
            "aaaaaaaaaaaaaaaaaaaaaaa1",
            "aaaaaaaaaaaaaaaaaaaaaaa2",
        ]));
        let engine = SyncEngine::new(lookup, watchlist.clone(), config(true));

        let report = engine.run(SOURCE.as_bytes()).await.unwrap();

        let summary = report.summary();
        assert_eq!(summary.lookup_failed, 3);
        assert_eq!(summary.removed, 0);
        assert_eq!(report.withheld_removes, 2);
        assert!(watchlist.history().is_empty());
        assert_eq!(watchlist.items().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_lookup_failure_still_adds() {
        let lookup = Arc::new(
            StaticLookup::new()
                .with_match("tt0000001", &["aaaaaaaaaaaaaaaaaaaaaaa1"])
                .with_failure("tt0000002"),
        );
        let watchlist = Arc::new(InMemoryWatchlist::with_items(&["bbbbbbbbbbbbbbbbbbbbbbbb"]));
        let engine = SyncEngine::new(lookup, watchlist.clone(), config(true));

        let report = engine.run(SOURCE.as_bytes()).await.unwrap();

        assert_eq!(report.summary().added, 1);
        assert_eq!(report.summary().removed, 0);
        assert_eq!(report.withheld_removes, 1);
        assert!(watchlist
            .items()
            .contains(&TargetItemRef::new("bbbbbbbbbbbbbbbbbbbbbbbb")));
    }

    #[tokio::test]
    async fn test_failed_mutation_is_reported_not_raised() {
        let watchlist = Arc::new(InMemoryWatchlist::default());
        watchlist.fail_next("aaaaaaaaaaaaaaaaaaaaaaa1", 5, true);
        let engine = SyncEngine::new(lookup(), watchlist.clone(), config(false));

        let report = engine.run(SOURCE.as_bytes()).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].status, OperationStatus::Failed);
        assert_eq!(report.outcomes[0].attempts, 2);
        assert_eq!(report.outcomes[1].status, OperationStatus::Applied);
        assert!(report
            .to_string()
            .contains("failed to add aaaaaaaaaaaaaaaaaaaaaaa1 [tt0000001 (One)]"));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_watchlist_untouched() {
        let watchlist = Arc::new(InMemoryWatchlist::with_items(&["bbbbbbbbbbbbbbbbbbbbbbbb"]));
        let engine = SyncEngine::new(
            lookup(),
            watchlist.clone(),
            EngineConfig {
                dry_run: true,
                ..config(true)
            },
        );

        let report = engine.run(SOURCE.as_bytes()).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.summary().skipped, 3);
        assert!(watchlist.history().is_empty());
        assert_eq!(watchlist.items(), vec![TargetItemRef::new("bbbbbbbbbbbbbbbbbbbbbbbb")]);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_flagged() {
        let watchlist = Arc::new(InMemoryWatchlist::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = SyncEngine::new(lookup(), watchlist.clone(), config(false))
            .with_cancellation(cancel);

        let report = engine.run(SOURCE.as_bytes()).await.unwrap();

        assert!(report.cancelled);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == OperationStatus::Skipped));
        assert_eq!(
            report.outcomes[0].operation,
            SyncOperation::Add(TargetItemRef::new("aaaaaaaaaaaaaaaaaaaaaaa1"))
        );
        assert!(watchlist.history().is_empty());
    }
}
