use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use uuid::Uuid;

use super::{Resolution, ResolvedItem, SyncOperation, TargetItemRef};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Applied,
    /// Not attempted (dry run or cancellation)
    Skipped,
    Failed,
}

/// Result of one watchlist mutation
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub operation: SyncOperation,
    pub status: OperationStatus,
    pub error_detail: Option<String>,
    /// Calls made against the target service, including retries
    pub attempts: u32,
}

impl SyncOutcome {
    pub fn applied(operation: SyncOperation, attempts: u32) -> Self {
        Self {
            operation,
            status: OperationStatus::Applied,
            error_detail: None,
            attempts,
        }
    }

    pub fn skipped(operation: SyncOperation, reason: impl Into<String>) -> Self {
        Self {
            operation,
            status: OperationStatus::Skipped,
            error_detail: Some(reason.into()),
            attempts: 0,
        }
    }

    pub fn failed(operation: SyncOperation, detail: impl Into<String>, attempts: u32) -> Self {
        Self {
            operation,
            status: OperationStatus::Failed,
            error_detail: Some(detail.into()),
            attempts,
        }
    }
}

/// A source row that could not be turned into an entry
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DroppedRow {
    /// 1-based line number (header = 1)
    pub line: usize,
    pub reason: String,
}

/// Counts shown at the end of a run
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReportSummary {
    pub added: usize,
    pub removed: usize,
    pub skipped_ambiguous: usize,
    pub skipped_not_found: usize,
    pub lookup_failed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Everything a human needs to understand one run without re-running it
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub remove_mode: bool,
    pub source_rows: usize,
    pub dropped_rows: Vec<DroppedRow>,
    pub duplicate_rows: usize,
    pub resolved: usize,
    /// Entries that did not resolve to exactly one target item
    pub unresolved: Vec<ResolvedItem>,
    pub target_items: usize,
    pub already_present: usize,
    /// Target items outside the source list that were left alone (remove mode off)
    pub untouched: usize,
    /// Removals not planned because some lookups failed
    pub withheld_removes: usize,
    pub outcomes: Vec<SyncOutcome>,
    pub cancelled: bool,
    #[serde(skip)]
    labels: HashMap<TargetItemRef, String>,
}

impl RunReport {
    pub fn new(dry_run: bool, remove_mode: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            remove_mode,
            source_rows: 0,
            dropped_rows: Vec::new(),
            duplicate_rows: 0,
            resolved: 0,
            unresolved: Vec::new(),
            target_items: 0,
            already_present: 0,
            untouched: 0,
            withheld_removes: 0,
            outcomes: Vec::new(),
            cancelled: false,
            labels: HashMap::new(),
        }
    }

    /// Records resolution results, remembering which source entry each target item came from
    pub fn record_resolutions(&mut self, items: &[ResolvedItem]) {
        for item in items {
            match item.target_ref() {
                Some(target) => {
                    self.resolved += 1;
                    self.labels
                        .entry(target.clone())
                        .or_insert_with(|| item.entry.label());
                }
                None => self.unresolved.push(item.clone()),
            }
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();

        for item in &self.unresolved {
            match item.resolution {
                Resolution::Ambiguous(_) => summary.skipped_ambiguous += 1,
                Resolution::NotFound => summary.skipped_not_found += 1,
                Resolution::LookupFailed(_) => summary.lookup_failed += 1,
                Resolution::Resolved(_) => {}
            }
        }

        for outcome in &self.outcomes {
            match (outcome.status, outcome.operation.is_add()) {
                (OperationStatus::Applied, true) => summary.added += 1,
                (OperationStatus::Applied, false) => summary.removed += 1,
                (OperationStatus::Failed, _) => summary.failed += 1,
                (OperationStatus::Skipped, _) => summary.skipped += 1,
            }
        }

        summary
    }

    /// Source label for a target item, falling back to the bare key
    pub fn describe(&self, target: &TargetItemRef) -> String {
        match self.labels.get(target) {
            Some(label) => format!("{} [{}]", target, label),
            None => target.to_string(),
        }
    }
}

impl Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "added={} removed={} skipped_ambiguous={} skipped_not_found={} lookup_failed={} failed={} skipped={}",
            self.added,
            self.removed,
            self.skipped_ambiguous,
            self.skipped_not_found,
            self.lookup_failed,
            self.failed,
            self.skipped
        )
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Sync run {}", self.run_id)?;
        if self.dry_run {
            writeln!(f, "  mode: dry run")?;
        }
        writeln!(
            f,
            "  source rows: {} ({} dropped, {} duplicates)",
            self.source_rows,
            self.dropped_rows.len(),
            self.duplicate_rows
        )?;
        writeln!(
            f,
            "  resolved: {}, target items: {}, already present: {}, untouched: {}",
            self.resolved, self.target_items, self.already_present, self.untouched
        )?;
        writeln!(f, "  {}", self.summary())?;

        if self.withheld_removes > 0 {
            writeln!(
                f,
                "  removals withheld: {} target item(s) kept because some lookups failed",
                self.withheld_removes
            )?;
        }

        for row in &self.dropped_rows {
            writeln!(f, "  dropped line {}: {}", row.line, row.reason)?;
        }

        for item in &self.unresolved {
            match &item.resolution {
                Resolution::NotFound => writeln!(f, "  not found: {}", item.entry.label())?,
                Resolution::Ambiguous(candidates) => {
                    let keys: Vec<&str> = candidates.iter().map(TargetItemRef::as_str).collect();
                    writeln!(
                        f,
                        "  ambiguous: {} -> {}",
                        item.entry.label(),
                        keys.join(", ")
                    )?
                }
                Resolution::LookupFailed(error) => {
                    writeln!(f, "  lookup failed: {}: {}", item.entry.label(), error)?
                }
                Resolution::Resolved(_) => {}
            }
        }

        for outcome in &self.outcomes {
            if outcome.status == OperationStatus::Failed {
                let verb = if outcome.operation.is_add() { "add" } else { "remove" };
                writeln!(
                    f,
                    "  failed to {} {} after {} attempt(s): {}",
                    verb,
                    self.describe(outcome.operation.target()),
                    outcome.attempts,
                    outcome.error_detail.as_deref().unwrap_or("unknown error")
                )?;
            }
        }

        if self.cancelled {
            writeln!(f, "  run was cancelled before all operations were attempted")?;
        }

        Ok(())
    }
}
