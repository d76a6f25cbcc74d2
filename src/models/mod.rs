use serde::Serialize;
use std::fmt::Display;

pub mod report;

pub use report::{DroppedRow, OperationStatus, ReportSummary, RunReport, SyncOutcome};

/// Identity of an item in the Plex catalog (a `ratingKey`)
///
/// Distinct from the IMDb id: the mapping between the two comes from the
/// lookup provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TargetItemRef(String);

impl TargetItemRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TargetItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of title as reported by the source list
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
    Unknown,
}

impl MediaKind {
    /// Maps an IMDb `Title Type` value ("Movie", "TV Series", "tvMiniSeries", ...)
    pub fn from_imdb_title_type(value: &str) -> Self {
        let normalized: String = value
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "movie" | "tvmovie" | "short" | "video" | "tvshort" | "tvspecial" => MediaKind::Movie,
            "tvseries" | "tvminiseries" => MediaKind::Show,
            _ => MediaKind::Unknown,
        }
    }
}

/// One title from the source list
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceEntry {
    /// IMDb id, e.g. "tt0133093"
    pub external_id: String,
    pub title: String,
    pub media_kind: MediaKind,
}

impl SourceEntry {
    pub fn new(external_id: impl Into<String>, title: impl Into<String>, media_kind: MediaKind) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            media_kind,
        }
    }

    /// "tt0133093 (The Matrix)" or just the id when the title is unknown
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            self.external_id.clone()
        } else {
            format!("{} ({})", self.external_id, self.title)
        }
    }
}

/// Outcome of looking up a source entry in the target catalog
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(TargetItemRef),
    NotFound,
    /// Several catalog items claim the same external id; never auto-picked
    Ambiguous(Vec<TargetItemRef>),
    LookupFailed(String),
}

/// A source entry paired with its lookup result
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedItem {
    pub entry: SourceEntry,
    pub resolution: Resolution,
}

impl ResolvedItem {
    pub fn target_ref(&self) -> Option<&TargetItemRef> {
        match &self.resolution {
            Resolution::Resolved(target) => Some(target),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.target_ref().is_some()
    }
}

/// A single change to apply to the target watchlist
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "op", content = "key", rename_all = "snake_case")]
pub enum SyncOperation {
    Add(TargetItemRef),
    Remove(TargetItemRef),
}

impl SyncOperation {
    pub fn target(&self) -> &TargetItemRef {
        match self {
            SyncOperation::Add(target) | SyncOperation::Remove(target) => target,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, SyncOperation::Add(_))
    }
}

impl Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOperation::Add(target) => write!(f, "+ {}", target),
            SyncOperation::Remove(target) => write!(f, "- {}", target),
        }
    }
}
