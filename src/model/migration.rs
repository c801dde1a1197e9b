//! Migration configuration, persisted stats, and run results.

use serde::{Deserialize, Serialize};

/// Upper bound on per-item errors carried in a [`MigrationResult`].
pub const MAX_REPORTED_ERRORS: usize = 50;

/// Immutable intent for one migration job.
///
/// Store handles are passed to the engine separately; the config only
/// records their identities so a checkpoint can be tied to a store pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Business object whose records carry the files (e.g. `Account`)
    pub object_type: String,

    /// Field on the source object used for matching
    pub source_match_field: String,

    /// Field on the target object; defaults to `source_match_field`
    #[serde(default)]
    pub target_match_field: Option<String>,

    /// Raw WHERE predicate applied to source records
    #[serde(default)]
    pub filter: Option<String>,

    /// Identity of the source store handle
    pub source_store: String,

    /// Identity of the target store handle
    pub target_store: String,

    /// Report counts only; never mutate the target or persist state
    #[serde(default)]
    pub dry_run: bool,
}

impl MigrationConfig {
    /// Target match field after applying the default.
    #[must_use]
    pub fn target_field(&self) -> &str {
        self.target_match_field
            .as_deref()
            .unwrap_or(&self.source_match_field)
    }

    /// Filter predicate, or the empty string.
    #[must_use]
    pub fn filter_or_empty(&self) -> &str {
        self.filter.as_deref().unwrap_or("")
    }
}

/// Lifecycle status of a persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    InProgress,
    Paused,
    Completed,
}

impl StateStatus {
    /// Get the string representation for display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for StateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters persisted with the checkpoint.
///
/// Discovery counts (`source_records` through `files_skipped`) describe the
/// current run and are overwritten on resume. Transfer counters accumulate
/// across every run of the same job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationStats {
    pub source_records: usize,
    pub records_matched: usize,
    pub records_unmatched: usize,
    pub files_found: usize,
    pub files_migrateable: usize,
    pub files_skipped: usize,

    pub files_downloaded: usize,
    /// Downloads satisfied by a scratch file left from an earlier attempt
    pub files_reused: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub documents_resolved: usize,
    pub batches_completed: usize,

    pub links_created: usize,
    pub links_existing: usize,
    pub links_failed: usize,
}

/// Stage at which a per-item error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Upload,
    Resolve,
    Link,
    LinkBatch,
    Checkpoint,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
            Self::Resolve => write!(f, "resolve"),
            Self::Link => write!(f, "link"),
            Self::LinkBatch => write!(f, "link_batch"),
            Self::Checkpoint => write!(f, "checkpoint"),
        }
    }
}

/// A recorded per-item or per-batch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferError {
    /// File title or id, when the error concerns one file
    pub file: Option<String>,
    pub stage: Stage,
    pub error: String,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    DryRun,
    Paused,
    Completed,
}

/// Summary returned by the engine. Counts are reported even on partial failure.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub outcome: RunOutcome,
    pub state_id: String,
    pub stats: MigrationStats,
    pub errors: Vec<TransferError>,
    /// Errors beyond [`MAX_REPORTED_ERRORS`] that were counted but not kept
    pub errors_dropped: usize,
}

impl MigrationResult {
    pub(crate) fn new(outcome: RunOutcome, state_id: String) -> Self {
        Self {
            outcome,
            state_id,
            stats: MigrationStats::default(),
            errors: Vec::new(),
            errors_dropped: 0,
        }
    }

    /// Record an error, keeping at most [`MAX_REPORTED_ERRORS`].
    pub(crate) fn push_error(&mut self, file: Option<String>, stage: Stage, error: String) {
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(TransferError { file, stage, error });
        } else {
            self.errors_dropped += 1;
        }
    }

    /// Total number of errors encountered, kept or dropped.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len() + self.errors_dropped
    }
}
