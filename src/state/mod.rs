//! Crash-safe checkpoint state.
//!
//! Each unfinished job has exactly one state file, `<state_id>.json`, in
//! the state directory. The id is derived from the job's configuration, so
//! re-running the same command finds its own checkpoint with no separate
//! job-name bookkeeping.
//!
//! # Lifecycle
//!
//! 1. Created when a non-dry-run job starts and no matching state exists
//! 2. Saved after every transfer batch and when a run pauses
//! 3. Deleted on full completion or on an explicit discard
//!
//! A state file on disk therefore always means the job is not finished.
//!
//! Writes go through [`file::atomic_write`]; the store is the only writer.
//! One active run per state id is assumed and not locked.

mod checkpoint;
pub mod file;

pub use checkpoint::{CheckpointSink, StateCheckpoint};

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{DocumentMapping, MigrationConfig, MigrationStats, StateStatus};

/// Separator between hashed key fields (ASCII unit separator).
const KEY_SEPARATOR: char = '\u{1f}';

/// Hex characters of the digest kept in a state id.
const STATE_ID_LEN: usize = 16;

/// Compute the deterministic state id of a job.
///
/// Hashes `(object type, source match field, target match field, filter or
/// empty, source identity, target identity)`. Identical tuples always give
/// the same id; any difference gives a different one.
#[must_use]
pub fn state_id(config: &MigrationConfig) -> String {
    let key = [
        config.object_type.as_str(),
        config.source_match_field.as_str(),
        config.target_field(),
        config.filter_or_empty(),
        config.source_store.as_str(),
        config.target_store.as_str(),
    ]
    .join(&KEY_SEPARATOR.to_string());

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..STATE_ID_LEN].to_string()
}

/// Persisted progress of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    pub state_id: String,
    pub status: StateStatus,
    pub config: MigrationConfig,
    /// Scratch directory for downloads, keyed to this job
    pub temp_dir: PathBuf,
    /// Source document id → target document id for every uploaded file
    pub completed: DocumentMapping,
    pub stats: MigrationStats,
    /// RFC 3339
    pub created_at: String,
    /// RFC 3339
    pub updated_at: String,
}

impl MigrationState {
    /// Create a fresh in-progress state for a job.
    #[must_use]
    pub fn new(config: MigrationConfig, temp_dir: PathBuf) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            state_id: state_id(&config),
            status: StateStatus::InProgress,
            config,
            temp_dir,
            completed: DocumentMapping::new(),
            stats: MigrationStats::default(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }
}

/// Operator-facing summary of a resumable job.
#[derive(Debug, Clone, Serialize)]
pub struct StateSummary {
    pub state_id: String,
    pub status: StateStatus,
    pub object_type: String,
    pub source_match_field: String,
    pub target_match_field: String,
    pub filter: Option<String>,
    pub source_store: String,
    pub target_store: String,
    pub completed_files: usize,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&MigrationState> for StateSummary {
    fn from(state: &MigrationState) -> Self {
        Self {
            state_id: state.state_id.clone(),
            status: state.status,
            object_type: state.config.object_type.clone(),
            source_match_field: state.config.source_match_field.clone(),
            target_match_field: state.config.target_field().to_string(),
            filter: state.config.filter.clone(),
            source_store: state.config.source_store.clone(),
            target_store: state.config.target_store.clone(),
            completed_files: state.completed.len(),
            created_at: state.created_at.clone(),
            updated_at: state.updated_at.clone(),
        }
    }
}

/// Verify that the connected stores are the ones a checkpoint was made with.
///
/// # Errors
///
/// Returns `Error::StoreMismatch` naming the first side that differs.
pub fn verify_stores(state: &MigrationState, source: &str, target: &str) -> Result<()> {
    for (role, expected, actual) in [
        ("source", &state.config.source_store, source),
        ("target", &state.config.target_store, target),
    ] {
        if expected != actual {
            return Err(Error::StoreMismatch {
                role,
                expected: expected.clone(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

/// Directory-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Use `dir` for state files. The directory is created on first save.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Open the store at the configured state directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no home directory can be determined.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::state_dir()?))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for an id.
    #[must_use]
    pub fn path_for(&self, state_id: &str) -> PathBuf {
        self.dir.join(format!("{state_id}.json"))
    }

    fn validate_id(state_id: &str) -> Result<()> {
        if state_id.is_empty() || !state_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidArgument(format!("Invalid state id: '{state_id}'")));
        }
        Ok(())
    }

    /// Load the state for an id, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self, state_id: &str) -> Result<Option<MigrationState>> {
        Self::validate_id(state_id)?;
        let path = self.path_for(state_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist a state atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails. The
    /// previously saved state is left intact in that case.
    pub fn save(&self, state: &MigrationState) -> Result<()> {
        Self::validate_id(&state.state_id)?;
        let content = serde_json::to_vec_pretty(state)?;
        file::atomic_write(&self.path_for(&state.state_id), &content)?;
        debug!(
            state_id = %state.state_id,
            status = %state.status,
            completed = state.completed.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Delete the state for an id. Returns whether a state existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete(&self, state_id: &str) -> Result<bool> {
        Self::validate_id(state_id)?;
        file::remove_if_exists(&file::temp_path(&self.path_for(state_id)))?;
        Ok(file::remove_if_exists(&self.path_for(state_id))?)
    }

    /// Summaries of every resumable job, newest first.
    ///
    /// Leftover temp files are ignored. Unreadable state files are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<StateSummary>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|c| serde_json::from_str::<MigrationState>(&c).map_err(Error::from));
            match parsed {
                Ok(state) => summaries.push(StateSummary::from(&state)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable state file"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
