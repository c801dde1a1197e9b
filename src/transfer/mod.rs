//! Batch transfer engine.
//!
//! One run of a job proceeds in three phases:
//!
//! 1. **Discovery**: match records, read the source link table for matched
//!    records, fetch the latest version of every linked document and split
//!    the files by the size ceiling
//! 2. **Transfer**: process pending files in batches of [`CHUNK_SIZE`].
//!    Each batch is downloaded, uploaded, resolved to target document ids,
//!    handed to the [`CheckpointSink`] and cleaned up
//! 3. **Links**: recreate the document/record associations in the target
//!
//! Cancellation is cooperative. It is polled before every download and
//! before every file or link batch. A batch interrupted during download is
//! discarded and the run pauses at the last checkpoint. Links already
//! created before a pause are found and skipped on resume.

mod links;
mod progress;

pub use links::{candidate_links, reconcile_links, LinkStats};
pub use progress::{CancelToken, ProgressSink, TracingProgress};

#[cfg(test)]
pub(crate) use progress::testing;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{
    field_text, DocumentMapping, FileMetadata, LinkRecord, LinkTable, MigrationConfig,
    MigrationResult, MigrationStats, RunOutcome, Stage,
};
use crate::query::{query_chunked, CHUNK_SIZE};
use crate::resolve::{resolve_records, RecordMatch};
use crate::state::file::{atomic_write, remove_if_exists};
use crate::state::{state_id, CheckpointSink, MigrationState};
use crate::store::Store;

/// Largest file the target accepts through the REST upload path.
pub const MAX_FILE_BYTES: u64 = 37_500_000;

/// Everything one run needs besides its prior state and checkpoint sink.
pub struct RunContext<'a, S, T> {
    pub source: &'a S,
    pub target: &'a T,
    pub config: &'a MigrationConfig,
    /// Job scratch directory; created on first download
    pub scratch_dir: &'a Path,
    pub progress: &'a dyn ProgressSink,
    pub cancel: &'a CancelToken,
}

/// What discovery found for a job.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub records: RecordMatch,
    pub links: LinkTable,
    /// Latest versions within the size ceiling, ordered by document id
    pub migrateable: Vec<FileMetadata>,
    pub oversized: Vec<FileMetadata>,
}

impl Discovery {
    /// Overwrite the discovery counters of `stats`.
    fn record(&self, stats: &mut MigrationStats) {
        stats.source_records = self.records.source_records;
        stats.records_matched = self.records.mapping.len();
        stats.records_unmatched = self.records.unmatched;
        stats.files_found = self.migrateable.len() + self.oversized.len();
        stats.files_migrateable = self.migrateable.len();
        stats.files_skipped = self.oversized.len();
    }
}

/// Split files into those within [`MAX_FILE_BYTES`] and those above it.
#[must_use]
pub fn partition_by_size(files: Vec<FileMetadata>) -> (Vec<FileMetadata>, Vec<FileMetadata>) {
    files.into_iter().partition(|f| f.size_bytes <= MAX_FILE_BYTES)
}

/// Read the links of the given source entities.
async fn fetch_link_table<S: Store>(source: &S, entity_ids: &[String]) -> Result<LinkTable> {
    let rows = query_chunked(source, entity_ids, |list| {
        format!("SELECT ContentDocumentId, LinkedEntityId FROM ContentDocumentLink WHERE LinkedEntityId IN {list}")
    })
    .await?;
    Ok(LinkTable::from_links(rows.iter().filter_map(LinkRecord::from_row)))
}

/// Fetch the latest version of each document, one file per document.
async fn fetch_latest_versions<S: Store>(
    source: &S,
    document_ids: &[String],
) -> Result<Vec<FileMetadata>> {
    let rows = query_chunked(source, document_ids, |list| {
        format!(
            "SELECT {} FROM ContentVersion WHERE ContentDocumentId IN {list} AND IsLatest = true",
            FileMetadata::FIELDS
        )
    })
    .await?;

    let mut latest: BTreeMap<String, FileMetadata> = BTreeMap::new();
    for file in rows.iter().filter_map(FileMetadata::from_row) {
        let newer = latest
            .get(&file.document_id)
            .is_none_or(|kept| file.version_rank() > kept.version_rank());
        if newer {
            latest.insert(file.document_id.clone(), file);
        }
    }
    Ok(latest.into_values().collect())
}

/// Run discovery for a job. Read-only against both stores.
///
/// # Errors
///
/// Returns the first query failure.
pub async fn discover<S: Store, T: Store>(
    source: &S,
    target: &T,
    config: &MigrationConfig,
) -> Result<Discovery> {
    let records = resolve_records(source, target, config).await?;
    let entity_ids: Vec<String> = records.mapping.keys().cloned().collect();
    let links = fetch_link_table(source, &entity_ids).await?;
    let files = fetch_latest_versions(source, &links.document_ids()).await?;
    let (migrateable, oversized) = partition_by_size(files);

    for file in &oversized {
        warn!(
            file = %file.title,
            version = %file.id,
            size_bytes = file.size_bytes,
            "File exceeds size ceiling; skipped"
        );
    }
    info!(
        documents = links.len(),
        links = links.pair_count(),
        migrateable = migrateable.len(),
        oversized = oversized.len(),
        "Discovery complete"
    );

    Ok(Discovery {
        records,
        links,
        migrateable,
        oversized,
    })
}

/// Run one job to completion, pause, or dry-run report.
///
/// `prior` is the checkpoint of an earlier run of the same job. Files it
/// already records as transferred are not touched again.
///
/// # Errors
///
/// Discovery failures and checkpoint failures are fatal. Per-file and
/// per-batch failures are recorded on the returned result instead.
pub async fn run<S: Store, T: Store>(
    ctx: &RunContext<'_, S, T>,
    prior: Option<&MigrationState>,
    checkpoint: &mut dyn CheckpointSink,
) -> Result<MigrationResult> {
    let mut result = MigrationResult::new(RunOutcome::Completed, state_id(ctx.config));
    let found = discover(ctx.source, ctx.target, ctx.config).await?;

    let mut stats = prior.map(|p| p.stats.clone()).unwrap_or_default();
    found.record(&mut stats);
    let mut completed = prior.map(|p| p.completed.clone()).unwrap_or_default();

    ctx.progress.log(&format!(
        "{} of {} records matched, {} files eligible",
        stats.records_matched, stats.source_records, stats.files_migrateable
    ));
    if !found.oversized.is_empty() {
        ctx.progress.warn(&format!(
            "{} files exceed {MAX_FILE_BYTES} bytes and will be skipped",
            found.oversized.len()
        ));
    }

    if ctx.config.dry_run {
        result.outcome = RunOutcome::DryRun;
        result.stats = stats;
        return Ok(result);
    }

    let pending: Vec<&FileMetadata> = found
        .migrateable
        .iter()
        .filter(|f| !completed.contains_key(&f.document_id))
        .collect();
    if pending.len() < found.migrateable.len() {
        ctx.progress.log(&format!(
            "Resuming: {} files already transferred",
            found.migrateable.len() - pending.len()
        ));
    }

    let mut paused = false;
    if !pending.is_empty() {
        fs::create_dir_all(ctx.scratch_dir)?;
        ctx.progress.start("Transferring files", pending.len());
    }
    let mut done = 0;
    for batch in pending.chunks(CHUNK_SIZE) {
        if ctx.cancel.is_cancelled() {
            paused = true;
            break;
        }
        match transfer_batch(ctx, batch, &mut stats, &mut result).await {
            BatchOutcome::Aborted => {
                paused = true;
                break;
            }
            BatchOutcome::Transferred { delta, scratch } => {
                completed.extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
                stats.batches_completed += 1;
                checkpoint.batch(&delta, &stats)?;
                clean_up(&scratch, &mut result);
            }
        }
        done += batch.len();
        ctx.progress.update(done, pending.len());
    }

    if paused {
        ctx.progress.fail("Cancelled; pausing at the last completed batch");
        return pause(checkpoint, stats, result);
    }
    if !pending.is_empty() {
        ctx.progress.stop(&format!(
            "{} files uploaded, {} failed",
            stats.files_uploaded, stats.files_failed
        ));
    }

    let links = reconcile_links(
        ctx.target,
        &found.links,
        &completed,
        &found.records.mapping,
        ctx.progress,
        ctx.cancel,
        &mut result,
    )
    .await?;
    stats.links_created = links.created;
    stats.links_existing = links.existing;
    stats.links_failed = links.failed;

    if links.cancelled {
        ctx.progress.fail("Cancelled; pausing before the remaining links");
        return pause(checkpoint, stats, result);
    }
    checkpoint.completed(&stats)?;
    result.stats = stats;
    Ok(result)
}

fn pause(
    checkpoint: &mut dyn CheckpointSink,
    stats: MigrationStats,
    mut result: MigrationResult,
) -> Result<MigrationResult> {
    checkpoint.paused(&stats)?;
    result.outcome = RunOutcome::Paused;
    result.stats = stats;
    Ok(result)
}

enum BatchOutcome {
    /// Cancelled before upload; nothing from the batch was kept.
    Aborted,
    Transferred {
        delta: DocumentMapping,
        scratch: Vec<PathBuf>,
    },
}

/// Counters and errors of one batch, applied only if the batch is kept.
#[derive(Default)]
struct BatchTally {
    downloaded: usize,
    reused: usize,
    uploaded: usize,
    failed: usize,
    resolved: usize,
    errors: Vec<(Option<String>, Stage, String)>,
}

impl BatchTally {
    fn fail(&mut self, file: &FileMetadata, stage: Stage, error: &Error) {
        warn!(file = %file.title, version = %file.id, %stage, error = %error, "File failed");
        self.failed += 1;
        self.errors.push((Some(file.title.clone()), stage, error.to_string()));
    }

    fn apply(self, stats: &mut MigrationStats, result: &mut MigrationResult) {
        stats.files_downloaded += self.downloaded;
        stats.files_reused += self.reused;
        stats.files_uploaded += self.uploaded;
        stats.files_failed += self.failed;
        stats.documents_resolved += self.resolved;
        for (file, stage, error) in self.errors {
            result.push_error(file, stage, error);
        }
    }
}

async fn download<S: Store>(source: &S, file: &FileMetadata, path: &Path) -> Result<()> {
    let bytes = source.fetch_version_data(&file.id).await?;
    atomic_write(path, &bytes)?;
    debug!(version = %file.id, bytes = bytes.len(), "downloaded");
    Ok(())
}

/// Upload one file as a new version and return the new version id.
async fn upload<T: Store>(target: &T, file: &FileMetadata, path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;

    let mut record = Map::new();
    record.insert("Title".into(), Value::String(file.title.clone()));
    record.insert("PathOnClient".into(), Value::String(file.upload_path()));
    if let Some(description) = &file.description {
        record.insert("Description".into(), Value::String(description.clone()));
    }
    record.insert(
        "VersionData".into(),
        Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes)),
    );

    let outcome = target
        .create("ContentVersion", vec![Value::Object(record)])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Other("no result returned for upload".into()))?;

    match outcome.id {
        Some(id) if outcome.success => Ok(id),
        _ => Err(Error::Other(format!("upload rejected: {}", outcome.error_text()))),
    }
}

/// Map new target version ids to target document ids.
async fn resolve_documents<T: Store>(
    target: &T,
    version_ids: &[String],
) -> Result<BTreeMap<String, String>> {
    let rows = query_chunked(target, version_ids, |list| {
        format!("SELECT Id, ContentDocumentId FROM ContentVersion WHERE Id IN {list}")
    })
    .await?;
    Ok(rows
        .iter()
        .filter_map(|row| Some((field_text(row, "Id")?, field_text(row, "ContentDocumentId")?)))
        .collect())
}

/// Delete the files an abandoned batch downloaded.
fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = remove_if_exists(path) {
            warn!(path = %path.display(), error = %e, "Could not discard scratch file");
        }
    }
}

/// Delete a finished batch's scratch files. Failures are reported, not fatal.
fn clean_up(paths: &[PathBuf], result: &mut MigrationResult) {
    for path in paths {
        if let Err(e) = remove_if_exists(path) {
            warn!(path = %path.display(), error = %e, "Could not remove scratch file");
            result.push_error(
                Some(path.display().to_string()),
                Stage::Checkpoint,
                e.to_string(),
            );
        }
    }
}

async fn transfer_batch<S: Store, T: Store>(
    ctx: &RunContext<'_, S, T>,
    batch: &[&FileMetadata],
    stats: &mut MigrationStats,
    result: &mut MigrationResult,
) -> BatchOutcome {
    let mut tally = BatchTally::default();
    let mut downloaded: Vec<(&FileMetadata, PathBuf)> = Vec::with_capacity(batch.len());
    // Written by this attempt, as opposed to reused from an earlier one
    let mut fetched: Vec<PathBuf> = Vec::new();

    for &file in batch {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let path = ctx.scratch_dir.join(file.scratch_name());
        if path.is_file() {
            debug!(version = %file.id, "reusing scratch file");
            tally.reused += 1;
            downloaded.push((file, path));
            continue;
        }
        match download(ctx.source, file, &path).await {
            Ok(()) => {
                tally.downloaded += 1;
                fetched.push(path.clone());
                downloaded.push((file, path));
            }
            Err(e) => tally.fail(file, Stage::Download, &e),
        }
    }

    if ctx.cancel.is_cancelled() {
        info!(files = fetched.len(), "Batch interrupted; discarding its downloads");
        discard(&fetched);
        return BatchOutcome::Aborted;
    }
    let scratch: Vec<PathBuf> = downloaded.iter().map(|(_, p)| p.clone()).collect();

    // New target version id → source document id
    let mut correlation: BTreeMap<String, String> = BTreeMap::new();
    for (file, path) in &downloaded {
        match upload(ctx.target, file, path).await {
            Ok(version_id) => {
                tally.uploaded += 1;
                correlation.insert(version_id, file.document_id.clone());
            }
            Err(e) => tally.fail(file, Stage::Upload, &e),
        }
    }

    let mut delta = DocumentMapping::new();
    if !correlation.is_empty() {
        let version_ids: Vec<String> = correlation.keys().cloned().collect();
        match resolve_documents(ctx.target, &version_ids).await {
            Ok(resolved) => {
                for (version_id, target_doc) in resolved {
                    if let Some(source_doc) = correlation.get(&version_id) {
                        delta.insert(source_doc.clone(), target_doc);
                    }
                }
            }
            Err(e) => {
                warn!(uploads = correlation.len(), error = %e, "Document resolution failed");
                tally.errors.push((None, Stage::Resolve, e.to_string()));
            }
        }

        if delta.is_empty() {
            ctx.progress.warn(&format!(
                "{} files uploaded but resolved 0 target documents; the target may be rejecting \
                 new content silently (check its storage limits)",
                correlation.len()
            ));
        } else if delta.len() < correlation.len() {
            let missing = correlation.len() - delta.len();
            warn!(missing, "Some uploaded versions did not resolve to a document");
            tally.errors.push((
                None,
                Stage::Resolve,
                format!("{missing} uploaded versions did not resolve to a document"),
            ));
        }
    }
    tally.resolved = delta.len();
    tally.apply(stats, result);

    BatchOutcome::Transferred { delta, scratch }
}
