//! Link reconciliation.
//!
//! After all files are transferred, every source link `(document, entity)`
//! whose document and entity both have target counterparts becomes a target
//! link candidate. Candidates already present in the target are skipped, the
//! rest are inserted in batches. Re-running over an already reconciled
//! target creates nothing, so a pass may stop between batches on
//! cancellation and be picked up again later.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{DocumentMapping, LinkRecord, LinkTable, MigrationResult, RecordMapping, Stage};
use crate::query::{query_chunked, CHUNK_SIZE};
use crate::store::Store;

use super::{CancelToken, ProgressSink};

const LINK_OBJECT: &str = "ContentDocumentLink";

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub candidates: usize,
    pub existing: usize,
    pub created: usize,
    pub failed: usize,
    /// Stopped on cancellation before every batch was sent
    pub cancelled: bool,
}

/// Translate source links into distinct target link pairs.
///
/// A pair is produced only when the document was transferred and the entity
/// was matched.
#[must_use]
pub fn candidate_links(
    links: &LinkTable,
    documents: &DocumentMapping,
    records: &RecordMapping,
) -> BTreeSet<LinkRecord> {
    let mut candidates = BTreeSet::new();
    for (source_doc, entities) in links.iter() {
        let Some(target_doc) = documents.get(source_doc) else {
            continue;
        };
        for entity in entities {
            if let Some(target_entity) = records.get(entity) {
                candidates.insert(LinkRecord {
                    document_id: target_doc.clone(),
                    linked_entity_id: target_entity.clone(),
                });
            }
        }
    }
    candidates
}

async fn existing_links<T: Store>(
    target: &T,
    candidates: &BTreeSet<LinkRecord>,
) -> Result<BTreeSet<LinkRecord>> {
    let documents: Vec<String> = candidates
        .iter()
        .map(|l| l.document_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let rows = query_chunked(target, &documents, |list| {
        format!("SELECT ContentDocumentId, LinkedEntityId FROM {LINK_OBJECT} WHERE ContentDocumentId IN {list}")
    })
    .await?;

    Ok(rows.iter().filter_map(LinkRecord::from_row).collect())
}

fn link_body(link: &LinkRecord) -> Value {
    json!({
        "ContentDocumentId": link.document_id,
        "LinkedEntityId": link.linked_entity_id,
        "ShareType": "V",
        "Visibility": "AllUsers",
    })
}

/// Create the missing target links.
///
/// Per-item rejections and failed batch requests are recorded on `result`
/// and counted; they do not stop the pass. Cancellation is checked before
/// each batch.
///
/// # Errors
///
/// Fails only if the existing-link lookup fails, since without it the pass
/// could create duplicates.
pub async fn reconcile_links<T: Store>(
    target: &T,
    links: &LinkTable,
    documents: &DocumentMapping,
    records: &RecordMapping,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
    result: &mut MigrationResult,
) -> Result<LinkStats> {
    let candidates = candidate_links(links, documents, records);
    let mut stats = LinkStats {
        candidates: candidates.len(),
        ..LinkStats::default()
    };

    let existing = existing_links(target, &candidates).await?;
    let missing: Vec<LinkRecord> = candidates.difference(&existing).cloned().collect();
    stats.existing = candidates.len() - missing.len();
    debug!(
        candidates = stats.candidates,
        existing = stats.existing,
        "link candidates computed"
    );

    if !missing.is_empty() {
        progress.start("Creating links", missing.len());
    }
    let mut done = 0;
    for batch in missing.chunks(CHUNK_SIZE) {
        if cancel.is_cancelled() {
            stats.cancelled = true;
            break;
        }
        let body: Vec<Value> = batch.iter().map(link_body).collect();
        match target.create(LINK_OBJECT, body).await {
            Ok(outcomes) => {
                for (i, link) in batch.iter().enumerate() {
                    match outcomes.get(i) {
                        Some(outcome) if outcome.success => stats.created += 1,
                        Some(outcome) => {
                            stats.failed += 1;
                            result.push_error(
                                Some(link.document_id.clone()),
                                Stage::Link,
                                format!("{}: {}", link.linked_entity_id, outcome.error_text()),
                            );
                        }
                        None => {
                            stats.failed += 1;
                            result.push_error(
                                Some(link.document_id.clone()),
                                Stage::Link,
                                format!("{}: no result returned", link.linked_entity_id),
                            );
                        }
                    }
                }
            }
            Err(e) => {
                warn!(links = batch.len(), error = %e, "Link batch failed");
                stats.failed += batch.len();
                result.push_error(None, Stage::LinkBatch, e.to_string());
            }
        }
        done += batch.len();
        progress.update(done, missing.len());
    }
    if stats.cancelled {
        info!(created = stats.created, remaining = missing.len() - done, "Link pass interrupted");
        return Ok(stats);
    }
    if !missing.is_empty() {
        progress.stop(&format!("{} links created", stats.created));
    }

    if !documents.is_empty() && stats.created == 0 && stats.existing == 0 {
        progress.warn(&format!(
            "No links created: {} source documents with links, {} transferred documents, \
             {} matched records, {} candidate pairs",
            links.len(),
            documents.len(),
            records.len(),
            stats.candidates
        ));
    }

    info!(
        created = stats.created,
        existing = stats.existing,
        failed = stats.failed,
        "Links reconciled"
    );
    Ok(stats)
}
