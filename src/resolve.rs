//! Record matching between source and target stores.
//!
//! Records are correlated by the value of a configurable match field, not
//! by primary key. Source records without a value, or whose value has no
//! counterpart in the target, are counted as unmatched and skipped. Gaps
//! are expected in partial migrations.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::error::Result;
use crate::model::{MigrationConfig, RecordMapping, SourceRecord};
use crate::query::{query_all, query_chunked};
use crate::store::Store;

/// Output of the resolver. Read-only for the rest of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMatch {
    /// Source records that satisfied the filter
    pub source_records: usize,
    pub mapping: RecordMapping,
    pub unmatched: usize,
    /// Match values that hit more than one target record
    pub ambiguous: usize,
}

/// Build the query that selects source records for a job.
#[must_use]
pub fn source_query(config: &MigrationConfig) -> String {
    let mut soql = format!(
        "SELECT Id, {} FROM {}",
        config.source_match_field, config.object_type
    );
    if let Some(filter) = config.filter.as_deref().filter(|f| !f.trim().is_empty()) {
        soql.push_str(&format!(" WHERE ({filter})"));
    }
    soql
}

/// Resolve the source → target record mapping for a job.
///
/// When several target records share a match value, the one with the
/// lexicographically smallest id wins and the value is counted as ambiguous.
///
/// # Errors
///
/// Returns the first query failure from either store.
pub async fn resolve_records<S: Store, T: Store>(
    source: &S,
    target: &T,
    config: &MigrationConfig,
) -> Result<RecordMatch> {
    let source_rows = query_all(source, &source_query(config)).await?;
    let records: Vec<SourceRecord> = source_rows
        .iter()
        .filter_map(|row| SourceRecord::from_row(row, &config.source_match_field))
        .collect();

    let values: Vec<String> = records
        .iter()
        .filter_map(|r| r.match_value.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let target_field = config.target_field();
    let target_rows = query_chunked(target, &values, |list| {
        format!(
            "SELECT Id, {target_field} FROM {} WHERE {target_field} IN {list}",
            config.object_type
        )
    })
    .await?;

    let mut by_value: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for row in &target_rows {
        if let Some(SourceRecord {
            id,
            match_value: Some(value),
        }) = SourceRecord::from_row(row, target_field)
        {
            by_value.entry(value).or_default().insert(id);
        }
    }

    let ambiguous = by_value.values().filter(|ids| ids.len() > 1).count();
    if ambiguous > 0 {
        warn!(
            ambiguous,
            field = target_field,
            "Match values hit several target records; using the smallest target id"
        );
    }

    let mut result = RecordMatch {
        source_records: records.len(),
        ambiguous,
        ..RecordMatch::default()
    };

    for record in records {
        let target_id = record
            .match_value
            .as_ref()
            .and_then(|v| by_value.get(v))
            .and_then(|ids| ids.first());
        match target_id {
            Some(target_id) => {
                result.mapping.insert(record.id, target_id.clone());
            }
            None => result.unmatched += 1,
        }
    }

    info!(
        source_records = result.source_records,
        matched = result.mapping.len(),
        unmatched = result.unmatched,
        "Records resolved"
    );
    Ok(result)
}
