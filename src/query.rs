//! Chunked and paginated query execution.
//!
//! Remote stores cap the number of values in one `IN (...)` clause and
//! return large result sets in pages. This module hides both limits:
//!
//! - **Chunking**: value sets are split into groups of at most
//!   [`CHUNK_SIZE`]; each group becomes one complete query
//! - **Pagination**: each query is drained through its continuation
//!   references until the store reports `done`
//!
//! Failures propagate unchanged. Nothing here retries.

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::store::Store;

/// Maximum number of values in one `IN (...)` clause, and the batch size
/// used throughout the engine.
pub const CHUNK_SIZE: usize = 200;

/// Quote a value as a SOQL string literal.
///
/// Backslashes and single quotes are backslash-escaped.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Render a parenthesized, comma-separated list of quoted values.
#[must_use]
pub fn in_clause(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("({})", quoted.join(", "))
}

/// Split values into whole chunks of at most [`CHUNK_SIZE`].
///
/// An empty input yields no chunks.
#[must_use]
pub fn chunk_values(values: &[String]) -> Vec<&[String]> {
    values.chunks(CHUNK_SIZE).collect()
}

/// Run one query and follow its continuation references to the end.
///
/// # Errors
///
/// Returns the first request failure.
pub async fn query_all<S: Store>(store: &S, soql: &str) -> Result<Vec<Value>> {
    let mut page = store.query(soql).await?;
    let mut rows = std::mem::take(&mut page.records);
    let mut pages = 1usize;

    while !page.done {
        let Some(next) = page.next_records_url.take() else {
            break;
        };
        page = store.query_more(&next).await?;
        rows.append(&mut page.records);
        pages += 1;
    }

    debug!(store = store.identity(), pages, rows = rows.len(), "query drained");
    Ok(rows)
}

/// Run one fully drained query per chunk of `values`.
///
/// `shape` receives the rendered `IN (...)` list for a chunk and returns the
/// complete query text. Rows from all chunks are concatenated; no cross-chunk
/// ordering is promised.
///
/// # Errors
///
/// Returns the first request failure.
pub async fn query_chunked<S, F>(store: &S, values: &[String], shape: F) -> Result<Vec<Value>>
where
    S: Store,
    F: Fn(&str) -> String,
{
    let mut rows = Vec::new();
    for chunk in chunk_values(values) {
        let soql = shape(&in_clause(chunk));
        rows.extend(query_all(store, &soql).await?);
    }
    Ok(rows)
}
