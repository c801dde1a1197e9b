//! Remote record stores.
//!
//! A [`Store`] is the capability surface the engine consumes from a remote
//! multi-tenant store: text queries with continuation paging, schema
//! description, binary fetch by version id, record creation, and a stable
//! identity string used to isolate checkpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  transfer engine │
//! └────────┬─────────┘
//!          │  Store (query / query_more / fetch / create)
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐ ┌────────┐
//! │ source │ │ target │   RestStore handles, passed explicitly
//! └────────┘ └────────┘
//! ```

pub mod rest;

#[cfg(test)]
pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

use crate::error::Result;

pub use rest::RestStore;

/// One page of query results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub total_size: usize,
    pub done: bool,
    #[serde(default)]
    pub records: Vec<Value>,
    /// Opaque continuation reference, present while `done` is false
    #[serde(default)]
    pub next_records_url: Option<String>,
}

/// An error message attached to a failed record operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMessage {
    #[serde(default)]
    pub status_code: Option<String>,
    pub message: String,
}

/// Per-record outcome of a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOutcome {
    #[serde(default)]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<StoreMessage>,
}

impl CreateOutcome {
    /// Human-readable description of why this record failed.
    #[must_use]
    pub fn error_text(&self) -> String {
        if self.errors.is_empty() {
            return "create reported failure without details".to_string();
        }
        self.errors
            .iter()
            .map(|e| match &e.status_code {
                Some(code) => format!("{code}: {}", e.message),
                None => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A field on an object schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
}

/// Object schema returned by `describe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl ObjectSchema {
    /// Whether a field exists, compared case-insensitively.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Capabilities the engine needs from a remote store.
///
/// Handles are passed explicitly into every engine call; nothing holds
/// ambient connection state.
pub trait Store: Send + Sync {
    /// Stable string identifying which remote instance this handle points to.
    fn identity(&self) -> &str;

    /// Execute a query and return its first page.
    fn query(&self, soql: &str) -> impl Future<Output = Result<QueryPage>> + Send;

    /// Fetch the next page using a continuation reference from a prior page.
    fn query_more(&self, next: &str) -> impl Future<Output = Result<QueryPage>> + Send;

    /// Describe an object's schema.
    fn describe(&self, object: &str) -> impl Future<Output = Result<ObjectSchema>> + Send;

    /// Download the raw bytes of one file version.
    fn fetch_version_data(&self, version_id: &str)
    -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Create one or many records of a type, returning one outcome per record
    /// in request order. Individual failures are reported per record; the
    /// call itself errors only when the request as a whole fails.
    fn create(
        &self,
        object: &str,
        records: Vec<Value>,
    ) -> impl Future<Output = Result<Vec<CreateOutcome>>> + Send;
}
