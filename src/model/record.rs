//! Typed projections of remote store rows.
//!
//! Rows come back from the stores as loosely-typed JSON objects. They are
//! converted into these structs at the query boundary; nothing deeper in the
//! engine touches raw rows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source entity id → target entity id.
pub type RecordMapping = BTreeMap<String, String>;

/// Source document id → target document id.
pub type DocumentMapping = BTreeMap<String, String>;

/// Look up a field on a row and render it as text.
///
/// Field names are matched exactly first, then case-insensitively, since the
/// stores echo the canonical API casing rather than the casing used in the
/// query. Null and empty strings are treated as absent. Numbers and booleans
/// are stringified.
#[must_use]
pub fn field_text(row: &Value, field: &str) -> Option<String> {
    let obj = row.as_object()?;
    let value = obj.get(field).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(field))
            .map(|(_, v)| v)
    })?;

    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A business record projected to its id and match value.
///
/// Target rows fetched by the resolver use the same projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    /// `None` when the match field is null or empty; such records are unmatched.
    pub match_value: Option<String>,
}

impl SourceRecord {
    /// Project a row. Returns `None` if the row carries no `Id`.
    #[must_use]
    pub fn from_row(row: &Value, match_field: &str) -> Option<Self> {
        Some(Self {
            id: field_text(row, "Id")?,
            match_value: field_text(row, match_field),
        })
    }
}

/// One retrievable binary version of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Version id
    pub id: String,
    pub document_id: String,
    pub title: String,
    /// Original client path, sent back on upload
    pub path: Option<String>,
    pub extension: Option<String>,
    pub size_bytes: u64,
    pub description: Option<String>,
    pub version_number: Option<String>,
}

impl FileMetadata {
    /// Fields selected from `ContentVersion` to build this projection.
    pub const FIELDS: &'static str =
        "Id, ContentDocumentId, Title, PathOnClient, FileExtension, ContentSize, Description, VersionNumber";

    /// Project a `ContentVersion` row.
    #[must_use]
    pub fn from_row(row: &Value) -> Option<Self> {
        let id = field_text(row, "Id")?;
        let document_id = field_text(row, "ContentDocumentId")?;
        let size_bytes = field_text(row, "ContentSize")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        Some(Self {
            title: field_text(row, "Title").unwrap_or_else(|| id.clone()),
            id,
            document_id,
            path: field_text(row, "PathOnClient"),
            extension: field_text(row, "FileExtension"),
            size_bytes,
            description: field_text(row, "Description"),
            version_number: field_text(row, "VersionNumber"),
        })
    }

    /// Numeric version, for picking the newest of several rows.
    #[must_use]
    pub fn version_rank(&self) -> u64 {
        self.version_number
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Deterministic scratch file name: `<version id>[.<ext>]`.
    #[must_use]
    pub fn scratch_name(&self) -> String {
        match self.extension.as_deref() {
            Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
                format!("{}.{ext}", self.id)
            }
            _ => self.id.clone(),
        }
    }

    /// Client path to send on upload; falls back to title plus extension.
    #[must_use]
    pub fn upload_path(&self) -> String {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match &self.extension {
            Some(ext) => format!("{}.{ext}", self.title),
            None => self.title.clone(),
        }
    }
}

/// An association between a document and a business record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkRecord {
    pub document_id: String,
    pub linked_entity_id: String,
}

impl LinkRecord {
    /// Project a `ContentDocumentLink` row.
    #[must_use]
    pub fn from_row(row: &Value) -> Option<Self> {
        Some(Self {
            document_id: field_text(row, "ContentDocumentId")?,
            linked_entity_id: field_text(row, "LinkedEntityId")?,
        })
    }
}

/// Document id → distinct linked entity ids, in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTable {
    links: BTreeMap<String, BTreeSet<String>>,
}

impl LinkTable {
    /// Build from individual link rows. Duplicate pairs collapse.
    pub fn from_links(links: impl IntoIterator<Item = LinkRecord>) -> Self {
        let mut table = Self::default();
        for link in links {
            table
                .links
                .entry(link.document_id)
                .or_default()
                .insert(link.linked_entity_id);
        }
        table
    }

    /// Unique document ids, sorted.
    #[must_use]
    pub fn document_ids(&self) -> Vec<String> {
        self.links.keys().cloned().collect()
    }

    /// Number of distinct documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Total number of (document, entity) pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.links.values().map(BTreeSet::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.links.iter()
    }
}
