//! Data models for docshift.
//!
//! This module contains the domain models:
//! - Typed projections of remote rows (SourceRecord, FileMetadata, LinkRecord)
//! - The link table and the two id mappings built during a run
//! - Migration configuration, persisted stats, and the run result

pub mod migration;
pub mod record;

pub use migration::{
    MigrationConfig, MigrationResult, MigrationStats, RunOutcome, Stage, StateStatus,
    TransferError, MAX_REPORTED_ERRORS,
};
pub use record::{
    field_text, DocumentMapping, FileMetadata, LinkRecord, LinkTable, RecordMapping, SourceRecord,
};
