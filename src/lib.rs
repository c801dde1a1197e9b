//! docshift - resumable migration of file attachments between two record stores
//!
//! This crate provides the core functionality for the `docshift` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (records, files, links, stats, results)
//! - [`store`] - Remote store trait and its REST client
//! - [`query`] - Chunked and paginated query execution
//! - [`resolve`] - Source → target record matching
//! - [`transfer`] - Batch transfer engine and link reconciliation
//! - [`state`] - Resumable checkpoint state
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod resolve;
pub mod state;
pub mod store;
pub mod transfer;

pub use error::{Error, Result};
