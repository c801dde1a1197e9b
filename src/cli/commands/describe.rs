//! Describe command implementation.

use crate::config::{resolve_store, StoreRole};
use crate::error::{Error, Result};
use crate::store::{RestStore, Store};

/// Execute the describe command against the source or target store.
///
/// # Errors
///
/// Returns configuration errors, or the store's error for unknown objects.
pub fn execute(object: &str, target: bool, json: bool) -> Result<()> {
    let role = if target {
        StoreRole::Target
    } else {
        StoreRole::Source
    };
    let store = RestStore::new(&resolve_store(role)?)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    let schema = rt.block_on(store.describe(object))?;

    if json {
        println!("{}", serde_json::to_string(&schema)?);
        return Ok(());
    }

    println!("{} in {} ({} fields)", schema.name, store.identity(), schema.fields.len());
    println!();
    let width = schema.fields.iter().map(|f| f.name.len()).max().unwrap_or(0);
    for field in &schema.fields {
        println!("  {:width$}  {:<12}  {}", field.name, field.field_type, field.label);
    }

    Ok(())
}
