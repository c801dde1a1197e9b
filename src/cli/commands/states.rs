//! Saved state commands (list, show, discard).

use crate::cli::StatesCommands;
use crate::error::{Error, Result};
use crate::state::file::remove_dir_if_exists;
use crate::state::{StateStore, StateSummary};
use serde::Serialize;

#[derive(Serialize)]
struct StateListOutput {
    count: usize,
    states: Vec<StateSummary>,
}

/// Execute states commands.
///
/// # Errors
///
/// Returns `Error::StateNotFound` for unknown ids, or any state store error.
pub fn execute(command: &StatesCommands, json: bool) -> Result<()> {
    let store = StateStore::open_default()?;
    match command {
        StatesCommands::List => list(&store, json),
        StatesCommands::Show { id } => show(&store, id, json),
        StatesCommands::Discard { id } => discard(&store, id, json),
    }
}

fn list(store: &StateStore, json: bool) -> Result<()> {
    let states = store.list()?;

    if json {
        let output = StateListOutput {
            count: states.len(),
            states,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if states.is_empty() {
        println!("No saved migration states.");
    } else {
        println!("Saved states ({} found):", states.len());
        println!();
        for s in &states {
            println!(
                "• {} [{}] {}.{} → {}",
                s.state_id, s.status, s.object_type, s.source_match_field, s.target_match_field
            );
            println!("  {} → {}", s.source_store, s.target_store);
            if let Some(filter) = &s.filter {
                println!("  Filter: {filter}");
            }
            println!("  Files done: {}  Updated: {}", s.completed_files, s.updated_at);
            println!();
        }
    }

    Ok(())
}

fn show(store: &StateStore, id: &str, json: bool) -> Result<()> {
    let state = store
        .load(id)?
        .ok_or_else(|| Error::StateNotFound { id: id.to_string() })?;

    if json {
        println!("{}", serde_json::to_string(&state)?);
        return Ok(());
    }

    let stats = &state.stats;
    println!("State:    {}", state.state_id);
    println!("Status:   {}", state.status);
    println!("Object:   {}", state.config.object_type);
    println!(
        "Match:    {} → {}",
        state.config.source_match_field,
        state.config.target_field()
    );
    if let Some(filter) = &state.config.filter {
        println!("Filter:   {filter}");
    }
    println!("Source:   {}", state.config.source_store);
    println!("Target:   {}", state.config.target_store);
    println!("Scratch:  {}", state.temp_dir.display());
    println!("Created:  {}", state.created_at);
    println!("Updated:  {}", state.updated_at);
    println!();
    println!(
        "Files:    {} transferred of {} eligible ({} failed so far)",
        state.completed.len(),
        stats.files_migrateable,
        stats.files_failed
    );
    println!("Batches:  {}", stats.batches_completed);

    Ok(())
}

fn discard(store: &StateStore, id: &str, json: bool) -> Result<()> {
    let state = store
        .load(id)?
        .ok_or_else(|| Error::StateNotFound { id: id.to_string() })?;

    store.delete(id)?;
    remove_dir_if_exists(&state.temp_dir)?;

    if json {
        let output = serde_json::json!({
            "id": id,
            "discarded": true
        });
        println!("{output}");
    } else {
        println!("Discarded state: {id}");
    }

    Ok(())
}
