//! Run command implementation.
//!
//! Connects both stores, checks the match fields exist, finds or creates the
//! job's checkpoint and drives the transfer engine until it completes or is
//! paused by ctrl-c.

use crate::cli::progress::ConsoleProgress;
use crate::cli::RunArgs;
use crate::config::{resolve_store, scratch_root, StoreRole};
use crate::error::{Error, Result};
use crate::model::{
    DocumentMapping, MigrationConfig, MigrationResult, MigrationStats, RunOutcome,
};
use crate::state::file::remove_dir_if_exists;
use crate::state::{
    state_id, verify_stores, CheckpointSink, MigrationState, StateCheckpoint, StateStore,
};
use crate::store::{RestStore, Store};
use crate::transfer::{self, CancelToken, ProgressSink, RunContext};
use std::path::Path;
use tracing::{info, warn};

/// Execute the run command.
///
/// # Errors
///
/// Returns configuration, validation and store errors, and any fatal engine
/// error. Per-file failures are reported in the summary instead.
pub fn execute(args: &RunArgs, json: bool, quiet: bool) -> Result<()> {
    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;

    rt.block_on(async { execute_async(args, json, quiet).await })
}

async fn execute_async(args: &RunArgs, json: bool, quiet: bool) -> Result<()> {
    let source = RestStore::new(&resolve_store(StoreRole::Source)?)?;
    let target = RestStore::new(&resolve_store(StoreRole::Target)?)?;
    let states = StateStore::open_default()?;

    let config = job_config(args, &states, source.identity(), target.identity())?;
    validate_fields(&source, &target, &config).await?;
    let prior = prior_state(args, &config, &states, source.identity(), target.identity())?;

    let progress = ConsoleProgress::new(quiet || json);
    let cancel = CancelToken::new();
    if !config.dry_run {
        watch_ctrl_c(cancel.clone(), quiet || json);
    }
    let scratch = scratch_root()?;
    let job = Job {
        states: &states,
        scratch_root: &scratch,
        config: &config,
        progress: &progress,
        cancel: &cancel,
    };
    let result = job.drive(&source, &target, prior).await?;

    print_result(&result, json)
}

/// Find the saved state this run continues, if any.
///
/// `--fresh` discards a saved state and its scratch directory, except on a
/// dry run, which never changes local state. A state that is kept must have
/// been recorded against the connected stores.
fn prior_state(
    args: &RunArgs,
    config: &MigrationConfig,
    states: &StateStore,
    source: &str,
    target: &str,
) -> Result<Option<MigrationState>> {
    let id = state_id(config);
    match states.load(&id)? {
        Some(state) if args.fresh && !config.dry_run => {
            info!(state_id = %id, "Discarding saved state (--fresh)");
            states.delete(&id)?;
            remove_dir_if_exists(&state.temp_dir)?;
            Ok(None)
        }
        Some(state) => {
            verify_stores(&state, source, target)?;
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

/// Local side of one run: where state lives and how progress is shown.
struct Job<'a> {
    states: &'a StateStore,
    scratch_root: &'a Path,
    config: &'a MigrationConfig,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancelToken,
}

impl Job<'_> {
    /// Run the engine against `prior`, or against a new state for a new job.
    ///
    /// A new job's state is written before discovery. A resumed state is
    /// only rewritten by the engine's first checkpoint, so a fatal error
    /// leaves it as it was.
    async fn drive<S: Store, T: Store>(
        &self,
        source: &S,
        target: &T,
        prior: Option<MigrationState>,
    ) -> Result<MigrationResult> {
        let state = match &prior {
            Some(state) => state.clone(),
            None => MigrationState::new(
                self.config.clone(),
                self.scratch_root.join(state_id(self.config)),
            ),
        };
        let ctx = RunContext {
            source,
            target,
            config: self.config,
            scratch_dir: &state.temp_dir,
            progress: self.progress,
            cancel: self.cancel,
        };

        if self.config.dry_run {
            return transfer::run(&ctx, prior.as_ref(), &mut DryRunSink).await;
        }
        let mut sink = StateCheckpoint::new(self.states, state.clone());
        if prior.is_none() {
            sink.save()?;
        }
        transfer::run(&ctx, prior.as_ref(), &mut sink).await
    }
}

/// Build the job config from flags, or from the saved state on `--resume`.
fn job_config(
    args: &RunArgs,
    states: &StateStore,
    source: &str,
    target: &str,
) -> Result<MigrationConfig> {
    if let Some(id) = &args.resume {
        let state = states
            .load(id)?
            .ok_or_else(|| Error::StateNotFound { id: id.clone() })?;
        verify_stores(&state, source, target)?;
        let mut config = state.config;
        config.dry_run = args.dry_run;
        return Ok(config);
    }

    let required = |value: &Option<String>, flag: &str| {
        value
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::InvalidArgument(format!("{flag} is required")))
    };

    Ok(MigrationConfig {
        object_type: required(&args.object, "--object")?,
        source_match_field: required(&args.match_field, "--match-field")?,
        target_match_field: args.target_match_field.clone(),
        filter: args.filter.clone().filter(|f| !f.trim().is_empty()),
        source_store: source.to_string(),
        target_store: target.to_string(),
        dry_run: args.dry_run,
    })
}

/// Reject match fields missing from either side's schema.
async fn validate_fields<S: Store, T: Store>(
    source: &S,
    target: &T,
    config: &MigrationConfig,
) -> Result<()> {
    let source_schema = source.describe(&config.object_type).await?;
    if !source_schema.has_field(&config.source_match_field) {
        return Err(Error::UnknownField {
            object: config.object_type.clone(),
            field: config.source_match_field.clone(),
            store: StoreRole::Source.as_str().to_string(),
        });
    }

    let target_schema = target.describe(&config.object_type).await?;
    if !target_schema.has_field(config.target_field()) {
        return Err(Error::UnknownField {
            object: config.object_type.clone(),
            field: config.target_field().to_string(),
            store: StoreRole::Target.as_str().to_string(),
        });
    }
    Ok(())
}

/// First ctrl-c pauses at the next safe point; the second exits at once.
fn watch_ctrl_c(cancel: CancelToken, silent: bool) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.cancel() > 1 {
                warn!("Second interrupt; exiting without pausing");
                std::process::exit(130);
            }
            if !silent {
                eprintln!("Stopping after the current file. Press ctrl-c again to exit immediately.");
            }
        }
    });
}

/// Sink for dry runs, which never reach a checkpoint.
struct DryRunSink;

impl CheckpointSink for DryRunSink {
    fn batch(&mut self, _: &DocumentMapping, _: &MigrationStats) -> Result<()> {
        Ok(())
    }

    fn paused(&mut self, _: &MigrationStats) -> Result<()> {
        Ok(())
    }

    fn completed(&mut self, _: &MigrationStats) -> Result<()> {
        Ok(())
    }
}

fn print_result(result: &MigrationResult, json: bool) -> Result<()> {
    use colored::Colorize;

    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    let stats = &result.stats;
    let heading = match result.outcome {
        RunOutcome::DryRun => "Dry run".cyan().bold(),
        RunOutcome::Paused => "Paused".yellow().bold(),
        RunOutcome::Completed => "Completed".green().bold(),
    };
    println!();
    println!("{heading}  state {}", result.state_id);
    println!(
        "  Records:  {} of {} matched, {} unmatched",
        stats.records_matched, stats.source_records, stats.records_unmatched
    );
    println!(
        "  Files:    {} found, {} eligible, {} too large",
        stats.files_found, stats.files_migrateable, stats.files_skipped
    );

    if result.outcome != RunOutcome::DryRun {
        println!(
            "  Transfer: {} uploaded, {} failed, {} documents resolved",
            stats.files_uploaded, stats.files_failed, stats.documents_resolved
        );
        if stats.files_reused > 0 {
            println!("            {} downloads reused from scratch", stats.files_reused);
        }
    }
    if result.outcome == RunOutcome::Completed {
        println!(
            "  Links:    {} created, {} existing, {} failed",
            stats.links_created, stats.links_existing, stats.links_failed
        );
    }

    if !result.errors.is_empty() {
        println!();
        println!("{}", "Errors".red().bold());
        for e in &result.errors {
            match &e.file {
                Some(file) => println!("  [{}] {file}: {}", e.stage, e.error),
                None => println!("  [{}] {}", e.stage, e.error),
            }
        }
        if result.errors_dropped > 0 {
            println!("  … and {} more", result.errors_dropped);
        }
    }

    if result.outcome == RunOutcome::Paused {
        println!();
        println!(
            "Resume with the same command, or `docshift run --resume {}`.",
            result.state_id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StateStatus;
    use crate::store::memory::MemoryStore;
    use crate::transfer::TracingProgress;
    use serde_json::json;
    use tempfile::TempDir;

    fn args() -> RunArgs {
        RunArgs {
            object: Some("Account".into()),
            match_field: Some("Ext__c".into()),
            target_match_field: Some("Legacy__c".into()),
            filter: Some("  ".into()),
            dry_run: false,
            fresh: false,
            resume: None,
        }
    }

    #[test]
    fn test_job_config_from_flags() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().to_path_buf());

        let config = job_config(&args(), &states, "https://a", "https://b").unwrap();

        assert_eq!(config.object_type, "Account");
        assert_eq!(config.target_field(), "Legacy__c");
        assert_eq!(config.filter, None);
        assert_eq!(config.source_store, "https://a");
    }

    #[test]
    fn test_resume_uses_saved_config_and_checks_stores() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().to_path_buf());
        let saved = job_config(&args(), &states, "https://a", "https://b").unwrap();
        let state = MigrationState::new(saved.clone(), temp_dir.path().join("scratch"));
        states.save(&state).unwrap();

        let resume = RunArgs {
            object: None,
            match_field: None,
            target_match_field: None,
            filter: None,
            dry_run: true,
            fresh: false,
            resume: Some(state.state_id.clone()),
        };
        let config = job_config(&resume, &states, "https://a", "https://b").unwrap();
        assert_eq!(config.source_match_field, saved.source_match_field);
        assert!(config.dry_run);

        let mismatch = job_config(&resume, &states, "https://a", "https://other");
        assert!(matches!(mismatch, Err(Error::StoreMismatch { role: "target", .. })));

        let missing = RunArgs {
            resume: Some("ffffffffffffffff".into()),
            ..resume
        };
        assert!(matches!(
            job_config(&missing, &states, "https://a", "https://b"),
            Err(Error::StateNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_match_field_is_rejected() {
        let source = MemoryStore::new("mem://src");
        let target = MemoryStore::new("mem://dst");
        source.insert("Account", json!({"Id": "S1", "Ext__c": "A"}));
        target.insert("Account", json!({"Id": "T1", "Ext__c": "A"}));
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().to_path_buf());
        let config = job_config(&args(), &states, "mem://src", "mem://dst").unwrap();

        let err = validate_fields(&source, &target, &config).await.unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownField { ref field, ref store, .. } if field == "Legacy__c" && store == "target"
        ));

        let config = MigrationConfig {
            target_match_field: None,
            ..config
        };
        validate_fields(&source, &target, &config).await.unwrap();
    }

    /// A saved paused state for `args()` plus its scratch directory.
    fn saved_state(temp_dir: &TempDir, states: &StateStore) -> MigrationState {
        let config = job_config(&args(), states, "mem://src", "mem://dst").unwrap();
        let mut state = MigrationState::new(config, temp_dir.path().join("scratch"));
        state.status = StateStatus::Paused;
        state.completed.insert("069S1".into(), "069T1".into());
        std::fs::create_dir_all(&state.temp_dir).unwrap();
        std::fs::write(state.temp_dir.join("068S1.pdf"), b"partial").unwrap();
        states.save(&state).unwrap();
        state
    }

    #[test]
    fn test_fresh_discards_saved_state_and_scratch() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().join("state"));
        let saved = saved_state(&temp_dir, &states);
        let config = job_config(&args(), &states, "mem://src", "mem://dst").unwrap();
        let fresh = RunArgs {
            fresh: true,
            ..args()
        };

        let prior = prior_state(&fresh, &config, &states, "mem://src", "mem://dst").unwrap();

        assert!(prior.is_none());
        assert!(states.load(&saved.state_id).unwrap().is_none());
        assert!(!saved.temp_dir.exists());
    }

    #[test]
    fn test_fresh_is_ignored_on_dry_run() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().join("state"));
        let saved = saved_state(&temp_dir, &states);
        let fresh = RunArgs {
            fresh: true,
            dry_run: true,
            ..args()
        };
        let config = job_config(&fresh, &states, "mem://src", "mem://dst").unwrap();

        let prior = prior_state(&fresh, &config, &states, "mem://src", "mem://dst").unwrap();

        assert_eq!(prior.unwrap().completed, saved.completed);
        assert!(states.load(&saved.state_id).unwrap().is_some());
        assert!(saved.temp_dir.join("068S1.pdf").is_file());
    }

    #[test]
    fn test_detected_state_is_checked_against_connected_stores() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().join("state"));
        let saved = saved_state(&temp_dir, &states);
        let config = job_config(&args(), &states, "mem://src", "mem://dst").unwrap();

        let prior = prior_state(&args(), &config, &states, "mem://src", "mem://dst").unwrap();
        assert_eq!(prior.map(|p| p.state_id), Some(saved.state_id.clone()));

        let err = prior_state(&args(), &config, &states, "mem://elsewhere", "mem://dst").unwrap_err();
        assert!(matches!(err, Error::StoreMismatch { role: "source", .. }));
    }

    #[test]
    fn test_no_saved_state_starts_a_new_job() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().join("state"));
        let config = job_config(&args(), &states, "mem://src", "mem://dst").unwrap();

        let prior = prior_state(&args(), &config, &states, "mem://src", "mem://dst").unwrap();

        assert!(prior.is_none());
    }

    #[tokio::test]
    async fn test_new_job_state_is_created_under_scratch_root() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().join("state"));
        let config = job_config(&args(), &states, "mem://src", "mem://dst").unwrap();
        let source = MemoryStore::new("mem://src");
        let target = MemoryStore::new("mem://dst");
        source.fail_queries();
        let scratch = temp_dir.path().join("scratch");
        let progress = TracingProgress;
        let cancel = CancelToken::new();
        let job = Job {
            states: &states,
            scratch_root: &scratch,
            config: &config,
            progress: &progress,
            cancel: &cancel,
        };

        assert!(job.drive(&source, &target, None).await.is_err());

        let created = states.load(&state_id(&config)).unwrap().unwrap();
        assert_eq!(created.status, StateStatus::InProgress);
        assert_eq!(created.temp_dir, scratch.join(state_id(&config)));
        assert!(created.completed.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_leaves_resumed_state_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let states = StateStore::new(temp_dir.path().join("state"));
        let saved = saved_state(&temp_dir, &states);
        let before = states.load(&saved.state_id).unwrap().unwrap();
        let source = MemoryStore::new("mem://src");
        let target = MemoryStore::new("mem://dst");
        source.fail_queries();
        let scratch = temp_dir.path().join("scratch");
        let progress = TracingProgress;
        let cancel = CancelToken::new();
        let job = Job {
            states: &states,
            scratch_root: &scratch,
            config: &saved.config,
            progress: &progress,
            cancel: &cancel,
        };

        let err = job.drive(&source, &target, Some(before.clone())).await.unwrap_err();

        assert!(matches!(err, Error::Store { status: 500, .. }));
        let after = states.load(&saved.state_id).unwrap().unwrap();
        assert_eq!(after.status, StateStatus::Paused);
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.completed, before.completed);
    }
}
