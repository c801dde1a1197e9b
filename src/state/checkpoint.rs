//! Checkpoint sinks.
//!
//! The transfer engine never writes state files. It hands each batch's
//! newly resolved documents and the updated stats to a [`CheckpointSink`];
//! [`StateCheckpoint`] merges them into the persisted [`MigrationState`].

use tracing::info;

use crate::error::Result;
use crate::model::{DocumentMapping, MigrationStats, StateStatus};

use super::file::remove_dir_if_exists;
use super::{MigrationState, StateStore};

/// Receiver of progress the engine wants made durable.
pub trait CheckpointSink: Send {
    /// A batch finished: merge `delta` into the completed mapping and
    /// persist `stats`. Must be durable before returning.
    ///
    /// # Errors
    ///
    /// A failure here is fatal for the run.
    fn batch(&mut self, delta: &DocumentMapping, stats: &MigrationStats) -> Result<()>;

    /// The run stopped on cancellation after the last completed batch.
    ///
    /// # Errors
    ///
    /// A failure here is fatal for the run.
    fn paused(&mut self, stats: &MigrationStats) -> Result<()>;

    /// Every eligible file was transferred and links were reconciled.
    ///
    /// # Errors
    ///
    /// A failure here is fatal for the run.
    fn completed(&mut self, stats: &MigrationStats) -> Result<()>;
}

/// Sink backed by the on-disk state store.
pub struct StateCheckpoint<'a> {
    store: &'a StateStore,
    state: MigrationState,
}

impl<'a> StateCheckpoint<'a> {
    /// Wrap a state that is about to be (re)run. Its status becomes
    /// `in_progress`.
    #[must_use]
    pub fn new(store: &'a StateStore, mut state: MigrationState) -> Self {
        state.status = StateStatus::InProgress;
        Self { store, state }
    }

    #[must_use]
    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    /// Persist the current in-memory state.
    ///
    /// # Errors
    ///
    /// Returns any state store failure.
    pub fn save(&mut self) -> Result<()> {
        self.state.touch();
        self.store.save(&self.state)
    }
}

impl CheckpointSink for StateCheckpoint<'_> {
    fn batch(&mut self, delta: &DocumentMapping, stats: &MigrationStats) -> Result<()> {
        self.state
            .completed
            .extend(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.state.stats = stats.clone();
        self.save()
    }

    fn paused(&mut self, stats: &MigrationStats) -> Result<()> {
        self.state.status = StateStatus::Paused;
        self.state.stats = stats.clone();
        self.save()?;
        info!(
            state_id = %self.state.state_id,
            completed = self.state.completed.len(),
            "Migration paused; re-run the same command to resume"
        );
        Ok(())
    }

    fn completed(&mut self, stats: &MigrationStats) -> Result<()> {
        self.state.status = StateStatus::Completed;
        self.state.stats = stats.clone();
        self.store.delete(&self.state.state_id)?;
        remove_dir_if_exists(&self.state.temp_dir)?;
        info!(state_id = %self.state.state_id, "Migration complete; checkpoint removed");
        Ok(())
    }
}
