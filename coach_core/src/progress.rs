//! Resumable "saved progress" record.
//!
//! A session ended with `saved_for_later` leaves exactly one record behind;
//! starting any session clears it.

use crate::persist::{read_json, remove_if_exists, write_json_atomic};
use crate::plan::WorkoutPlan;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SavedProgress {
    pub session_id: Uuid,
    pub name: String,
    /// Zero-based step position
    pub current_step_index: usize,
    pub elapsed_seconds: u32,
    pub saved_at: DateTime<Utc>,
    pub plan: WorkoutPlan,
}

/// Persistence for the single saved-progress record
pub trait ProgressStore: Send {
    fn save(&mut self, progress: &SavedProgress) -> Result<()>;
    fn load(&self) -> Result<Option<SavedProgress>>;
    fn clear(&mut self) -> Result<()>;
}

/// JSON file store that survives restarts
#[derive(Clone, Debug)]
pub struct FileProgressStore {
    path: PathBuf,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ProgressStore for FileProgressStore {
    fn save(&mut self, progress: &SavedProgress) -> Result<()> {
        write_json_atomic(&self.path, progress)?;
        tracing::debug!("Saved progress for session {} to {:?}", progress.session_id, self.path);
        Ok(())
    }

    fn load(&self) -> Result<Option<SavedProgress>> {
        let progress: Option<SavedProgress> = read_json(&self.path)?;
        if let Some(ref p) = progress {
            tracing::debug!("Loaded saved progress for session {}", p.session_id);
        }
        Ok(progress)
    }

    fn clear(&mut self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

/// In-process store; clones share the same slot
#[derive(Clone, Debug, Default)]
pub struct MemoryProgressStore {
    slot: Arc<Mutex<Option<SavedProgress>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SavedProgress>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressStore for MemoryProgressStore {
    fn save(&mut self, progress: &SavedProgress) -> Result<()> {
        *self.slot() = Some(progress.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<SavedProgress>> {
        Ok(self.slot().clone())
    }

    fn clear(&mut self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}
