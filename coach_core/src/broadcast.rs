//! Session snapshots for paired-device mirroring.
//!
//! The engine pushes a [`SessionSnapshot`] after every mutation. Transport
//! belongs to the [`DeviceBroadcastGateway`] implementation, which may drop
//! or throttle snapshots but never reorder them. Consumers use
//! [`SnapshotGate`] to discard anything older than what they have seen.

use crate::types::{FlattenedStep, SessionState, StepKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display fields of the current step
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepDisplay {
    pub index: u32,
    pub label: String,
    pub details: String,
    pub round_label: Option<String>,
    pub kind: StepKind,
    pub set_number: Option<u32>,
    pub total_sets: Option<u32>,
    pub media_url: Option<String>,
}

impl From<&FlattenedStep> for StepDisplay {
    fn from(step: &FlattenedStep) -> Self {
        Self {
            index: step.index,
            label: step.display_label.clone(),
            details: step.display_details.clone(),
            round_label: step.round_label.clone(),
            kind: step.kind,
            set_number: step.set_number,
            total_sets: step.total_sets,
            media_url: step.media_url.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    pub total_steps: usize,
    pub step: Option<StepDisplay>,
}

impl SessionSnapshot {
    pub fn version(&self) -> u64 {
        self.state.version
    }
}

/// Paired-device state mirroring
pub trait DeviceBroadcastGateway: Send {
    fn publish(&mut self, snapshot: &SessionSnapshot);
}

/// Gateway for hosts without a paired device
#[derive(Debug, Default)]
pub struct NullGateway;

impl DeviceBroadcastGateway for NullGateway {
    fn publish(&mut self, _snapshot: &SessionSnapshot) {}
}

/// Keeps only snapshots newer than the latest accepted one
#[derive(Debug, Default)]
pub struct SnapshotGate {
    latest: Option<u64>,
}

impl SnapshotGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the snapshot is current and should be applied
    pub fn accept(&mut self, snapshot: &SessionSnapshot) -> bool {
        let version = snapshot.version();
        match self.latest {
            Some(latest) if version <= latest => {
                tracing::debug!("Discarding stale snapshot v{} (have v{})", version, latest);
                false
            }
            _ => {
                self.latest = Some(version);
                true
            }
        }
    }

    pub fn latest(&self) -> Option<u64> {
        self.latest
    }
}
