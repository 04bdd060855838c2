//! Core domain types for a guided workout session.
//!
//! This module defines the types shared across the system:
//! - Flattened steps produced by the sequencer
//! - Session phases and end reasons
//! - The observable session state

use crate::plan::IntervalNode;
use serde::{Deserialize, Serialize};

// ============================================================================
// Flattened Steps
// ============================================================================

/// How a step is executed
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Timed,
    Reps,
    Distance,
}

/// The kind of plan node a step was produced from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlannedKind {
    Warmup,
    Cooldown,
    Timed,
    Reps,
    Distance,
}

impl PlannedKind {
    /// Warmups and cooldowns don't count towards active time
    pub fn is_low_intensity(self) -> bool {
        matches!(self, PlannedKind::Warmup | PlannedKind::Cooldown)
    }
}

/// Rest that follows a step
///
/// `Manual` (no rest seconds given) waits for the user; `None` (an explicit
/// zero) moves straight on. The two are never interchangeable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestAfter {
    None,
    Manual,
    Seconds(u32),
}

impl RestAfter {
    /// Build from a plan's optional rest seconds
    pub fn from_rest_seconds(rest_seconds: Option<u32>) -> Self {
        match rest_seconds {
            None => RestAfter::Manual,
            Some(0) => RestAfter::None,
            Some(secs) => RestAfter::Seconds(secs),
        }
    }

    pub fn is_declared(self) -> bool {
        !matches!(self, RestAfter::None)
    }
}

/// One linear, atomic, executable unit of a session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlattenedStep {
    /// Session-wide position, starting at 1
    pub index: u32,
    pub source: IntervalNode,
    pub display_label: String,
    pub display_details: String,
    pub round_label: Option<String>,
    pub timer_seconds: Option<u32>,
    pub kind: StepKind,
    pub media_url: Option<String>,
    pub rest_after: RestAfter,
    pub set_number: Option<u32>,
    pub total_sets: Option<u32>,
}

impl FlattenedStep {
    pub fn planned_kind(&self) -> PlannedKind {
        match self.source {
            IntervalNode::Warmup { .. } => PlannedKind::Warmup,
            IntervalNode::Cooldown { .. } => PlannedKind::Cooldown,
            IntervalNode::Reps { .. } => PlannedKind::Reps,
            IntervalNode::Distance { .. } => PlannedKind::Distance,
            IntervalNode::Timed { .. } | IntervalNode::Repeat { .. } => PlannedKind::Timed,
        }
    }

    /// Work countdown for this step, if it has one
    ///
    /// A reps step's `timer_seconds` is its trailing rest, not a work timer.
    pub fn work_seconds(&self) -> Option<u32> {
        match self.kind {
            StepKind::Timed => self.timer_seconds,
            StepKind::Reps | StepKind::Distance => None,
        }
    }

    pub fn rest_after_seconds(&self) -> Option<u32> {
        match self.rest_after {
            RestAfter::Seconds(secs) => Some(secs),
            RestAfter::None => Some(0),
            RestAfter::Manual => None,
        }
    }

    pub fn is_manual_rest_after(&self) -> bool {
        self.rest_after == RestAfter::Manual
    }

    /// Planned reps for a reps step
    pub fn planned_reps(&self) -> Option<u32> {
        match self.source {
            IntervalNode::Reps { reps, .. } => Some(reps),
            _ => None,
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// The session's top-level mode
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Resting,
    Ended,
}

impl Phase {
    /// Running, paused or resting
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Running | Phase::Paused | Phase::Resting)
    }

    /// Phases from which a fresh session may start without ending another
    pub fn accepts_start(self) -> bool {
        matches!(self, Phase::Idle | Phase::Ended)
    }
}

/// Why a session ended
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    UserEnded,
    Discarded,
    SavedForLater,
    Error,
}

impl EndReason {
    /// Whether a completion report is handed to the queue
    pub fn submits_report(self) -> bool {
        matches!(
            self,
            EndReason::Completed | EndReason::UserEnded | EndReason::Error
        )
    }
}

/// Observable state of the session, versioned for consumers
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub end_reason: Option<EndReason>,
    /// Zero-based position into the flattened step list
    pub current_step_index: usize,
    pub remaining_seconds: Option<u32>,
    pub elapsed_seconds: u32,
    pub rest_remaining_seconds: Option<u32>,
    pub is_manual_rest: bool,
    /// Bumped on every observable mutation
    pub version: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            end_reason: None,
            current_step_index: 0,
            remaining_seconds: None,
            elapsed_seconds: 0,
            rest_remaining_seconds: None,
            is_manual_rest: false,
            version: 0,
        }
    }
}
