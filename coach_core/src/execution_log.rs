//! Execution log: what actually happened versus what was planned.
//!
//! The accumulator keeps one record per visit to a step that was started,
//! skipped or modified. At most one record is open (no `ended_at`) at any time:
//! starting or skipping a step closes the open record first, and so does
//! [`ExecutionLogAccumulator::build`]. Summary figures are computed at
//! build time.

use crate::types::{FlattenedStep, PlannedKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version of [`ExecutionLogDocument`]
pub const EXECUTION_LOG_VERSION: u32 = 1;

/// Outcome of a step or set
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Modified,
    NotReached,
}

/// A point in session time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stamp {
    pub at: DateTime<Utc>,
    /// Logical session seconds elapsed so far
    pub session_seconds: u32,
}

impl Stamp {
    pub fn now(session_seconds: u32) -> Self {
        Self {
            at: Utc::now(),
            session_seconds,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetRecord {
    pub set_number: u32,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps_planned: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps_completed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpe: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    /// One-based step index
    pub step_index: u32,
    pub planned_kind: PlannedKind,
    pub planned_name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub sets: Vec<SetRecord>,
    #[serde(skip)]
    started_session_seconds: u32,
}

impl ExecutionRecord {
    fn open(step: &FlattenedStep, stamp: Stamp) -> Self {
        Self {
            step_index: step.index,
            planned_kind: step.planned_kind(),
            planned_name: step.display_label.clone(),
            status: StepStatus::Completed,
            planned_duration_seconds: step.work_seconds(),
            actual_duration_seconds: None,
            started_at: Some(stamp.at),
            ended_at: None,
            skip_reason: None,
            sets: Vec::new(),
            started_session_seconds: stamp.session_seconds,
        }
    }

    fn not_reached(planned: &PlannedStep) -> Self {
        Self {
            step_index: planned.index,
            planned_kind: planned.kind,
            planned_name: planned.name.clone(),
            status: StepStatus::NotReached,
            planned_duration_seconds: planned.duration_seconds,
            actual_duration_seconds: None,
            started_at: None,
            ended_at: None,
            skip_reason: None,
            sets: Vec::new(),
            started_session_seconds: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    fn close(&mut self, status: StepStatus, stamp: Stamp) {
        // Completing a modified step keeps it marked as modified.
        if !(status == StepStatus::Completed && self.status == StepStatus::Modified) {
            self.status = status;
        }
        self.ended_at = Some(stamp.at);
        self.actual_duration_seconds = Some(
            stamp
                .session_seconds
                .saturating_sub(self.started_session_seconds),
        );
    }
}

/// Derived totals for a session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionSummary {
    pub total_steps: u32,
    pub completed: u32,
    pub skipped: u32,
    pub modified: u32,
    pub not_reached: u32,
    /// Percentage of planned steps completed, one decimal place
    pub completion_percentage: f64,
    pub total_actual_seconds: u32,
    /// Actual seconds excluding warmups and cooldowns
    pub active_seconds: u32,
    pub sets_logged: u32,
}

/// The typed execution log handed to the completion report
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLogDocument {
    pub version: u32,
    pub records: Vec<ExecutionRecord>,
    pub summary: ExecutionSummary,
}

#[derive(Clone, Debug)]
struct PlannedStep {
    index: u32,
    kind: PlannedKind,
    name: String,
    duration_seconds: Option<u32>,
}

/// Accumulates execution records over a session
#[derive(Debug, Default)]
pub struct ExecutionLogAccumulator {
    planned: Vec<PlannedStep>,
    records: Vec<ExecutionRecord>,
}

impl ExecutionLogAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the steps of the session about to run
    ///
    /// Planned steps that never get a record show up as `not_reached`.
    pub fn plan(&mut self, steps: &[FlattenedStep]) {
        self.planned = steps
            .iter()
            .map(|s| PlannedStep {
                index: s.index,
                kind: s.planned_kind(),
                name: s.display_label.clone(),
                duration_seconds: s.work_seconds(),
            })
            .collect();
    }

    pub fn start_step(&mut self, step: &FlattenedStep, stamp: Stamp) {
        self.auto_close(stamp);
        self.records.push(ExecutionRecord::open(step, stamp));
    }

    /// Close the open record with the given status
    pub fn end_step(&mut self, status: StepStatus, stamp: Stamp) {
        match self.open_record_mut() {
            Some(record) => record.close(status, stamp),
            None => tracing::debug!("end_step with no open record"),
        }
    }

    /// Close the open record as skipped, with a reason
    pub fn end_step_skipped(&mut self, reason: &str, stamp: Stamp) {
        if let Some(record) = self.open_record_mut() {
            record.close(StepStatus::Skipped, stamp);
            record.skip_reason = Some(reason.to_string());
        }
    }

    /// Record a step that was skipped without being started
    pub fn skip_step(&mut self, step: &FlattenedStep, reason: &str, stamp: Stamp) {
        self.auto_close(stamp);
        let mut record = ExecutionRecord::open(step, stamp);
        record.close(StepStatus::Skipped, stamp);
        record.skip_reason = Some(reason.to_string());
        self.records.push(record);
    }

    /// Flag the latest record of a step as modified
    ///
    /// Returns false when the step has no record yet.
    pub fn mark_modified(&mut self, step_index: u32) -> bool {
        match self.latest_record_mut(step_index) {
            Some(record) => {
                record.status = StepStatus::Modified;
                true
            }
            None => false,
        }
    }

    /// Attach a set to the latest record of a step
    pub fn log_set(&mut self, step_index: u32, set: SetRecord) -> bool {
        match self.latest_record_mut(step_index) {
            Some(record) => {
                record.sets.push(set);
                true
            }
            None => {
                tracing::debug!("No record for step {}, set not logged", step_index);
                false
            }
        }
    }

    /// Number of records lacking `ended_at`
    pub fn open_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_open()).count()
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    /// Close any open record and produce the log document
    pub fn build(&mut self, stamp: Stamp) -> ExecutionLogDocument {
        self.auto_close(stamp);

        let mut records = self.records.clone();
        for planned in &self.planned {
            if !records.iter().any(|r| r.step_index == planned.index) {
                records.push(ExecutionRecord::not_reached(planned));
            }
        }
        // Stable: visits to the same step keep their order.
        records.sort_by_key(|r| r.step_index);

        let summary = summarize(&records, self.planned.len());
        ExecutionLogDocument {
            version: EXECUTION_LOG_VERSION,
            records,
            summary,
        }
    }

    pub fn reset(&mut self) {
        self.planned.clear();
        self.records.clear();
    }

    fn auto_close(&mut self, stamp: Stamp) {
        if let Some(record) = self.open_record_mut() {
            tracing::debug!("Auto-closing open record for step {}", record.step_index);
            record.close(StepStatus::Completed, stamp);
        }
    }

    fn open_record_mut(&mut self) -> Option<&mut ExecutionRecord> {
        self.records.iter_mut().rev().find(|r| r.is_open())
    }

    fn latest_record_mut(&mut self, step_index: u32) -> Option<&mut ExecutionRecord> {
        self.records
            .iter_mut()
            .rev()
            .find(|r| r.step_index == step_index)
    }
}

/// Totals over the records of a session
///
/// A step visited more than once has several records. Durations and sets
/// add up across all of them, but each step's status comes from its latest
/// record, so every planned step is counted exactly once.
fn summarize(records: &[ExecutionRecord], planned_steps: usize) -> ExecutionSummary {
    let mut summary = ExecutionSummary::default();
    let mut latest: BTreeMap<u32, StepStatus> = BTreeMap::new();

    for record in records {
        latest.insert(record.step_index, record.status);
        let actual = record.actual_duration_seconds.unwrap_or(0);
        summary.total_actual_seconds += actual;
        if !record.planned_kind.is_low_intensity() {
            summary.active_seconds += actual;
        }
        summary.sets_logged += record.sets.len() as u32;
    }

    for status in latest.values() {
        match status {
            StepStatus::Completed => summary.completed += 1,
            StepStatus::Skipped => summary.skipped += 1,
            StepStatus::Modified => summary.modified += 1,
            StepStatus::NotReached => summary.not_reached += 1,
        }
    }

    // Without a registered plan every distinct step counts.
    let total = if planned_steps > 0 {
        planned_steps
    } else {
        latest.len()
    };
    summary.total_steps = total as u32;
    summary.completion_percentage = if total == 0 {
        0.0
    } else {
        (f64::from(summary.completed) / total as f64 * 1000.0).round() / 10.0
    };

    summary
}
