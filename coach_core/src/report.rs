//! Completion report handed off when a session ends.

use crate::execution_log::ExecutionLogDocument;
use crate::health::HealthMetrics;
use crate::plan::WorkoutPlan;
use crate::types::EndReason;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// One logged set, flattened for the backend's set history
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetLog {
    pub step_index: u32,
    pub exercise: String,
    pub set_number: Option<u32>,
    pub reps_completed: Option<u32>,
    pub weight: Option<f64>,
    pub rpe: Option<u8>,
    pub logged_at: DateTime<Utc>,
}

/// Summary of a finished session, destined for remote delivery
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletionReport {
    pub session_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub end_reason: EndReason,
    pub health: HealthMetrics,
    /// Lets the backend offer "repeat this session"
    pub plan_snapshot: WorkoutPlan,
    pub execution_log: ExecutionLogDocument,
    pub set_logs: Vec<SetLog>,
    pub simulated: bool,
}

/// What happened to a submitted report
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted by the endpoint right away
    Delivered,
    /// Network unavailable; stored for a later retry pass
    Queued,
    /// Not paired or not authorized; never retried
    Dropped { reason: String },
}

/// Accepts completion reports from the session engine
pub trait ReportSink: Send + Sync {
    fn submit(&self, report: CompletionReport) -> Result<SubmitOutcome>;
}

impl<T: ReportSink + ?Sized> ReportSink for Arc<T> {
    fn submit(&self, report: CompletionReport) -> Result<SubmitOutcome> {
        (**self).submit(report)
    }
}
