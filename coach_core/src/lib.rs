#![forbid(unsafe_code)]

//! Core domain model and session logic for the guided workout coach.
//!
//! This crate provides:
//! - Workout plans and the step sequencer that flattens them
//! - The session engine state machine and its serialized runner
//! - Execution logging and completion reports
//! - The offline completion queue and its persistence
//! - Configuration and logging

pub mod types;
pub mod error;
pub mod plan;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod clock;
pub mod sequencer;
pub mod execution_log;
pub mod commands;
pub mod broadcast;
pub mod health;
pub mod cues;
pub mod report;
pub mod persist;
pub mod progress;
pub mod outbox;
pub mod queue;
pub mod engine;
pub mod runner;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use plan::{IntervalNode, WorkoutPlan};
pub use catalog::get_builtin_plan;
pub use config::Config;
pub use sequencer::flatten;
pub use execution_log::{ExecutionLogAccumulator, ExecutionLogDocument, StepStatus};
pub use commands::{Acknowledgment, RemoteCommand};
pub use report::{CompletionReport, ReportSink, SubmitOutcome};
pub use queue::{CompletionQueue, PendingStore};
pub use engine::{Collaborators, EngineConfig, SessionEngine, SetEntry};
pub use runner::{SessionEvent, SessionRunner};
