//! Workout plan input model.
//!
//! The sequencer trusts its input; hosts that load plans from outside call
//! [`WorkoutPlan::validate`] first. `Repeat` is the only recursive node and
//! is always expanded by the sequencer, never executed directly.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One element of the nested workout description
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntervalNode {
    Warmup {
        duration_seconds: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Cooldown {
        duration_seconds: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Timed {
        duration_seconds: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Reps {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sets: Option<u32>,
        reps: u32,
        name: String,
        /// Load in kilograms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        load: Option<f64>,
        /// Absent means manual rest; `0` means no rest at all.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rest_seconds: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
    },
    Distance {
        meters: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Repeat {
        count: u32,
        children: Vec<IntervalNode>,
    },
}

/// A complete workout as handed to the session engine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub intervals: Vec<IntervalNode>,
}

impl WorkoutPlan {
    pub fn new(name: impl Into<String>, intervals: Vec<IntervalNode>) -> Self {
        Self {
            id: None,
            name: name.into(),
            intervals,
        }
    }

    /// Load a plan from a `.json` or `.toml` file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let plan = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            other => {
                return Err(Error::Plan(format!(
                    "Unsupported plan format {:?} for {:?}",
                    other, path
                )))
            }
        };
        tracing::debug!("Loaded plan from {:?}", path);
        Ok(plan)
    }

    /// Check the plan for structural problems
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("Plan has empty name".to_string());
        }
        validate_nodes(&self.name, &self.intervals, &mut errors);
        errors
    }
}

fn validate_nodes(plan: &str, nodes: &[IntervalNode], errors: &mut Vec<String>) {
    for node in nodes {
        match node {
            IntervalNode::Warmup {
                duration_seconds, ..
            }
            | IntervalNode::Cooldown {
                duration_seconds, ..
            }
            | IntervalNode::Timed {
                duration_seconds, ..
            } => {
                if *duration_seconds == 0 {
                    errors.push(format!("Plan '{}': timed interval has zero duration", plan));
                }
            }
            IntervalNode::Reps {
                name, reps, sets, ..
            } => {
                if name.trim().is_empty() {
                    errors.push(format!("Plan '{}': exercise has empty name", plan));
                }
                if *reps == 0 {
                    errors.push(format!("Plan '{}': '{}' has zero reps", plan, name));
                }
                if *sets == Some(0) {
                    errors.push(format!("Plan '{}': '{}' has zero sets", plan, name));
                }
            }
            IntervalNode::Distance { meters, .. } => {
                if *meters == 0 {
                    errors.push(format!("Plan '{}': distance interval of 0 m", plan));
                }
            }
            IntervalNode::Repeat { count, children } => {
                if *count == 0 {
                    errors.push(format!("Plan '{}': repeat with zero count", plan));
                }
                if children.is_empty() {
                    errors.push(format!("Plan '{}': repeat with no children", plan));
                }
                validate_nodes(plan, children, errors);
            }
        }
    }
}
