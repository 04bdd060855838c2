//! Health metrics collaborator.
//!
//! Heart rate and calories come from whatever health platform the host
//! integrates with. Simulated sessions use a synthetic source instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct HealthMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_calories: Option<f64>,
}

pub trait HealthMetricsSource: Send {
    /// Called when a session starts so the source can begin collecting
    fn session_started(&mut self, _at: DateTime<Utc>) {}

    /// Metrics for a finished session of `duration_seconds` session time
    fn collect(&mut self, started_at: DateTime<Utc>, duration_seconds: u32) -> HealthMetrics;
}

/// Source for hosts without health data
#[derive(Debug, Default)]
pub struct NoHealthData;

impl HealthMetricsSource for NoHealthData {
    fn collect(&mut self, _started_at: DateTime<Utc>, _duration_seconds: u32) -> HealthMetrics {
        HealthMetrics::default()
    }
}

/// Deterministic metrics for simulated sessions
#[derive(Debug, Default)]
pub struct SyntheticHealthSource;

impl HealthMetricsSource for SyntheticHealthSource {
    fn collect(&mut self, _started_at: DateTime<Utc>, duration_seconds: u32) -> HealthMetrics {
        let minutes = f64::from(duration_seconds) / 60.0;
        HealthMetrics {
            avg_heart_rate: Some(128),
            max_heart_rate: Some(162),
            active_calories: Some((minutes * 9.5 * 10.0).round() / 10.0),
        }
    }
}
