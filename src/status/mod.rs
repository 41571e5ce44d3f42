//! Durable job status records.
//!
//! Records outlive the worker that produced them, so a job whose worker
//! crashed still shows its last known state.

mod group;
mod tracker;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use group::{FrameJobGroup, GroupStatus, TrajectoryJobGroup, group_by_trajectory};
pub use tracker::StatusTracker;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
}

/// What a status store holds for one job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestep: Option<i64>,
    pub queue_type: String,
    #[serde(default)]
    pub progress: f64,
    /// RFC 3339
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl JobStatusRecord {
    /// Milliseconds since the epoch, 0 when the timestamp does not parse.
    pub fn timestamp_millis(&self) -> i64 {
        chrono::DateTime::parse_from_rfc3339(&self.timestamp).map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

/// Optional fields carried along with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusExtra {
    pub team_id: String,
    /// falls back to the tracker's own queue type when empty
    pub queue_type: String,
    pub trajectory_id: Option<String>,
    pub trajectory_name: Option<String>,
    pub timestep: Option<i64>,
    pub name: Option<String>,
    pub progress: f64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<Value>,
}
