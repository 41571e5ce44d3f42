use std::collections::HashMap;

use serde::Serialize;

use crate::status::{JobStatus, JobStatusRecord};

const UNKNOWN_TRAJECTORY: &str = "unknown";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GroupStatus {
    Running,
    Queued,
    Completed,
    Failed,
    Partial,
}

impl GroupStatus {
    /// running > queued/retrying > all completed > failed with no completion > partial
    pub fn of(jobs: &[JobStatusRecord]) -> Self {
        let has = |status: JobStatus| jobs.iter().any(|j| j.status == status);

        if has(JobStatus::Running) {
            GroupStatus::Running
        } else if has(JobStatus::Queued) || has(JobStatus::Retrying) {
            GroupStatus::Queued
        } else if jobs.iter().all(|j| j.status == JobStatus::Completed) {
            GroupStatus::Completed
        } else if has(JobStatus::Failed) && !has(JobStatus::Completed) {
            GroupStatus::Failed
        } else {
            GroupStatus::Partial
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameJobGroup {
    pub timestep: i64,
    pub jobs: Vec<JobStatusRecord>,
    pub overall_status: GroupStatus,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryJobGroup {
    pub trajectory_id: String,
    pub trajectory_name: Option<String>,
    pub frame_groups: Vec<FrameJobGroup>,
    pub latest_timestamp: String,
    pub overall_status: GroupStatus,
    pub completed_count: usize,
    pub total_count: usize,
}

fn sort_newest_first(jobs: &mut [JobStatusRecord]) {
    jobs.sort_by_key(|j| std::cmp::Reverse(j.timestamp_millis()));
}

fn group_by_frame(jobs: &[JobStatusRecord]) -> Vec<FrameJobGroup> {
    let mut frames: HashMap<i64, Vec<JobStatusRecord>> = HashMap::new();
    for job in jobs {
        frames.entry(job.timestep.unwrap_or(0)).or_default().push(job.clone());
    }

    let mut groups: Vec<FrameJobGroup> = frames
        .into_iter()
        .map(|(timestep, mut jobs)| {
            sort_newest_first(&mut jobs);
            FrameJobGroup {
                timestep,
                overall_status: GroupStatus::of(&jobs),
                jobs,
            }
        })
        .collect();
    groups.sort_by_key(|g| std::cmp::Reverse(g.timestep));
    groups
}

/// Deduplicate by job id (newest record wins) and group trajectory -> frame -> jobs.
pub fn group_by_trajectory(records: Vec<JobStatusRecord>) -> Vec<TrajectoryJobGroup> {
    let mut latest: HashMap<String, JobStatusRecord> = HashMap::new();
    for record in records {
        match latest.get(&record.job_id) {
            Some(prev) if prev.timestamp_millis() >= record.timestamp_millis() => {}
            _ => {
                latest.insert(record.job_id.clone(), record);
            }
        }
    }

    let mut trajectories: HashMap<String, Vec<JobStatusRecord>> = HashMap::new();
    for record in latest.into_values() {
        let key = record.trajectory_id.clone().unwrap_or_else(|| UNKNOWN_TRAJECTORY.to_string());
        trajectories.entry(key).or_default().push(record);
    }

    let mut groups: Vec<TrajectoryJobGroup> = trajectories
        .into_iter()
        .map(|(trajectory_id, mut jobs)| {
            sort_newest_first(&mut jobs);
            TrajectoryJobGroup {
                trajectory_id,
                trajectory_name: jobs.iter().find_map(|j| j.trajectory_name.clone()),
                frame_groups: group_by_frame(&jobs),
                latest_timestamp: jobs.first().map(|j| j.timestamp.clone()).unwrap_or_default(),
                overall_status: GroupStatus::of(&jobs),
                completed_count: jobs.iter().filter(|j| j.status == JobStatus::Completed).count(),
                total_count: jobs.len(),
            }
        })
        .collect();
    groups.sort_by_key(|g| std::cmp::Reverse(chrono::DateTime::parse_from_rfc3339(&g.latest_timestamp).map(|t| t.timestamp_millis()).unwrap_or(0)));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        job_id: &str,
        status: JobStatus,
        trajectory: Option<&str>,
        timestep: Option<i64>,
        second: u32,
    ) -> JobStatusRecord {
        JobStatusRecord {
            job_id: job_id.to_string(),
            status,
            team_id: "team".to_string(),
            trajectory_id: trajectory.map(String::from),
            trajectory_name: None,
            timestep,
            queue_type: "analysis".to_string(),
            progress: 0.0,
            timestamp: format!("2026-01-01T00:00:{:02}.000Z", second),
            name: None,
            message: None,
            error: None,
            result: None,
        }
    }

    #[test]
    fn test_group_status_priority() {
        use JobStatus::*;
        let of = |statuses: &[JobStatus]| GroupStatus::of(&statuses.iter().enumerate().map(|(i, s)| record(&i.to_string(), *s, None, None, 0)).collect::<Vec<_>>());

        assert_eq!(of(&[Running, Failed, Queued]), GroupStatus::Running);
        assert_eq!(of(&[Retrying, Completed]), GroupStatus::Queued);
        assert_eq!(of(&[Queued, Failed]), GroupStatus::Queued);
        assert_eq!(of(&[Completed, Completed]), GroupStatus::Completed);
        assert_eq!(of(&[Failed, Failed]), GroupStatus::Failed);
        assert_eq!(of(&[Failed, Completed]), GroupStatus::Partial);
    }

    #[test]
    fn test_group_by_trajectory() {
        let groups = group_by_trajectory(vec![
            record("1", JobStatus::Running, Some("t1"), Some(10), 1),
            // a newer record of the same job replaces the older one
            record("1", JobStatus::Completed, Some("t1"), Some(10), 5),
            record("2", JobStatus::Failed, Some("t1"), Some(20), 3),
            record("3", JobStatus::Completed, Some("t2"), None, 9),
            record("4", JobStatus::Queued, None, Some(0), 2),
        ]);

        assert_eq!(groups.iter().map(|g| g.trajectory_id.as_str()).collect::<Vec<_>>(), vec!["t2", "t1", "unknown"]);

        let t1 = &groups[1];
        assert_eq!(t1.total_count, 2);
        assert_eq!(t1.completed_count, 1);
        assert_eq!(t1.overall_status, GroupStatus::Partial);
        assert_eq!(t1.latest_timestamp, "2026-01-01T00:00:05.000Z");
        assert_eq!(t1.frame_groups.iter().map(|f| f.timestep).collect::<Vec<_>>(), vec![20, 10]);
        assert_eq!(t1.frame_groups[1].jobs[0].status, JobStatus::Completed);

        assert_eq!(groups[0].frame_groups[0].timestep, 0);
        assert_eq!(groups[2].overall_status, GroupStatus::Queued);
    }
}
