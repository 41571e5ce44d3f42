use std::{sync::Arc, time::Duration};

use globset::Glob;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::{debug, warn};

use crate::{
    PlugflowError, Result,
    common::BroadcastQueue,
    config::StatusConfig,
    status::{JobStatus, JobStatusRecord, StatusExtra, TrajectoryJobGroup, group_by_trajectory},
    store::StatusStore,
    utils,
};

const NOTIFY_CAPACITY: usize = 1024;

/// Writes status records with a TTL and fans them out to live subscribers.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn StatusStore>,
    notify: Arc<BroadcastQueue<JobStatusRecord>>,
    queue_type: String,
    queue_types: Vec<String>,
    ttl: Duration,
}

impl StatusTracker {
    pub fn new(
        store: Arc<dyn StatusStore>,
        queue_type: &str,
        config: &StatusConfig,
    ) -> Self {
        Self {
            store,
            notify: BroadcastQueue::new(NOTIFY_CAPACITY),
            queue_type: queue_type.to_string(),
            queue_types: config.queue_types.clone(),
            ttl: Duration::from_secs(config.ttl_seconds),
        }
    }

    pub fn status_key(
        queue_type: &str,
        job_id: &str,
    ) -> String {
        format!("{}:status:{}", queue_type, job_id)
    }

    pub fn team_key(team_id: &str) -> String {
        format!("team:{}:jobs", team_id)
    }

    pub async fn set_status(
        &self,
        job_id: &str,
        status: JobStatus,
        extra: StatusExtra,
    ) -> Result<JobStatusRecord> {
        let queue_type = if extra.queue_type.is_empty() { self.queue_type.clone() } else { extra.queue_type };
        let record = JobStatusRecord {
            job_id: job_id.to_string(),
            status,
            team_id: extra.team_id,
            trajectory_id: extra.trajectory_id,
            trajectory_name: extra.trajectory_name,
            timestep: extra.timestep,
            queue_type,
            progress: extra.progress,
            timestamp: utils::time::time_iso(),
            name: extra.name,
            message: extra.message,
            error: extra.error,
            result: extra.result,
        };

        self.store.set_with_expiry(&Self::status_key(&record.queue_type, job_id), serde_json::to_string(&record)?, self.ttl).await?;
        self.store.add_to_set(&Self::team_key(&record.team_id), job_id).await?;
        debug!("job {} -> {}", job_id, status);

        self.notify.send(record.clone());
        Ok(record)
    }

    pub async fn get_status(
        &self,
        queue_type: &str,
        job_id: &str,
    ) -> Result<Option<JobStatusRecord>> {
        match self.store.get(&Self::status_key(queue_type, job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Live records whose team id matches the glob `pattern`.
    pub fn subscribe(
        &self,
        pattern: &str,
    ) -> Result<impl Stream<Item = JobStatusRecord> + Send + 'static> {
        let matcher = Glob::new(pattern).map_err(|e| PlugflowError::Runtime(format!("bad subscription pattern '{}': {}", pattern, e)))?.compile_matcher();

        Ok(BroadcastStream::new(self.notify.subscribe()).filter_map(move |record| match record {
            Ok(record) if matcher.is_match(&record.team_id) => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!("status subscriber lagged: {}", e);
                None
            }
        }))
    }

    /// Every job of the team across all registered queue types, grouped.
    pub async fn get_grouped_jobs_for_team(
        &self,
        team_id: &str,
    ) -> Result<Vec<TrajectoryJobGroup>> {
        if team_id.is_empty() {
            return Ok(Vec::new());
        }

        let job_ids = self.store.set_members(&Self::team_key(team_id)).await?;
        let mut records = Vec::new();
        for queue_type in &self.queue_types {
            for job_id in &job_ids {
                let Some(raw) = self.store.get(&Self::status_key(queue_type, job_id)).await? else {
                    continue;
                };
                match serde_json::from_str::<JobStatusRecord>(&raw) {
                    Ok(record) if record.team_id == team_id => records.push(record),
                    Ok(_) => {}
                    Err(e) => warn!("skip unreadable status {}: {}", job_id, e),
                }
            }
        }

        Ok(group_by_trajectory(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{status::GroupStatus, store::MemStatusStore};

    fn tracker() -> StatusTracker {
        StatusTracker::new(Arc::new(MemStatusStore::new()), "analysis", &StatusConfig::default())
    }

    fn extra(
        team_id: &str,
        trajectory_id: &str,
    ) -> StatusExtra {
        StatusExtra {
            team_id: team_id.to_string(),
            trajectory_id: Some(trajectory_id.to_string()),
            timestep: Some(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_set_and_get_status() {
        let tracker = tracker();
        tracker.set_status("j1", JobStatus::Queued, extra("team", "t1")).await.unwrap();
        let record = tracker.set_status("j1", JobStatus::Running, extra("team", "t1")).await.unwrap();
        assert_eq!(record.queue_type, "analysis");

        let stored = tracker.get_status("analysis", "j1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.timestep, Some(5));
        assert!(tracker.get_status("rasterizer", "j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_filters_by_team() {
        let tracker = tracker();
        let mut stream = Box::pin(tracker.subscribe("team-a*").unwrap());

        tracker.set_status("j1", JobStatus::Queued, extra("team-b", "t1")).await.unwrap();
        tracker.set_status("j2", JobStatus::Completed, extra("team-a1", "t1")).await.unwrap();

        let record = stream.next().await.unwrap();
        assert_eq!(record.job_id, "j2");
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_grouped_jobs_span_queue_types() {
        let tracker = tracker();
        tracker.set_status("j1", JobStatus::Completed, extra("team", "t1")).await.unwrap();
        let rasterizer = StatusExtra {
            queue_type: "rasterizer".to_string(),
            ..extra("team", "t1")
        };
        tracker.set_status("j2", JobStatus::Failed, rasterizer).await.unwrap();
        tracker.set_status("j3", JobStatus::Running, extra("other", "t1")).await.unwrap();

        let groups = tracker.get_grouped_jobs_for_team("team").await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].total_count, 2);
        assert_eq!(groups[0].overall_status, GroupStatus::Partial);
        assert!(tracker.get_grouped_jobs_for_team("").await.unwrap().is_empty());
    }
}
