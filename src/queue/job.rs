use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::Vars,
    engine::{ExecutionOptions, ExecutionRequest},
    status::StatusExtra,
    workflow::Workflow,
};

/// One queued unit of work: a workflow run pinned to a single iteration item.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: String,
    pub team_id: String,
    pub queue_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub plugin_id: String,
    pub plugin_slug: String,
    pub trajectory_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_name: Option<String>,
    pub analysis_id: String,
    #[serde(default)]
    pub user_config: Vars,
    #[serde(default)]
    pub options: ExecutionOptions,
    pub for_each_index: usize,
    #[serde(default)]
    pub for_each_item: Value,
    pub total_items: usize,
    pub timestep: i64,
    /// failed runs so far
    #[serde(default)]
    pub attempts: u32,
}

impl JobDescriptor {
    pub fn to_request(
        &self,
        workflow: Arc<Workflow>,
    ) -> ExecutionRequest {
        let mut request = ExecutionRequest::new(workflow);
        request.plugin_id = self.plugin_id.clone();
        request.plugin_slug = self.plugin_slug.clone();
        request.trajectory_id = self.trajectory_id.clone();
        request.team_id = self.team_id.clone();
        request.analysis_id = self.analysis_id.clone();
        request.user_config = self.user_config.clone();
        request.options = self.options.clone();
        request.for_item(self.for_each_index, self.for_each_item.clone())
    }

    /// Status fields every transition of this job carries.
    pub fn status_extra(&self) -> StatusExtra {
        StatusExtra {
            team_id: self.team_id.clone(),
            queue_type: self.queue_type.clone(),
            trajectory_id: Some(self.trajectory_id.clone()),
            trajectory_name: self.trajectory_name.clone(),
            timestep: Some(self.timestep),
            name: self.name.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_descriptor_wire_form() {
        let job: JobDescriptor = serde_json::from_value(json!({
            "jobId": "j1",
            "teamId": "team",
            "queueType": "analysis",
            "pluginId": "plg",
            "pluginSlug": "demo",
            "trajectoryId": "traj",
            "analysisId": "ana",
            "forEachIndex": 2,
            "forEachItem": {"timestep": 400},
            "totalItems": 3,
            "timestep": 400
        }))
        .unwrap();

        assert_eq!(job.attempts, 0);
        assert!(job.user_config.is_empty());
        let extra = job.status_extra();
        assert_eq!(extra.timestep, Some(400));
        assert_eq!(extra.queue_type, "analysis");
        assert!(serde_json::to_value(&job).unwrap().get("name").is_none());
    }
}
