use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use tracing::trace;

use crate::{PlugflowError, Result, ShareLock, model::WorkflowModel, store::WorkflowProvider};

/// Workflow definitions deployed per plugin id.
#[derive(Debug, Clone, Default)]
pub struct MemWorkflowProvider {
    workflows: ShareLock<HashMap<String, WorkflowModel>>,
}

impl MemWorkflowProvider {
    pub fn new() -> Self {
        Self {
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store (or replace) the workflow of `plugin_id`. Returns true when it replaced one.
    pub fn deploy(
        &self,
        plugin_id: &str,
        workflow: WorkflowModel,
    ) -> bool {
        trace!("deploy workflow for plugin {}", plugin_id);
        self.workflows.write().unwrap().insert(plugin_id.to_string(), workflow).is_some()
    }
}

#[async_trait]
impl WorkflowProvider for MemWorkflowProvider {
    async fn load(
        &self,
        plugin_id: &str,
    ) -> Result<WorkflowModel> {
        self.workflows.read().unwrap().get(plugin_id).cloned().ok_or(PlugflowError::Workflow(format!("no workflow deployed for plugin {}", plugin_id)))
    }
}
