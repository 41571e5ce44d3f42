use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{
    Result,
    common::MemCache,
    engine::WorkflowEngine,
    pool::{JobRunner, ProgressReporter},
    queue::JobDescriptor,
    store::WorkflowProvider,
    workflow::Workflow,
};

const WORKFLOW_CACHE_SIZE: usize = 256;

/// What every worker executes: load the plugin's workflow and run one job of it.
#[derive(Clone)]
pub struct WorkflowJobRunner {
    engine: WorkflowEngine,
    workflows: Arc<dyn WorkflowProvider>,
    cache: MemCache<String, Arc<Workflow>>,
}

impl WorkflowJobRunner {
    pub fn new(
        engine: WorkflowEngine,
        workflows: Arc<dyn WorkflowProvider>,
    ) -> Self {
        Self {
            engine,
            workflows,
            cache: MemCache::new(WORKFLOW_CACHE_SIZE),
        }
    }

    async fn workflow(
        &self,
        plugin_id: &str,
    ) -> Result<Arc<Workflow>> {
        if let Some(workflow) = self.cache.get(&plugin_id.to_string()) {
            return Ok(workflow);
        }

        let model = self.workflows.load(plugin_id).await?;
        let workflow = Arc::new(Workflow::try_from(&model)?);
        debug!("cached workflow {} of plugin {}", workflow.id(), plugin_id);
        self.cache.set(plugin_id.to_string(), workflow.clone());
        Ok(workflow)
    }

    /// Drop the cached workflow of a plugin after it was redeployed.
    pub fn invalidate(
        &self,
        plugin_id: &str,
    ) {
        self.cache.remove(&plugin_id.to_string());
    }
}

#[async_trait]
impl JobRunner for WorkflowJobRunner {
    async fn run(
        &self,
        job: &JobDescriptor,
        reporter: &ProgressReporter,
    ) -> Result<Value> {
        reporter.report(0.0, "loading workflow");
        let workflow = self.workflow(&job.plugin_id).await?;

        reporter.report(10.0, "executing workflow");
        let results = self.engine.execute_workflow_job(&job.to_request(workflow)).await?;

        reporter.report(100.0, "done");
        Ok(serde_json::to_value(results)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        EngineBuilder, PlugflowError, WorkflowModel,
        pool::{WorkerEvent, WorkerMessage},
        store::MemWorkflowProvider,
    };

    fn model(id: &str) -> WorkflowModel {
        serde_json::from_value(json!({
            "id": id,
            "nodes": [{"id": "args", "type": "arguments", "data": {"arguments": []}}],
            "edges": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_runner_caches_until_invalidated() {
        let provider = Arc::new(MemWorkflowProvider::new());
        provider.deploy("plg", model("v1"));
        let runner = WorkflowJobRunner::new(EngineBuilder::new().build().unwrap(), provider.clone());

        assert_eq!(runner.workflow("plg").await.unwrap().id(), "v1");
        provider.deploy("plg", model("v2"));
        assert_eq!(runner.workflow("plg").await.unwrap().id(), "v1");

        runner.invalidate("plg");
        assert_eq!(runner.workflow("plg").await.unwrap().id(), "v2");

        assert!(matches!(runner.workflow("missing").await, Err(PlugflowError::Workflow(_))));
    }

    #[tokio::test]
    async fn test_run_reports_progress() {
        let provider = Arc::new(MemWorkflowProvider::new());
        provider.deploy("plg", model("wf"));
        let runner = WorkflowJobRunner::new(EngineBuilder::new().build().unwrap(), provider);

        let (tx, rx) = flume::unbounded();
        let reporter = ProgressReporter::new(0, "j1", tx);
        let job = JobDescriptor {
            job_id: "j1".to_string(),
            plugin_id: "plg".to_string(),
            ..Default::default()
        };

        // no exposure nodes, nothing to collect
        let value = runner.run(&job, &reporter).await.unwrap();
        assert_eq!(value, json!([]));

        let progress: Vec<f64> = rx
            .drain()
            .filter_map(|event| match event {
                WorkerEvent::Message {
                    message: WorkerMessage {
                        progress, ..
                    },
                    ..
                } => Some(progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![0.0, 10.0, 100.0]);
    }
}
