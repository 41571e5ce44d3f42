//! Workflow execution engine.
//!
//! Two context-scoped entry points:
//! - `plan_execution_strategy` runs the graph up to the first ForEach that
//!   yields items and reports the iteration set
//! - `execute_workflow_job` runs the whole graph for one injected item,
//!   pruning untaken IfStatement branches, and collects exposure results
//!
//! Neither call shares mutable state with another; parallelism comes from
//! running many jobs in separate workers.

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    Result,
    common::Vars,
    runtime::ExecutionContext,
    workflow::{
        Workflow,
        consts::{BRANCH_FALSE, BRANCH_TRUE, FOR_EACH_CURRENT_INDEX, FOR_EACH_CURRENT_VALUE, FOR_EACH_ITEMS, IF_STATEMENT_RESULT, RESULTS, SCHEMA_DEFINITION},
        handlers::NodeRegistry,
        node::{ExportType, ExporterKind, NodeData, NodeId, NodeType},
    },
};

pub use crate::runtime::frame_of;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default)]
    pub selected_frame_only: bool,
    #[serde(default)]
    pub timestep: Option<i64>,
}

/// Everything one plan or job call needs.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub workflow: Arc<Workflow>,
    pub plugin_id: String,
    pub plugin_slug: String,
    pub trajectory_id: String,
    pub team_id: String,
    pub analysis_id: String,
    pub user_config: Vars,
    pub options: ExecutionOptions,
    pub current_iteration_index: Option<usize>,
    pub current_iteration_item: Option<Value>,
}

impl ExecutionRequest {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self {
            workflow,
            plugin_id: String::new(),
            plugin_slug: String::new(),
            trajectory_id: String::new(),
            team_id: String::new(),
            analysis_id: String::new(),
            user_config: Vars::new(),
            options: ExecutionOptions::default(),
            current_iteration_index: None,
            current_iteration_item: None,
        }
    }

    /// The same request pinned to one item of the iteration set.
    pub fn for_item(
        &self,
        index: usize,
        item: Value,
    ) -> Self {
        let mut request = self.clone();
        request.current_iteration_index = Some(index);
        request.current_iteration_item = Some(item);
        request
    }

    fn context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(self.workflow.clone());
        ctx.user_config = self.user_config.clone();
        ctx.trajectory_id = self.trajectory_id.clone();
        ctx.plugin_id = self.plugin_id.clone();
        ctx.plugin_slug = self.plugin_slug.clone();
        ctx.team_id = self.team_id.clone();
        ctx.analysis_id = self.analysis_id.clone();
        ctx.selected_frame_only = self.options.selected_frame_only;
        ctx.selected_timestep = self.options.timestep;
        ctx
    }
}

/// The iteration set discovered by planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlanResult {
    pub items: Vec<Value>,
    pub for_each_node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureExport {
    pub exporter: ExporterKind,
    #[serde(rename = "type")]
    pub export_type: ExportType,
    pub object_path: Option<String>,
}

/// Summary of one exposure node at the end of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureResult {
    pub exposure_name: String,
    pub node_id: NodeId,
    /// data of the first item that did not fail
    pub data: Option<Value>,
    pub schema: Option<Value>,
    pub visualizers: Option<Value>,
    pub export: Option<ExposureExport>,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    registry: NodeRegistry,
}

impl WorkflowEngine {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Runs nodes in order until a ForEach produces a non-empty `items`.
    ///
    /// `None` means there is nothing to schedule.
    pub async fn plan_execution_strategy(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Option<ExecutionPlanResult>> {
        request.workflow.validate()?;
        let mut ctx = request.context();
        info!("planning workflow {} for plugin {}", request.workflow.id(), request.plugin_slug);

        let workflow = request.workflow.clone();
        for node in workflow.topological_sort() {
            self.registry.execute(node, &mut ctx).await?;

            if node.node_type != NodeType::ForEach {
                continue;
            }
            if let Some(items) = ctx.output(&node.id).and_then(|o| o.get::<Vec<Value>>(FOR_EACH_ITEMS))
                && !items.is_empty()
            {
                info!("foreach {} yields {} items", node.id, items.len());
                cleanup(ctx.take_generated_files()).await;
                return Ok(Some(ExecutionPlanResult {
                    items,
                    for_each_node_id: node.id.clone(),
                }));
            }
        }

        warn!("workflow {} produced no items to process", request.workflow.id());
        cleanup(ctx.take_generated_files()).await;
        Ok(None)
    }

    /// Runs the whole graph for the request's iteration item.
    ///
    /// Generated files are removed whether the job succeeds or fails.
    pub async fn execute_workflow_job(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Vec<ExposureResult>> {
        request.workflow.validate()?;
        let mut ctx = request.context();
        info!("job start {} [index {:?}]", request.plugin_slug, request.current_iteration_index);

        let outcome = self.run_job(&mut ctx, request).await;
        cleanup(ctx.take_generated_files()).await;

        match outcome {
            Ok(()) => Ok(collect_exposure_results(&request.workflow, &ctx)),
            Err(e) => {
                error!("job failed {} [index {:?}]: {}", request.plugin_slug, request.current_iteration_index, e);
                Err(e)
            }
        }
    }

    async fn run_job(
        &self,
        ctx: &mut ExecutionContext,
        request: &ExecutionRequest,
    ) -> Result<()> {
        let workflow = request.workflow.clone();
        let mut skip: HashSet<NodeId> = HashSet::new();

        for node in workflow.topological_sort() {
            if skip.contains(&node.id) {
                continue;
            }

            self.registry.execute(node, ctx).await?;

            match node.node_type {
                NodeType::ForEach => {
                    if let Some(index) = request.current_iteration_index
                        && let Some(output) = ctx.output_mut(&node.id)
                    {
                        output.set(FOR_EACH_CURRENT_VALUE, request.current_iteration_item.clone().unwrap_or(Value::Null));
                        output.set(FOR_EACH_CURRENT_INDEX, index);
                    }
                }
                NodeType::IfStatement => {
                    let passed = ctx.output(&node.id).and_then(|o| o.get::<bool>(IF_STATEMENT_RESULT)).unwrap_or(false);
                    let branch = if passed { BRANCH_FALSE } else { BRANCH_TRUE };
                    let pruned = workflow.find_descendant_nodes_on_branch(&node.id, branch);
                    debug!("if-statement {} is {}; skipping {} nodes on '{}'", node.id, passed, pruned.len(), branch);
                    skip.extend(pruned);
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn collect_exposure_results(
    workflow: &Workflow,
    ctx: &ExecutionContext,
) -> Vec<ExposureResult> {
    let mut results = Vec::new();

    for node in workflow.nodes_of_type(NodeType::Exposure) {
        let NodeData::Exposure(exposure) = &node.data else {
            continue;
        };
        let Some(items) = ctx.output(&node.id).and_then(|o| o.get::<Vec<Value>>(RESULTS)) else {
            continue;
        };

        let first_success = items.iter().find(|item| item.get("error").is_none());
        let output_of = |node_type: NodeType| workflow.find_descendant_by_type(&node.id, node_type).and_then(|n| ctx.output(&n.id));

        let export = workflow.find_descendant_by_type(&node.id, NodeType::Export).and_then(|n| match &n.data {
            NodeData::Export(data) => Some(ExposureExport {
                exporter: data.exporter,
                export_type: data.export_type,
                object_path: ctx
                    .output(&n.id)
                    .and_then(|o| o.get_value(RESULTS))
                    .and_then(|r| r.get(0))
                    .and_then(|r| r.get("objectPath"))
                    .and_then(|p| p.as_str())
                    .map(String::from),
            }),
            _ => None,
        });

        results.push(ExposureResult {
            exposure_name: exposure.name.clone(),
            node_id: node.id.clone(),
            data: first_success.and_then(|item| item.get("data").cloned()),
            schema: output_of(NodeType::Schema).and_then(|o| o.get_value(SCHEMA_DEFINITION).cloned()),
            visualizers: output_of(NodeType::Visualizers).map(|o| Value::from(o.clone())),
            export,
        });
    }

    results
}

/// Best-effort removal; a missing path is not an error.
async fn cleanup(files: Vec<PathBuf>) {
    if files.is_empty() {
        return;
    }
    let removals = files.into_iter().map(|path| async move {
        if tokio::fs::remove_file(&path).await.is_err() {
            let _ = tokio::fs::remove_dir_all(&path).await;
        }
    });
    futures::future::join_all(removals).await;
}
