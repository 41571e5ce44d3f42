use std::{collections::HashMap, path::PathBuf, sync::Arc};

use serde_json::Value;

use crate::{
    common::Vars,
    workflow::{Workflow, node::NodeId},
};

/// Job-scoped execution state.
///
/// Created fresh for every plan or job call and owned by exactly one task;
/// handlers read their ancestors' outputs from it and write their own.
pub struct ExecutionContext {
    outputs: HashMap<NodeId, Vars>,
    generated_files: Vec<PathBuf>,

    pub user_config: Vars,
    pub trajectory_id: String,
    pub plugin_id: String,
    pub plugin_slug: String,
    pub team_id: String,
    pub analysis_id: String,
    pub selected_frame_only: bool,
    pub selected_timestep: Option<i64>,
    pub workflow: Arc<Workflow>,
}

impl ExecutionContext {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self {
            outputs: HashMap::new(),
            generated_files: Vec::new(),
            user_config: Vars::new(),
            trajectory_id: String::new(),
            plugin_id: String::new(),
            plugin_slug: String::new(),
            team_id: String::new(),
            analysis_id: String::new(),
            selected_frame_only: false,
            selected_timestep: None,
            workflow,
        }
    }

    pub fn outputs(&self) -> &HashMap<NodeId, Vars> {
        &self.outputs
    }

    pub fn output(
        &self,
        nid: &str,
    ) -> Option<&Vars> {
        self.outputs.get(nid)
    }

    pub fn output_mut(
        &mut self,
        nid: &str,
    ) -> Option<&mut Vars> {
        self.outputs.get_mut(nid)
    }

    pub fn add_output(
        &mut self,
        nid: NodeId,
        outputs: Vars,
    ) {
        self.outputs.insert(nid, outputs);
    }

    /// Record a locally materialized artifact; purged when the job ends.
    pub fn track_file(
        &mut self,
        path: PathBuf,
    ) {
        if !self.generated_files.contains(&path) {
            self.generated_files.push(path);
        }
    }

    pub fn generated_files(&self) -> &[PathBuf] {
        &self.generated_files
    }

    pub fn take_generated_files(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.generated_files)
    }
}

/// Frame number of an iteration item.
///
/// Uses the item's `timestep`, then its `frame`, then the item itself when
/// it is a number, and finally its position in the iteration set.
pub fn frame_of(
    item: &Value,
    index: usize,
) -> i64 {
    fn as_frame(value: &Value) -> Option<i64> {
        value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
    }

    item.get("timestep").and_then(as_frame).or_else(|| item.get("frame").and_then(as_frame)).or_else(|| as_frame(item)).unwrap_or(index as i64)
}
