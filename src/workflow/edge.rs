//! Workflow edge definitions for connecting nodes.
//!
//! Edges only carry ordering; the optional source handle distinguishes the
//! `output-true` / `output-false` ports of an if-statement.

use serde::{Deserialize, Serialize};

use crate::{model::EdgeModel, workflow::node::NodeId};

/// Unique identifier for an edge within a workflow.
pub type EdgeId = String;

/// Runtime edge representation connecting two nodes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    /// Which output port of the source this edge leaves from.
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
}

impl Edge {
    /// True when the edge leaves its source through `handle`.
    pub fn leaves_through(
        &self,
        handle: &str,
    ) -> bool {
        self.source_handle.as_deref() == Some(handle)
    }
}

impl From<&EdgeModel> for Edge {
    fn from(model: &EdgeModel) -> Self {
        Self {
            id: model.id.clone(),
            source: model.source.clone(),
            target: model.target.clone(),
            source_handle: model.source_handle.clone(),
            target_handle: model.target_handle.clone(),
        }
    }
}
