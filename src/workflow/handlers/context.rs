use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    Result,
    common::Vars,
    runtime::ExecutionContext,
    store::DumpSource,
    workflow::{
        consts::{CONTEXT_TRAJECTORY_DUMPS, FOR_EACH_COUNT},
        handlers::{NodeHandler, mismatched},
        node::{ContextSource, Node, NodeData, NodeType},
    },
};

/// Loads the data the workflow iterates over.
pub struct ContextHandler {
    dumps: Arc<dyn DumpSource>,
}

impl ContextHandler {
    pub fn new(dumps: Arc<dyn DumpSource>) -> Self {
        Self {
            dumps,
        }
    }
}

#[async_trait]
impl NodeHandler for ContextHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Context
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "trajectory_dumps": { "type": "array" },
                "count": { "type": "integer" }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::Context(data) = &node.data else {
            return Err(mismatched(node, NodeType::Context));
        };

        match data.source {
            ContextSource::TrajectoryDumps => {
                let dumps = self.dumps.list_dumps(&ctx.trajectory_id).await?;
                Ok(Vars::new().with(FOR_EACH_COUNT, dumps.len()).with(CONTEXT_TRAJECTORY_DUMPS, dumps))
            }
        }
    }
}
