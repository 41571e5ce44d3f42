use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tracing::trace;

use crate::{
    PlugflowError, Result,
    runtime::ExecutionContext,
    workflow::{
        handlers::NodeHandler,
        node::{Node, NodeType},
    },
};

/// Handler lookup by node type, populated once at startup.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(
        mut self,
        handler: Arc<dyn NodeHandler>,
    ) -> Self {
        self.handlers.insert(handler.node_type(), handler);
        self
    }

    pub fn get(
        &self,
        node_type: NodeType,
    ) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type).cloned()
    }

    /// Run the node's handler and store its output under the node id.
    pub async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let handler = self.handlers.get(&node.node_type).ok_or(PlugflowError::Handler(format!("no handler registered for node type {}", node.node_type)))?;

        trace!("execute node {} ({})", node.id, node.node_type);
        let output = handler.execute(node, ctx).await?;
        ctx.add_output(node.id.clone(), output);
        Ok(())
    }

    /// Output schema of every registered handler, keyed by type string.
    pub fn schemas(&self) -> HashMap<String, Value> {
        self.handlers.iter().map(|(t, h)| (t.to_string(), h.output_schema())).collect()
    }
}
