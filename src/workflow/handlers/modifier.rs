use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    Result,
    common::Vars,
    runtime::ExecutionContext,
    workflow::{
        handlers::{NodeHandler, mismatched},
        node::{Node, NodeData, NodeType},
    },
};

/// Publishes the plugin metadata as its output.
pub struct ModifierHandler;

#[async_trait]
impl NodeHandler for ModifierHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Modifier
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "author": { "type": "string" },
                "version": { "type": "string" },
                "description": { "type": "string" }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::Modifier(data) = &node.data else {
            return Err(mismatched(node, NodeType::Modifier));
        };
        Ok(Vars::from(serde_json::to_value(data)?))
    }
}
