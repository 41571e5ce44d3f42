use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    Result,
    common::Vars,
    runtime::ExecutionContext,
    workflow::{
        consts::SCHEMA_DEFINITION,
        handlers::{NodeHandler, mismatched},
        node::{Node, NodeData, NodeType},
    },
};

pub struct SchemaHandler;

#[async_trait]
impl NodeHandler for SchemaHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Schema
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "definition": { "type": "object" }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::Schema(data) = &node.data else {
            return Err(mismatched(node, NodeType::Schema));
        };
        Ok(Vars::new().with(SCHEMA_DEFINITION, &data.definition))
    }
}
