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

pub struct VisualizersHandler;

#[async_trait]
impl NodeHandler for VisualizersHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Visualizers
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "canvas": { "type": "boolean" },
                "raster": { "type": "boolean" },
                "listingTitle": { "type": ["string", "null"] },
                "listing": { "type": "object" },
                "perAtomProperties": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        _ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::Visualizers(data) = &node.data else {
            return Err(mismatched(node, NodeType::Visualizers));
        };

        let outputs = Vars::new()
            .with("canvas", data.canvas.unwrap_or(false))
            .with("raster", data.raster.unwrap_or(false))
            .with("listingTitle", &data.listing_title)
            .with("listing", data.listing.clone().unwrap_or_default())
            .with("perAtomProperties", data.per_atom_properties.clone().unwrap_or_default());
        Ok(outputs)
    }
}
