use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    PlugflowError, Result,
    common::Vars,
    runtime::{ExecutionContext, frame_of},
    workflow::{
        consts::{FOR_EACH_COUNT, FOR_EACH_CURRENT_INDEX, FOR_EACH_CURRENT_VALUE, FOR_EACH_ITEMS, FOR_EACH_OUTPUT_PATH},
        handlers::{NodeHandler, mismatched},
        node::{Node, NodeData, NodeType},
        template::resolve_reference,
    },
};

/// Resolves the iteration set.
///
/// `currentValue`/`currentIndex`/`outputPath` start empty; the engine injects
/// the job's item, and the entrypoint fills `outputPath` per run.
pub struct ForEachHandler;

#[async_trait]
impl NodeHandler for ForEachHandler {
    fn node_type(&self) -> NodeType {
        NodeType::ForEach
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": { "type": "array" },
                "count": { "type": "integer" },
                "currentValue": {},
                "currentIndex": { "type": "integer" },
                "outputPath": { "type": ["string", "null"] }
            }
        })
    }

    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<Vars> {
        let NodeData::ForEach(data) = &node.data else {
            return Err(mismatched(node, NodeType::ForEach));
        };

        let Some(Value::Array(mut items)) = resolve_reference(ctx, &data.iterable_source) else {
            return Err(PlugflowError::Handler(format!("foreach {}: '{}' is not an array", node.id, data.iterable_source)));
        };

        if ctx.selected_frame_only
            && let Some(timestep) = ctx.selected_timestep
        {
            items = items.into_iter().enumerate().filter(|(i, item)| frame_of(item, *i) == timestep).map(|(_, item)| item).collect();
            debug!("foreach {}: narrowed to timestep {} ({} items)", node.id, timestep, items.len());
        }

        Ok(Vars::new()
            .with(FOR_EACH_COUNT, items.len())
            .with(FOR_EACH_ITEMS, items)
            .with(FOR_EACH_CURRENT_VALUE, Value::Null)
            .with(FOR_EACH_CURRENT_INDEX, -1)
            .with(FOR_EACH_OUTPUT_PATH, Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::workflow::handlers::testing::context_for;

    fn context() -> ExecutionContext {
        let mut ctx = context_for(json!({
            "nodes": [{"id": "fe", "type": "foreach", "data": {"iterableSource": "ctx.trajectory_dumps"}}],
            "edges": []
        }));
        ctx.add_output("ctx".to_string(), Vars::new().with("trajectory_dumps", json!([{"timestep": 0}, {"timestep": 100}, {"timestep": 200}])).with("name", "x"));
        ctx
    }

    #[tokio::test]
    async fn test_items_and_defaults() {
        let mut ctx = context();
        let node = ctx.workflow.get_node("fe").unwrap().clone();
        let outputs = ForEachHandler.execute(&node, &mut ctx).await.unwrap();

        assert_eq!(outputs.get::<usize>(FOR_EACH_COUNT), Some(3));
        assert_eq!(outputs.get_value(FOR_EACH_CURRENT_VALUE), Some(&Value::Null));
        assert_eq!(outputs.get::<i64>(FOR_EACH_CURRENT_INDEX), Some(-1));
        assert_eq!(outputs.get_value(FOR_EACH_OUTPUT_PATH), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_selected_frame_only() {
        let mut ctx = context();
        ctx.selected_frame_only = true;
        ctx.selected_timestep = Some(100);
        let node = ctx.workflow.get_node("fe").unwrap().clone();
        let outputs = ForEachHandler.execute(&node, &mut ctx).await.unwrap();

        assert_eq!(outputs.get_value(FOR_EACH_ITEMS), Some(&json!([{"timestep": 100}])));
    }

    #[tokio::test]
    async fn test_non_array_source() {
        let mut ctx = context();
        ctx.add_output("ctx".to_string(), Vars::new().with("trajectory_dumps", "nope"));
        let node = ctx.workflow.get_node("fe").unwrap().clone();
        let err = ForEachHandler.execute(&node, &mut ctx).await.unwrap_err();
        assert!(matches!(err, PlugflowError::Handler(_)));
    }
}
