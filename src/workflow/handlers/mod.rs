//! Node handlers, one per [`NodeType`].
//!
//! A handler consumes its ancestors' outputs from the [`ExecutionContext`],
//! returns its own output and may append temp artifacts to the context.
//! Handlers never call each other; ordering belongs to the engine.

mod arguments;
mod context;
mod entrypoint;
mod export;
mod exposure;
mod for_each;
pub mod if_statement;
mod modifier;
mod registry;
mod schema;
mod visualizers;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    Result,
    common::Vars,
    runtime::ExecutionContext,
    workflow::node::{Node, NodeType},
};

pub use arguments::ArgumentsHandler;
pub use context::ContextHandler;
pub use entrypoint::EntrypointHandler;
pub use export::ExportHandler;
pub use exposure::ExposureHandler;
pub use for_each::ForEachHandler;
pub use if_statement::IfStatementHandler;
pub use modifier::ModifierHandler;
pub use registry::NodeRegistry;
pub use schema::SchemaHandler;
pub use visualizers::VisualizersHandler;

#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The node type this handler executes.
    fn node_type(&self) -> NodeType;

    /// JSON schema of the output, used by the editor for autocomplete.
    fn output_schema(&self) -> Value;

    /// Executes the node and returns its output.
    ///
    /// # Arguments
    ///
    /// * `node` - The node to execute; its data matches [`NodeHandler::node_type`].
    /// * `ctx` - The job-scoped [`ExecutionContext`].
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<Vars>;
}

/// Error for a node whose payload does not match the handler.
fn mismatched(
    node: &Node,
    expected: NodeType,
) -> crate::PlugflowError {
    crate::PlugflowError::Handler(format!("node {} is {} but was dispatched to the {} handler", node.id, node.node_type, expected))
}
