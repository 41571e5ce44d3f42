mod edge;
mod node;
mod workflow;

pub use edge::EdgeModel;
pub use node::{NodeModel, Position};
pub use workflow::WorkflowModel;
