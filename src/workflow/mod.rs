pub mod consts;
pub mod edge;
pub mod handlers;
pub mod node;
pub mod template;
mod workflow;

pub use workflow::{ListingColumn, Workflow};
