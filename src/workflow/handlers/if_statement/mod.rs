mod handler;
mod models;

pub use handler::IfStatementHandler;
pub use models::{Condition, ConditionHandler, ConditionType};
