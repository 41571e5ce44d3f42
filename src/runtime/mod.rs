mod context;

pub use context::{ExecutionContext, frame_of};
