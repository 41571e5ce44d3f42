mod cache;
mod queue;
mod shutdown;
mod vars;

pub use cache::{MemCache, TtlCache};
pub use queue::{BroadcastQueue, Queue};
pub use shutdown::Shutdown;
pub use vars::Vars;
pub(crate) use vars::walk;
