//! In-memory collaborators for tests, demos and single-process embedding.

mod dumps;
mod exposure_meta;
mod status;
mod storage;
mod workflows;

pub use dumps::MemDumpSource;
pub use exposure_meta::MemExposureMetaRepository;
pub use status::MemStatusStore;
pub use storage::MemObjectStorage;
pub use workflows::MemWorkflowProvider;
