use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::{
    Config, PlugflowError, Result,
    engine::WorkflowEngine,
    exporter::{Exporter, ExporterRegistry},
    queue::{JobQueue, WorkflowJobRunner},
    status::StatusTracker,
    store::{
        DumpSource, ExposureMetaRepository, MemDumpSource, MemExposureMetaRepository, MemObjectStorage, MemStatusStore, MemWorkflowProvider, ObjectStorage, StatusStore,
        WorkflowProvider,
    },
    workflow::{
        handlers::{
            ArgumentsHandler, ContextHandler, EntrypointHandler, ExportHandler, ExposureHandler, ForEachHandler, IfStatementHandler, ModifierHandler, NodeRegistry, SchemaHandler,
            VisualizersHandler,
        },
        node::ExporterKind,
    },
};

/// Wires configuration and collaborators into an engine, a status tracker
/// and a job queue. Every collaborator defaults to its in-memory version.
pub struct EngineBuilder {
    config: Config,
    storage: Arc<dyn ObjectStorage>,
    exposure_metas: Arc<dyn ExposureMetaRepository>,
    dumps: Arc<dyn DumpSource>,
    workflows: Arc<dyn WorkflowProvider>,
    status_store: Arc<dyn StatusStore>,
    exporters: ExporterRegistry,
    rt: Option<Arc<Runtime>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            storage: Arc::new(MemObjectStorage::new()),
            exposure_metas: Arc::new(MemExposureMetaRepository::new()),
            dumps: Arc::new(MemDumpSource::new()),
            workflows: Arc::new(MemWorkflowProvider::new()),
            status_store: Arc::new(MemStatusStore::new()),
            exporters: ExporterRegistry::new(),
            rt: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn storage(
        mut self,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        self.storage = storage;
        self
    }

    pub fn exposure_metas(
        mut self,
        repository: Arc<dyn ExposureMetaRepository>,
    ) -> Self {
        self.exposure_metas = repository;
        self
    }

    pub fn dump_source(
        mut self,
        dumps: Arc<dyn DumpSource>,
    ) -> Self {
        self.dumps = dumps;
        self
    }

    pub fn workflow_provider(
        mut self,
        workflows: Arc<dyn WorkflowProvider>,
    ) -> Self {
        self.workflows = workflows;
        self
    }

    pub fn status_store(
        mut self,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        self.status_store = store;
        self
    }

    pub fn exporter(
        mut self,
        kind: ExporterKind,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        self.exporters = self.exporters.register(kind, exporter);
        self
    }

    /// Runtime the job queue runs on. Without one, the current runtime is
    /// used, and a new one is built when there is none.
    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    /// The default handler for every node type.
    pub fn registry(&self) -> NodeRegistry {
        let engine = &self.config.engine;
        NodeRegistry::new()
            .register(Arc::new(ArgumentsHandler))
            .register(Arc::new(ContextHandler::new(self.dumps.clone())))
            .register(Arc::new(ForEachHandler))
            .register(Arc::new(EntrypointHandler::new(engine.plugins_dir.clone(), engine.temp_dir.clone(), engine.entrypoint_timeout())))
            .register(Arc::new(ExposureHandler::new(self.storage.clone(), self.exposure_metas.clone(), engine.storage_bucket.clone())))
            .register(Arc::new(SchemaHandler))
            .register(Arc::new(VisualizersHandler))
            .register(Arc::new(ExportHandler::new(self.exporters.clone(), self.storage.clone(), engine.storage_bucket.clone())))
            .register(Arc::new(IfStatementHandler))
            .register(Arc::new(ModifierHandler))
    }

    pub fn build(&self) -> Result<WorkflowEngine> {
        Ok(WorkflowEngine::new(self.registry()))
    }

    pub fn build_status_tracker(&self) -> StatusTracker {
        StatusTracker::new(self.status_store.clone(), &self.config.queue.queue_type, &self.config.status)
    }

    /// Engine, status tracker and worker pool behind one job queue.
    pub fn build_queue(&self) -> Result<JobQueue> {
        let engine = self.build()?;
        let runner = Arc::new(WorkflowJobRunner::new(engine.clone(), self.workflows.clone()));
        let status = self.build_status_tracker();

        if let Some(rt) = &self.rt {
            return Ok(JobQueue::new(&self.config, runner, engine, status, rt.handle().clone()).with_runtime(rt.clone()));
        }
        if let Ok(handle) = Handle::try_current() {
            return Ok(JobQueue::new(&self.config, runner, engine, status, handle));
        }

        let rt = Arc::new(
            Builder::new_multi_thread()
                .worker_threads(self.config.async_worker_thread_number.into())
                .enable_all()
                .build()
                .map_err(|e| PlugflowError::Runtime(format!("failed to build runtime: {}", e)))?,
        );
        Ok(JobQueue::new(&self.config, runner, engine, status, rt.handle().clone()).with_runtime(rt))
    }
}
