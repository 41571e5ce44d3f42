//! Job queue: the caller of the worker pool.
//!
//! Planned jobs wait in a flume backlog. A dispatch loop grows the pool to
//! match the backlog and hands jobs to idle workers; worker messages are
//! turned into status transitions, with failed jobs retried up to
//! `max_retries` attempts.

mod job;
mod runner;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error, info, warn};

use crate::{
    Config, Result, ShareLock,
    common::{Queue, Shutdown},
    config::QueueConfig,
    engine::{ExecutionRequest, WorkflowEngine, frame_of},
    pool::{JobRunner, MessageKind, PoolHandlers, WorkerId, WorkerMessage, WorkerPool},
    status::{JobStatus, StatusExtra, StatusTracker},
};

pub use job::JobDescriptor;
pub use runner::WorkflowJobRunner;

/// Jobs currently on a worker, and what to do when their worker reports back.
struct JobBook {
    in_flight: ShareLock<HashMap<WorkerId, JobDescriptor>>,
    backlog: Arc<Queue<JobDescriptor>>,
    status: StatusTracker,
    max_retries: u32,
}

impl JobBook {
    async fn set_status(
        &self,
        job: &JobDescriptor,
        status: JobStatus,
        extra: StatusExtra,
    ) {
        if let Err(e) = self.status.set_status(&job.job_id, status, extra).await {
            warn!("failed to record status {} of job {}: {}", status, job.job_id, e);
        }
    }

    async fn on_message(
        &self,
        worker: WorkerId,
        message: WorkerMessage,
    ) {
        let job = match message.kind {
            MessageKind::Progress => self.in_flight.read().unwrap().get(&worker).cloned(),
            MessageKind::Success | MessageKind::Error => self.in_flight.write().unwrap().remove(&worker),
        };
        let Some(mut job) = job else {
            warn!("message for job {} from worker {} without a job in flight", message.job_id, worker);
            return;
        };

        match message.kind {
            MessageKind::Progress => {
                let extra = StatusExtra {
                    progress: message.progress,
                    message: message.message,
                    ..job.status_extra()
                };
                self.set_status(&job, JobStatus::Running, extra).await;
            }
            MessageKind::Success => {
                info!("job {} completed", job.job_id);
                let extra = StatusExtra {
                    progress: 100.0,
                    result: message.payload,
                    ..job.status_extra()
                };
                self.set_status(&job, JobStatus::Completed, extra).await;
            }
            MessageKind::Error => {
                job.attempts += 1;
                let extra = StatusExtra {
                    error: message.error,
                    ..job.status_extra()
                };
                if job.attempts < self.max_retries {
                    warn!("job {} failed (attempt {}), retrying", job.job_id, job.attempts);
                    self.set_status(&job, JobStatus::Retrying, extra).await;
                    if let Err(e) = self.backlog.send(job) {
                        error!("failed to re-queue job: {}", e);
                    }
                } else {
                    error!("job {} failed after {} attempts", job.job_id, job.attempts);
                    self.set_status(&job, JobStatus::Failed, extra).await;
                }
            }
        }
    }

    /// The worker died under the job.
    async fn mark_failed(
        &self,
        worker: WorkerId,
        error: String,
    ) {
        let Some(job) = self.in_flight.write().unwrap().remove(&worker) else {
            return;
        };
        error!("job {} lost with worker {}: {}", job.job_id, worker, error);
        let extra = StatusExtra {
            error: Some(error),
            ..job.status_extra()
        };
        self.set_status(&job, JobStatus::Failed, extra).await;
    }
}

#[derive(Clone)]
pub struct JobQueue {
    config: QueueConfig,
    max_concurrent_jobs: usize,
    min_workers: usize,
    pool: WorkerPool,
    engine: WorkflowEngine,
    book: Arc<JobBook>,
    handle: Handle,
    shutdown: Arc<Shutdown>,
    /// keeps a runtime built for this queue alive
    _rt: Option<Arc<Runtime>>,
}

impl JobQueue {
    pub fn new(
        config: &Config,
        runner: Arc<dyn JobRunner>,
        engine: WorkflowEngine,
        status: StatusTracker,
        handle: Handle,
    ) -> Self {
        let book = Arc::new(JobBook {
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            backlog: Queue::new(),
            status,
            max_retries: config.queue.max_retries,
        });

        let handlers = {
            let (on_message, on_error, on_exit, backlog) = (book.clone(), book.clone(), book.clone(), book.backlog.clone());
            PoolHandlers {
                on_message: Arc::new(move |worker, message| {
                    let book = on_message.clone();
                    Box::pin(async move { book.on_message(worker, message).await })
                }),
                on_error: Arc::new(move |worker, error| {
                    let book = on_error.clone();
                    Box::pin(async move { book.mark_failed(worker, error).await })
                }),
                on_exit: Arc::new(move |worker, code| {
                    let book = on_exit.clone();
                    Box::pin(async move { book.mark_failed(worker, format!("worker exited with code {}", code)).await })
                }),
                backlog: Arc::new(move || {
                    let len = backlog.len();
                    Box::pin(async move { Ok(len) })
                }),
            }
        };

        Self {
            config: config.queue.clone(),
            max_concurrent_jobs: config.pool.max_concurrent_jobs,
            min_workers: config.pool.min_workers,
            pool: WorkerPool::new(config.pool.clone(), runner, handlers, handle.clone()),
            engine,
            book,
            handle,
            shutdown: Arc::new(Shutdown::new()),
            _rt: None,
        }
    }

    pub(crate) fn with_runtime(
        mut self,
        rt: Arc<Runtime>,
    ) -> Self {
        self._rt = Some(rt);
        self
    }

    /// Record every job as queued and append it to the backlog.
    pub async fn add_jobs(
        &self,
        jobs: Vec<JobDescriptor>,
    ) -> Result<()> {
        for job in jobs {
            self.book.status.set_status(&job.job_id, JobStatus::Queued, job.status_extra()).await?;
            self.book.backlog.send(job)?;
        }
        Ok(())
    }

    /// Plan the request and enqueue one job per iteration item.
    ///
    /// Returns the queued jobs, empty when the plan yields nothing.
    pub async fn schedule_analysis(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Vec<JobDescriptor>> {
        let Some(plan) = self.engine.plan_execution_strategy(request).await? else {
            info!("nothing to schedule for analysis {}", request.analysis_id);
            return Ok(Vec::new());
        };

        let total_items = plan.items.len();
        let jobs: Vec<JobDescriptor> = plan
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| JobDescriptor {
                job_id: uuid::Uuid::new_v4().to_string(),
                team_id: request.team_id.clone(),
                queue_type: self.config.queue_type.clone(),
                name: Some(request.plugin_slug.clone()),
                plugin_id: request.plugin_id.clone(),
                plugin_slug: request.plugin_slug.clone(),
                trajectory_id: request.trajectory_id.clone(),
                trajectory_name: None,
                analysis_id: request.analysis_id.clone(),
                user_config: request.user_config.clone(),
                options: request.options.clone(),
                timestep: frame_of(&item, index),
                for_each_index: index,
                for_each_item: item,
                total_items,
                attempts: 0,
            })
            .collect();

        info!("scheduling {} jobs for analysis {} (foreach {})", total_items, request.analysis_id, plan.for_each_node_id);
        self.add_jobs(jobs.clone()).await?;
        Ok(jobs)
    }

    /// Bring the pool to its floor and start dispatching.
    pub fn start(&self) -> Result<()> {
        self.pool.start();
        self.pool.scale_up(self.min_workers)?;

        let queue = self.clone();
        let shutdown = self.shutdown.clone();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        self.handle.spawn(async move {
            info!("job queue {} started", queue.config.queue_type);
            while !shutdown.is_shutdown() {
                if queue.dispatch_batch().await > 0 {
                    continue;
                }
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            info!("job queue {} stopped", queue.config.queue_type);
        });
        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.shutdown();
        self.pool.stop();
    }

    async fn dispatch_batch(&self) -> usize {
        let backlog = self.book.backlog.len();
        if backlog == 0 {
            return 0;
        }

        let target = backlog.min(self.max_concurrent_jobs);
        let size = self.pool.pool_size();
        if size < target
            && let Err(e) = self.pool.scale_up(target - size)
        {
            warn!("failed to scale pool up: {}", e);
        }

        let mut dispatched = 0;
        while dispatched < self.config.batch_size {
            let Some(worker) = self.pool.acquire_idle() else {
                break;
            };
            let Some(job) = self.book.backlog.try_next() else {
                self.pool.release(worker);
                break;
            };

            self.book.in_flight.write().unwrap().insert(worker, job.clone());
            self.book.set_status(&job, JobStatus::Running, job.status_extra()).await;

            if let Err(e) = self.pool.send_job(worker, job.clone()) {
                warn!("dispatch of job {} failed: {}", job.job_id, e);
                self.book.in_flight.write().unwrap().remove(&worker);
                if let Err(e) = self.book.backlog.send(job) {
                    error!("failed to re-queue job: {}", e);
                }
                break;
            }
            dispatched += 1;
        }

        if dispatched > 0 {
            debug!("dispatched {} jobs, {} waiting", dispatched, self.book.backlog.len());
        }
        dispatched
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn status(&self) -> &StatusTracker {
        &self.book.status
    }

    pub fn backlog_len(&self) -> usize {
        self.book.backlog.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.book.in_flight.read().unwrap().len()
    }
}
