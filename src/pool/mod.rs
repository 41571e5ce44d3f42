//! Bounded, self-healing pool of worker threads.
//!
//! The pool keeps `min_workers <= size <= max_concurrent_jobs`, scales idle
//! workers down after a TTL, and replaces workers that die. Workers that keep
//! dying without finishing a job flip the pool into a crash loop, where
//! respawns are delayed with a growing backoff instead of busy-looping.
//!
//! Pool bookkeeping is only mutated from the pool's own event loop and the
//! owner's calls; callers observe it through the query methods.

mod worker;

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{runtime::Handle, task::JoinHandle, time::Instant};
use tracing::{debug, error, info, trace, warn};

use crate::{
    PlugflowError, Result, ShareLock,
    common::{Queue, Shutdown},
    config::PoolConfig,
    queue::JobDescriptor,
};

use worker::WorkerHandle;

pub use worker::{JobRunner, MessageKind, ProgressReporter, WorkerEvent, WorkerId, WorkerMessage};

/// Crash-loop backoff grows with the crash count up to this factor.
const MAX_BACKOFF_FACTOR: u32 = 5;

pub type MessageHandler = Arc<dyn Fn(WorkerId, WorkerMessage) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(WorkerId, String) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ExitHandler = Arc<dyn Fn(WorkerId, i32) -> BoxFuture<'static, ()> + Send + Sync>;
pub type BacklogProbe = Arc<dyn Fn() -> BoxFuture<'static, Result<usize>> + Send + Sync>;

/// Caller-supplied callbacks.
#[derive(Clone)]
pub struct PoolHandlers {
    pub on_message: MessageHandler,
    pub on_error: ErrorHandler,
    pub on_exit: ExitHandler,
    /// number of queued jobs, consulted before respawning a dead worker
    pub backlog: BacklogProbe,
}

impl Default for PoolHandlers {
    fn default() -> Self {
        Self {
            on_message: Arc::new(|_, _| Box::pin(async {})),
            on_error: Arc::new(|_, _| Box::pin(async {})),
            on_exit: Arc::new(|_, _| Box::pin(async {})),
            backlog: Arc::new(|| Box::pin(async { Ok(0) })),
        }
    }
}

struct WorkerPoolItem {
    id: WorkerId,
    handle: WorkerHandle,
    is_idle: bool,
    job_count: u64,
    last_used: Instant,
    current_job: Option<String>,
    /// pending scale-down timers
    timeouts: Vec<JoinHandle<()>>,
}

impl WorkerPoolItem {
    fn clear_timers(&mut self) {
        for timer in self.timeouts.drain(..) {
            timer.abort();
        }
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            is_idle: self.is_idle,
            job_count: self.job_count,
            last_used: self.last_used,
            current_job: self.current_job.clone(),
        }
    }
}

/// Snapshot of one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub is_idle: bool,
    pub job_count: u64,
    pub last_used: Instant,
    pub current_job: Option<String>,
}

#[derive(Default)]
struct CrashState {
    consecutive_crashes: u32,
    last_crash: Option<Instant>,
    in_crash_loop: bool,
}

impl CrashState {
    /// Record a dead worker, returns whether the pool is in a crash loop.
    fn record(
        &mut self,
        had_job: bool,
        now: Instant,
        config: &PoolConfig,
    ) -> bool {
        if self.last_crash.is_none_or(|last| now.duration_since(last) > config.crash_window()) {
            self.consecutive_crashes = 0;
            self.in_crash_loop = false;
        }

        if had_job {
            self.consecutive_crashes = 0;
            self.in_crash_loop = false;
            return false;
        }

        self.consecutive_crashes += 1;
        self.last_crash = Some(now);
        if self.consecutive_crashes >= config.max_consecutive_crashes {
            if !self.in_crash_loop {
                error!("worker pool entered a crash loop after {} consecutive crashes", self.consecutive_crashes);
            }
            self.in_crash_loop = true;
        }
        self.in_crash_loop
    }

    fn respawn_delay(
        &self,
        config: &PoolConfig,
    ) -> Duration {
        config.crash_backoff() * self.consecutive_crashes.min(MAX_BACKOFF_FACTOR)
    }
}

#[derive(Default)]
struct PoolState {
    workers: Vec<WorkerPoolItem>,
    next_id: WorkerId,
    crashes: CrashState,
}

impl PoolState {
    fn remove(
        &mut self,
        id: WorkerId,
    ) -> Option<WorkerPoolItem> {
        let pos = self.workers.iter().position(|w| w.id == id)?;
        let mut item = self.workers.remove(pos);
        item.clear_timers();
        item.handle.terminate();
        Some(item)
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    config: PoolConfig,
    runner: Arc<dyn JobRunner>,
    handlers: PoolHandlers,
    state: ShareLock<PoolState>,
    events: Arc<Queue<WorkerEvent>>,
    handle: Handle,
    shutdown: Arc<Shutdown>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        runner: Arc<dyn JobRunner>,
        handlers: PoolHandlers,
        handle: Handle,
    ) -> Self {
        Self {
            config,
            runner,
            handlers,
            state: Arc::new(RwLock::new(PoolState::default())),
            events: Queue::new(),
            handle,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Start consuming worker events.
    pub fn start(&self) {
        let pool = self.clone();
        let shutdown = self.shutdown.clone();
        self.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Some(event) = pool.events.next_async() => pool.handle_event(event).await,
                }
            }
        });
    }

    /// Terminate every worker and stop the event loop.
    pub fn stop(&self) {
        self.shutdown.shutdown();
        self.terminate_all();
    }

    pub fn spawn_worker(&self) -> Result<WorkerId> {
        let mut state = self.state.write().unwrap();
        self.spawn_locked(&mut state)
    }

    fn spawn_locked(
        &self,
        state: &mut PoolState,
    ) -> Result<WorkerId> {
        let id = state.next_id;
        let handle = WorkerHandle::spawn(id, self.runner.clone(), self.events.sender())?;
        state.next_id += 1;
        state.workers.push(WorkerPoolItem {
            id,
            handle,
            is_idle: true,
            job_count: 0,
            last_used: Instant::now(),
            current_job: None,
            timeouts: Vec::new(),
        });
        info!("spawned worker {} (pool size {})", id, state.workers.len());
        Ok(id)
    }

    /// Spawn one worker unless the pool is already at `max_concurrent_jobs`.
    /// The check and the spawn happen under one lock.
    fn spawn_below_cap(&self) -> Result<Option<WorkerId>> {
        let mut state = self.state.write().unwrap();
        if state.workers.len() >= self.config.max_concurrent_jobs {
            return Ok(None);
        }
        self.spawn_locked(&mut state).map(Some)
    }

    /// Spawn up to `n` workers without exceeding `max_concurrent_jobs`.
    pub fn scale_up(
        &self,
        n: usize,
    ) -> Result<usize> {
        let mut state = self.state.write().unwrap();
        let room = self.config.max_concurrent_jobs.saturating_sub(state.workers.len());
        let to_spawn = n.min(room);
        for _ in 0..to_spawn {
            self.spawn_locked(&mut state)?;
        }
        Ok(to_spawn)
    }

    pub fn terminate_all(&self) {
        let mut state = self.state.write().unwrap();
        for mut item in state.workers.drain(..) {
            item.clear_timers();
            item.handle.terminate();
        }
        info!("terminated all workers");
    }

    /// Reserve an idle worker for a job: marks it busy and cancels its timers.
    pub fn acquire_idle(&self) -> Option<WorkerId> {
        let mut state = self.state.write().unwrap();
        let item = state.workers.iter_mut().find(|w| w.is_idle)?;
        item.is_idle = false;
        item.last_used = Instant::now();
        item.clear_timers();
        Some(item.id)
    }

    /// Give back a worker acquired for a job that never got sent.
    pub fn release(
        &self,
        worker: WorkerId,
    ) {
        {
            let mut state = self.state.write().unwrap();
            let Some(item) = state.workers.iter_mut().find(|w| w.id == worker) else {
                return;
            };
            item.is_idle = true;
        }
        self.schedule_scale_down(worker);
    }

    /// Hand `job` to a worker obtained from [`WorkerPool::acquire_idle`].
    pub fn send_job(
        &self,
        worker: WorkerId,
        job: JobDescriptor,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let item = state.workers.iter_mut().find(|w| w.id == worker).ok_or(PlugflowError::Pool(format!("worker {} is not in the pool", worker)))?;

        let job_id = job.job_id.clone();
        if let Err(e) = item.handle.send(job) {
            item.is_idle = true;
            return Err(e);
        }
        debug!("job {} -> worker {}", job_id, worker);
        item.current_job = Some(job_id);
        Ok(())
    }

    /// Run `job` on any idle worker.
    pub fn dispatch(
        &self,
        job: JobDescriptor,
    ) -> Result<WorkerId> {
        let worker = self.acquire_idle().ok_or(PlugflowError::Pool("no idle worker".to_string()))?;
        self.send_job(worker, job)?;
        Ok(worker)
    }

    /// After the idle TTL, remove the worker if it is still idle and the pool is above its floor.
    fn schedule_scale_down(
        &self,
        worker: WorkerId,
    ) {
        let pool = self.clone();
        let ttl = self.config.idle_worker_ttl();
        let timer = self.handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            pool.scale_down_if_idle(worker);
        });

        let mut state = self.state.write().unwrap();
        match state.workers.iter_mut().find(|w| w.id == worker) {
            Some(item) => item.timeouts.push(timer),
            None => timer.abort(),
        }
    }

    fn scale_down_if_idle(
        &self,
        worker: WorkerId,
    ) {
        let mut state = self.state.write().unwrap();
        let Some(item) = state.workers.iter().find(|w| w.id == worker) else {
            return;
        };
        if !item.is_idle || state.workers.len() <= self.config.min_workers {
            return;
        }
        // the timer being run is among the ones cleared here; aborting a finished task is a no-op
        state.remove(worker);
        info!("scaled down idle worker {} (pool size {})", worker, state.workers.len());
    }

    /// A nonzero exit is always reported to `on_exit`, including the exit that
    /// follows a worker's error. Only workers still in the pool get replaced.
    async fn handle_event(
        &self,
        event: WorkerEvent,
    ) {
        match event {
            WorkerEvent::Message {
                worker,
                message,
            } => {
                let terminal = message.kind.is_terminal();
                (self.handlers.on_message)(worker, message).await;
                if terminal {
                    self.finish_job(worker);
                }
            }
            WorkerEvent::Error {
                worker,
                error,
            } => {
                error!("worker {} error: {}", worker, error);
                (self.handlers.on_error)(worker, error).await;
                self.replace_worker(worker, false).await;
            }
            WorkerEvent::Exit {
                worker,
                code,
            } => {
                info!("worker {} exited with code {}", worker, code);
                if code != 0 {
                    (self.handlers.on_exit)(worker, code).await;
                }
                // retired workers were already removed or replaced
                if !self.contains(worker) {
                    trace!("exit of retired worker {}", worker);
                    return;
                }
                // an exit never counts towards a crash loop
                self.replace_worker(worker, true).await;
            }
        }
    }

    fn finish_job(
        &self,
        worker: WorkerId,
    ) {
        {
            let mut state = self.state.write().unwrap();
            let Some(item) = state.workers.iter_mut().find(|w| w.id == worker) else {
                return;
            };
            item.is_idle = true;
            item.job_count += 1;
            item.last_used = Instant::now();
            item.current_job = None;
            item.clear_timers();
        }
        self.schedule_scale_down(worker);
    }

    async fn replace_worker(
        &self,
        worker: WorkerId,
        had_job: bool,
    ) {
        let crash_loop = {
            let mut state = self.state.write().unwrap();
            state.remove(worker);
            state.crashes.record(had_job, Instant::now(), &self.config)
        };

        let backlog = (self.handlers.backlog)().await;
        let below_floor = self.pool_size() < self.config.min_workers;
        let respawn = match backlog {
            Ok(n) => below_floor || n > 0,
            Err(e) => {
                warn!("backlog probe failed: {}", e);
                below_floor
            }
        };
        if !respawn {
            return;
        }

        if !crash_loop {
            match self.spawn_below_cap() {
                Ok(Some(_)) => {}
                Ok(None) => debug!("pool at capacity, worker {} not replaced", worker),
                Err(e) => error!("failed to replace worker {}: {}", worker, e),
            }
            return;
        }

        let delay = self.respawn_delay();
        warn!("crash loop: respawning in {:?}", delay);
        let pool = self.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if pool.shutdown.is_shutdown() {
                return;
            }
            if let Err(e) = pool.spawn_below_cap() {
                error!("delayed respawn failed: {}", e);
            }
        });
    }

    fn contains(
        &self,
        worker: WorkerId,
    ) -> bool {
        self.state.read().unwrap().workers.iter().any(|w| w.id == worker)
    }

    pub fn pool_size(&self) -> usize {
        self.state.read().unwrap().workers.len()
    }

    pub fn available_worker_count(&self) -> usize {
        self.state.read().unwrap().workers.iter().filter(|w| w.is_idle).count()
    }

    pub fn is_in_crash_loop(&self) -> bool {
        self.state.read().unwrap().crashes.in_crash_loop
    }

    pub fn consecutive_crashes(&self) -> u32 {
        self.state.read().unwrap().crashes.consecutive_crashes
    }

    pub fn respawn_delay(&self) -> Duration {
        self.state.read().unwrap().crashes.respawn_delay(&self.config)
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.state.read().unwrap().workers.iter().map(WorkerPoolItem::info).collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;

    struct Runner;

    #[async_trait]
    impl JobRunner for Runner {
        async fn run(
            &self,
            job: &JobDescriptor,
            _reporter: &ProgressReporter,
        ) -> Result<Value> {
            if job.for_each_index == 99 {
                panic!("boom");
            }
            Ok(json!(job.for_each_index))
        }
    }

    fn config(
        min_workers: usize,
        max_concurrent_jobs: usize,
    ) -> PoolConfig {
        PoolConfig {
            max_concurrent_jobs,
            min_workers,
            idle_worker_ttl_ms: 30_000,
            crash_window_ms: 60_000,
            max_consecutive_crashes: 3,
            crash_backoff_ms: 1_000,
        }
    }

    fn job(index: usize) -> JobDescriptor {
        JobDescriptor {
            job_id: format!("job-{}", index),
            for_each_index: index,
            ..Default::default()
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_crash_loop_detection() {
        let config = config(1, 4);
        let mut crashes = CrashState::default();
        let start = Instant::now();

        assert!(!crashes.record(false, start, &config));
        assert!(!crashes.record(false, start + Duration::from_secs(1), &config));
        assert!(crashes.record(false, start + Duration::from_secs(2), &config));
        assert_eq!(crashes.consecutive_crashes, 3);
        assert_eq!(crashes.respawn_delay(&config), Duration::from_secs(3));

        for i in 3..10 {
            crashes.record(false, start + Duration::from_secs(i), &config);
        }
        assert_eq!(crashes.respawn_delay(&config), Duration::from_secs(5));

        // outside the window the count starts over
        assert!(!crashes.record(false, start + Duration::from_secs(200), &config));
        assert_eq!(crashes.consecutive_crashes, 1);

        // a crash that completed its job is incidental
        crashes.record(false, start + Duration::from_secs(201), &config);
        assert!(!crashes.record(true, start + Duration::from_secs(202), &config));
        assert_eq!(crashes.consecutive_crashes, 0);
        assert!(!crashes.in_crash_loop);
    }

    #[tokio::test]
    async fn test_scale_up_respects_cap() {
        let pool = WorkerPool::new(config(1, 3), Arc::new(Runner), PoolHandlers::default(), Handle::current());
        assert_eq!(pool.scale_up(2).unwrap(), 2);
        assert_eq!(pool.scale_up(5).unwrap(), 1);
        assert_eq!(pool.pool_size(), 3);
        assert_eq!(pool.available_worker_count(), 3);
        pool.stop();
        assert_eq!(pool.pool_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_workers_scale_down_to_floor() {
        let pool = WorkerPool::new(config(1, 4), Arc::new(Runner), PoolHandlers::default(), Handle::current());
        pool.scale_up(3).unwrap();
        for worker in pool.workers() {
            pool.schedule_scale_down(worker.id);
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(pool.pool_size(), 3);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(pool.pool_size(), 1);
        pool.stop();
    }

    #[tokio::test]
    async fn test_dispatch_and_finish() {
        let (tx, rx) = flume::unbounded();
        let handlers = PoolHandlers {
            on_message: Arc::new(move |worker, message| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send((worker, message));
                })
            }),
            ..Default::default()
        };
        let pool = WorkerPool::new(config(1, 2), Arc::new(Runner), handlers, Handle::current());
        pool.start();
        pool.scale_up(1).unwrap();

        let worker = pool.dispatch(job(4)).unwrap();
        assert_eq!(pool.available_worker_count(), 0);
        assert!(pool.dispatch(job(5)).is_err());

        let (from, message) = tokio::time::timeout(Duration::from_secs(5), rx.recv_async()).await.unwrap().unwrap();
        assert_eq!(from, worker);
        assert_eq!(message.kind, MessageKind::Success);
        assert_eq!(message.payload, Some(json!(4)));

        eventually(|| pool.available_worker_count() == 1).await;
        assert_eq!(pool.workers()[0].job_count, 1);
        pool.stop();
    }

    #[tokio::test]
    async fn test_panicking_worker_is_replaced() {
        let (tx, rx) = flume::unbounded();
        let (exit_tx, exit_rx) = flume::unbounded();
        let handlers = PoolHandlers {
            on_error: Arc::new(move |worker, error| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send((worker, error));
                })
            }),
            on_exit: Arc::new(move |worker, code| {
                let exit_tx = exit_tx.clone();
                Box::pin(async move {
                    let _ = exit_tx.send((worker, code));
                })
            }),
            ..Default::default()
        };
        let pool = WorkerPool::new(config(1, 2), Arc::new(Runner), handlers, Handle::current());
        pool.start();
        pool.scale_up(1).unwrap();

        let worker = pool.dispatch(job(99)).unwrap();
        let (from, error) = tokio::time::timeout(Duration::from_secs(5), rx.recv_async()).await.unwrap().unwrap();
        assert_eq!(from, worker);
        assert_eq!(error, "boom");

        // the panicked thread still reports its exit
        let exit = tokio::time::timeout(Duration::from_secs(5), exit_rx.recv_async()).await.unwrap().unwrap();
        assert_eq!(exit, (worker, 1));

        eventually(|| pool.pool_size() == 1 && pool.workers()[0].id != worker).await;
        assert_eq!(pool.consecutive_crashes(), 1);
        assert!(!pool.is_in_crash_loop());
        pool.stop();
    }

    #[tokio::test]
    async fn test_exit_counts_as_completed_job() {
        let (tx, rx) = flume::unbounded();
        let handlers = PoolHandlers {
            on_exit: Arc::new(move |worker, code| {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send((worker, code));
                })
            }),
            ..Default::default()
        };
        let pool = WorkerPool::new(config(0, 2), Arc::new(Runner), handlers, Handle::current());
        let worker = pool.spawn_worker().unwrap();
        pool.state.write().unwrap().crashes.consecutive_crashes = 2;

        pool.handle_event(WorkerEvent::Exit {
            worker,
            code: 1,
        })
        .await;
        assert_eq!(rx.try_recv().unwrap(), (worker, 1));
        assert_eq!(pool.consecutive_crashes(), 0);
        // nothing queued and no floor: the dead worker is not replaced
        assert_eq!(pool.pool_size(), 0);

        // a retired worker's exit is reported but never replaced
        pool.state.write().unwrap().crashes.consecutive_crashes = 2;
        pool.handle_event(WorkerEvent::Exit {
            worker,
            code: 1,
        })
        .await;
        assert_eq!(rx.try_recv().unwrap(), (worker, 1));
        assert_eq!(pool.consecutive_crashes(), 2);
        assert_eq!(pool.pool_size(), 0);

        // clean exits are not reported
        pool.handle_event(WorkerEvent::Exit {
            worker,
            code: 0,
        })
        .await;
        assert!(rx.try_recv().is_err());
    }

    fn queued(
        depth: usize,
        delay: Duration,
    ) -> PoolHandlers {
        PoolHandlers {
            backlog: Arc::new(move || {
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    Ok(depth)
                })
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_replacement_never_exceeds_cap() {
        let pool = WorkerPool::new(config(0, 1), Arc::new(Runner), queued(1, Duration::from_millis(100)), Handle::current());
        let worker = pool.spawn_worker().unwrap();

        let replacing = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.handle_event(WorkerEvent::Error {
                    worker,
                    error: "boom".to_string(),
                })
                .await;
            })
        };

        // the backlog probe is still pending while the freed slot is taken
        eventually(|| pool.pool_size() == 0).await;
        assert_eq!(pool.scale_up(1).unwrap(), 1);

        replacing.await.unwrap();
        assert_eq!(pool.pool_size(), 1);
        pool.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_loop_delays_respawn() {
        let pool = WorkerPool::new(config(0, 4), Arc::new(Runner), queued(1, Duration::ZERO), Handle::current());
        pool.spawn_worker().unwrap();

        let crash = |pool: &WorkerPool| {
            let worker = pool.workers()[0].id;
            WorkerEvent::Error {
                worker,
                error: "boom".to_string(),
            }
        };

        // the first two crashes are replaced right away
        for _ in 0..2 {
            pool.handle_event(crash(&pool)).await;
            assert_eq!(pool.pool_size(), 1);
            assert!(!pool.is_in_crash_loop());
        }

        pool.handle_event(crash(&pool)).await;
        assert!(pool.is_in_crash_loop());
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(pool.respawn_delay(), Duration::from_secs(3));

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(pool.pool_size(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.pool_size(), 1);

        // a pending respawn is dropped once the pool is stopped
        pool.handle_event(crash(&pool)).await;
        assert_eq!(pool.consecutive_crashes(), 4);
        pool.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(pool.pool_size(), 0);
    }
}
