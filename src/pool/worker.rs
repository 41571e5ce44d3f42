//! One worker: an OS thread running a current-thread tokio runtime.
//!
//! Commands arrive over a flume channel; everything the worker has to say
//! goes back to the pool as a [`WorkerEvent`].

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, thread};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::{PlugflowError, Result, queue::JobDescriptor};

pub type WorkerId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    Progress,
    Success,
    Error,
}

impl MessageKind {
    /// Success and error end the job and free the worker.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageKind::Progress)
    }
}

/// Typed message from a worker about the job it runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMessage {
    pub job_id: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message {
        worker: WorkerId,
        message: WorkerMessage,
    },
    /// The worker died abnormally (panic, runtime failure).
    Error {
        worker: WorkerId,
        error: String,
    },
    Exit {
        worker: WorkerId,
        code: i32,
    },
}

pub(crate) enum WorkerCommand {
    Run(Box<JobDescriptor>),
    Terminate,
}

/// Lets a running job push progress updates to the pool.
#[derive(Clone)]
pub struct ProgressReporter {
    worker: WorkerId,
    job_id: String,
    events: flume::Sender<WorkerEvent>,
}

impl ProgressReporter {
    pub fn new(
        worker: WorkerId,
        job_id: &str,
        events: flume::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            worker,
            job_id: job_id.to_string(),
            events,
        }
    }

    pub fn report(
        &self,
        progress: f64,
        message: &str,
    ) {
        let _ = self.events.send(WorkerEvent::Message {
            worker: self.worker,
            message: WorkerMessage {
                job_id: self.job_id.clone(),
                kind: MessageKind::Progress,
                progress,
                message: Some(message.to_string()),
                payload: None,
                error: None,
            },
        });
    }
}

/// The code a worker executes for every job it receives.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        job: &JobDescriptor,
        reporter: &ProgressReporter,
    ) -> Result<Value>;
}

pub(crate) struct WorkerHandle {
    commands: flume::Sender<WorkerCommand>,
}

impl WorkerHandle {
    pub(crate) fn spawn(
        id: WorkerId,
        runner: Arc<dyn JobRunner>,
        events: flume::Sender<WorkerEvent>,
    ) -> Result<Self> {
        let (tx, rx) = flume::unbounded();

        thread::Builder::new()
            .name(format!("plugflow-worker-{}", id))
            .spawn(move || {
                let code = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt.block_on(work(id, runner, rx, events.clone())),
                    Err(e) => {
                        let _ = events.send(WorkerEvent::Error {
                            worker: id,
                            error: format!("failed to start worker runtime: {}", e),
                        });
                        1
                    }
                };
                let _ = events.send(WorkerEvent::Exit {
                    worker: id,
                    code,
                });
            })
            .map_err(|e| PlugflowError::Pool(format!("failed to spawn worker {}: {}", id, e)))?;

        Ok(Self {
            commands: tx,
        })
    }

    pub(crate) fn send(
        &self,
        job: JobDescriptor,
    ) -> Result<()> {
        self.commands.send(WorkerCommand::Run(Box::new(job))).map_err(|e| PlugflowError::Pool(format!("worker is gone: {}", e)))
    }

    /// Ask the worker to stop once its current job, if any, is done.
    pub(crate) fn terminate(&self) {
        let _ = self.commands.send(WorkerCommand::Terminate);
    }
}

async fn work(
    id: WorkerId,
    runner: Arc<dyn JobRunner>,
    commands: flume::Receiver<WorkerCommand>,
    events: flume::Sender<WorkerEvent>,
) -> i32 {
    while let Ok(command) = commands.recv_async().await {
        let job = match command {
            WorkerCommand::Terminate => break,
            WorkerCommand::Run(job) => job,
        };

        debug!("worker {} runs job {}", id, job.job_id);
        let reporter = ProgressReporter::new(id, &job.job_id, events.clone());

        let (kind, payload, error) = match AssertUnwindSafe(runner.run(&job, &reporter)).catch_unwind().await {
            Ok(Ok(payload)) => (MessageKind::Success, Some(payload), None),
            Ok(Err(e)) => (MessageKind::Error, None, Some(e.to_string())),
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                error!("worker {} panicked on job {}: {}", id, job.job_id, error);
                let _ = events.send(WorkerEvent::Error {
                    worker: id,
                    error,
                });
                return 1;
            }
        };

        let _ = events.send(WorkerEvent::Message {
            worker: id,
            message: WorkerMessage {
                job_id: job.job_id.clone(),
                kind,
                progress: 100.0,
                message: None,
                payload,
                error,
            },
        });
    }

    0
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    struct Echo;

    #[async_trait]
    impl JobRunner for Echo {
        async fn run(
            &self,
            job: &JobDescriptor,
            reporter: &ProgressReporter,
        ) -> Result<Value> {
            reporter.report(50.0, "halfway");
            match job.for_each_index {
                0 => Ok(json!({"echo": job.job_id})),
                1 => Err(PlugflowError::Runtime("bad item".to_string())),
                _ => panic!("item {} is cursed", job.for_each_index),
            }
        }
    }

    async fn next(events: &flume::Receiver<WorkerEvent>) -> WorkerEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv_async()).await.unwrap().unwrap()
    }

    fn job(index: usize) -> JobDescriptor {
        JobDescriptor {
            job_id: format!("job-{}", index),
            for_each_index: index,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_worker_reports_and_survives_errors() {
        let (tx, rx) = flume::unbounded();
        let worker = WorkerHandle::spawn(7, Arc::new(Echo), tx).unwrap();

        worker.send(job(0)).unwrap();
        let WorkerEvent::Message {
            worker: 7,
            message,
        } = next(&rx).await
        else {
            panic!("expected progress");
        };
        assert_eq!(message.kind, MessageKind::Progress);
        assert_eq!(message.message.as_deref(), Some("halfway"));

        let WorkerEvent::Message {
            message, ..
        } = next(&rx).await
        else {
            panic!("expected success");
        };
        assert_eq!(message.kind, MessageKind::Success);
        assert_eq!(message.payload, Some(json!({"echo": "job-0"})));

        worker.send(job(1)).unwrap();
        next(&rx).await;
        let WorkerEvent::Message {
            message, ..
        } = next(&rx).await
        else {
            panic!("expected error message");
        };
        assert_eq!(message.kind, MessageKind::Error);
        assert_eq!(message.error.as_deref(), Some("bad item"));

        worker.terminate();
        assert_eq!(
            next(&rx).await,
            WorkerEvent::Exit {
                worker: 7,
                code: 0
            }
        );
    }

    #[tokio::test]
    async fn test_panic_is_error_then_exit() {
        let (tx, rx) = flume::unbounded();
        let worker = WorkerHandle::spawn(1, Arc::new(Echo), tx).unwrap();

        worker.send(job(2)).unwrap();
        next(&rx).await;
        assert_eq!(
            next(&rx).await,
            WorkerEvent::Error {
                worker: 1,
                error: "item 2 is cursed".to_string()
            }
        );
        assert_eq!(
            next(&rx).await,
            WorkerEvent::Exit {
                worker: 1,
                code: 1
            }
        );
    }
}
