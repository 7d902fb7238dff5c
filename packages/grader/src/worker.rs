pub mod redis;

use async_trait::async_trait;
use common::JobHandle;
use common::judge_job::JudgeJob;
use common::judge_result::WorkerPoll;
use thiserror::Error;

pub use self::redis::RedisWorker;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker or its queue cannot be reached right now.
    #[error("worker unavailable: {0}")]
    Unavailable(String),

    /// The worker answered with something we cannot interpret.
    #[error("worker protocol error: {0}")]
    Protocol(String),
}

/// External code-execution worker.
#[async_trait]
pub trait ExecutionWorker: Send + Sync {
    /// Hand a job to the worker. Returns the handle the worker will answer to.
    async fn submit_job(&self, job: &JudgeJob) -> Result<JobHandle, WorkerError>;

    /// Current state of a job; carries the raw result once complete.
    async fn poll_job(&self, handle: &JobHandle) -> Result<WorkerPoll, WorkerError>;

    /// Best-effort withdrawal of a job that was superseded.
    async fn cancel_job(&self, _handle: &JobHandle) -> Result<(), WorkerError> {
        Ok(())
    }
}
