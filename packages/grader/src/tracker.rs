//! Per-handle job state machine: `queued -> running -> {complete, error}`.
//!
//! Polling a terminal job is side-effect free. The first observation of
//! `complete` hands the result to the grading pipeline exactly once, guarded
//! by an atomic per-handle flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use common::judge_job::TestCaseData;
use common::judge_result::WorkerPoll;
use common::retry::{RetryDecision, RetryTracker, calculate_backoff};
use common::{AggregatedResult, JobHandle, JobStatus, TrackerConfig};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GraderError, Result};
use crate::service::{GradingService, Handoff};
use crate::worker::ExecutionWorker;

pub const SUPERSEDED: &str = "superseded by a newer job";
pub const TIMED_OUT: &str = "job exceeded the judging timeout";

/// Snapshot of a job returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobVerdict {
    pub job_id: JobHandle,
    pub submission_id: i32,
    pub status: JobStatus,
    /// Present once the job completed and its result was recorded.
    pub result: Option<AggregatedResult>,
    /// Terminal error message, or the last transient failure while retrying.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct JobState {
    status: JobStatus,
    result: Option<AggregatedResult>,
    error: Option<String>,
    /// No worker poll before this instant.
    backoff_until: Option<Instant>,
    finished_at: Option<Instant>,
}

struct TrackedJob {
    handle: JobHandle,
    submission_id: i32,
    test_cases: Vec<TestCaseData>,
    state: StdMutex<JobState>,
    processed: AtomicBool,
    cancel: CancellationToken,
    created_at: Instant,
}

impl TrackedJob {
    fn state(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn verdict(&self) -> JobVerdict {
        let state = self.state();
        JobVerdict {
            job_id: self.handle.clone(),
            submission_id: self.submission_id,
            status: state.status,
            result: state.result.clone(),
            error: state.error.clone(),
        }
    }

    fn is_terminal(&self) -> bool {
        self.state().status.is_terminal()
    }

    /// Move to a terminal state. The first terminal state wins.
    fn finish(&self, status: JobStatus, result: Option<AggregatedResult>, error: Option<String>) {
        let mut state = self.state();
        if state.status.is_terminal() {
            return;
        }
        state.status = status;
        state.result = result;
        state.error = error;
        state.backoff_until = None;
        state.finished_at = Some(Instant::now());
    }
}

pub struct StatusTracker {
    jobs: DashMap<JobHandle, Arc<TrackedJob>>,
    worker: Arc<dyn ExecutionWorker>,
    service: Arc<GradingService>,
    retries: Arc<Mutex<RetryTracker>>,
    config: TrackerConfig,
}

impl StatusTracker {
    pub fn new(
        worker: Arc<dyn ExecutionWorker>,
        service: Arc<GradingService>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            jobs: DashMap::new(),
            worker,
            service,
            retries: Arc::new(Mutex::new(RetryTracker::new(config.max_attempts))),
            config,
        }
    }

    /// Shared retry state, for the background cleanup task.
    pub fn retry_state(&self) -> Arc<Mutex<RetryTracker>> {
        self.retries.clone()
    }

    /// Start tracking a job the worker accepted.
    pub fn register(&self, handle: JobHandle, submission_id: i32, test_cases: Vec<TestCaseData>) {
        debug!(job_id = %handle, submission_id, "Tracking job");
        self.jobs.insert(
            handle.clone(),
            Arc::new(TrackedJob {
                handle,
                submission_id,
                test_cases,
                state: StdMutex::new(JobState::default()),
                processed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                created_at: Instant::now(),
            }),
        );
    }

    fn job(&self, handle: &JobHandle) -> Result<Arc<TrackedJob>> {
        self.jobs
            .get(handle)
            .map(|j| j.value().clone())
            .ok_or_else(|| GraderError::JobNotFound(handle.clone()))
    }

    /// True while the job may still produce a result.
    pub fn is_in_flight(&self, handle: &JobHandle) -> bool {
        self.jobs
            .get(handle)
            .is_some_and(|j| !j.is_terminal() && !j.cancel.is_cancelled())
    }

    /// Current state of a job, polling the worker if it is still running.
    pub async fn get_status(&self, handle: &JobHandle) -> Result<JobVerdict> {
        let job = self.job(handle)?;

        if job.is_terminal() {
            return Ok(job.verdict());
        }

        if job.cancel.is_cancelled() {
            job.finish(JobStatus::Error, None, Some(SUPERSEDED.into()));
            return Ok(job.verdict());
        }

        if job.created_at.elapsed() > self.config.job_timeout() {
            self.expire(&job).await?;
            return Ok(job.verdict());
        }

        let backing_off = job.state().backoff_until.is_some_and(|t| Instant::now() < t);
        if backing_off {
            return Ok(job.verdict());
        }

        match self.worker.poll_job(handle).await {
            Ok(poll) => self.observe(&job, poll).await,
            Err(e) => {
                self.record_failure(&job, &e.to_string()).await?;
                Ok(job.verdict())
            }
        }
    }

    async fn observe(&self, job: &Arc<TrackedJob>, poll: WorkerPoll) -> Result<JobVerdict> {
        match poll.status {
            JobStatus::Queued | JobStatus::Running => {
                {
                    let mut state = job.state();
                    if !state.status.is_terminal() {
                        state.status = poll.status;
                        state.error = None;
                        state.backoff_until = None;
                    }
                }
                // Only consecutive failures count against the job.
                self.retries.lock().await.clear(job.handle.as_str());
            }
            JobStatus::Error => {
                let message = poll.error.unwrap_or_else(|| "worker reported an error".into());
                self.record_failure(job, &message).await?;
            }
            JobStatus::Complete => {
                let Some(raw) = poll.result else {
                    self.record_failure(job, "worker completed without a result")
                        .await?;
                    return Ok(job.verdict());
                };

                if job
                    .processed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Another poller owns the hand-off.
                    return Ok(job.verdict());
                }

                match self
                    .service
                    .handle_completion(&job.handle, job.submission_id, &raw, &job.test_cases)
                    .await
                {
                    Ok(Handoff::Applied(summary)) => {
                        self.retries.lock().await.clear(job.handle.as_str());
                        job.finish(JobStatus::Complete, Some(summary), None);
                    }
                    Ok(Handoff::Stale) | Err(GraderError::AlreadyJudged(_)) => {
                        job.finish(JobStatus::Error, None, Some(SUPERSEDED.into()));
                    }
                    Err(GraderError::CompilationFailed(message)) => {
                        job.processed.store(false, Ordering::Release);
                        info!(
                            job_id = %job.handle,
                            submission_id = job.submission_id,
                            "Submission failed to compile"
                        );
                        self.fail(job, &message).await?;
                    }
                    Err(GraderError::MalformedResult(reason)) => {
                        job.processed.store(false, Ordering::Release);
                        warn!(
                            job_id = %job.handle,
                            submission_id = job.submission_id,
                            reason = %reason,
                            "Malformed judge result"
                        );
                        self.record_failure(job, &format!("malformed result: {reason}"))
                            .await?;
                    }
                    Err(e) => {
                        job.processed.store(false, Ordering::Release);
                        return Err(e);
                    }
                }
            }
        }
        Ok(job.verdict())
    }

    async fn record_failure(&self, job: &Arc<TrackedJob>, message: &str) -> Result<()> {
        let decision = self
            .retries
            .lock()
            .await
            .record_failure(job.handle.as_str(), message);

        match decision {
            RetryDecision::Retry { attempt, .. } => {
                let delay = calculate_backoff(
                    attempt,
                    self.config.base_delay_ms,
                    self.config.max_delay_ms,
                );
                info!(
                    job_id = %job.handle,
                    submission_id = job.submission_id,
                    attempt,
                    max_attempts = self.config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = message,
                    "Transient job failure, retrying after backoff"
                );
                let mut state = job.state();
                state.error = Some(message.to_string());
                state.backoff_until = Some(Instant::now() + delay);
                Ok(())
            }
            RetryDecision::Exhausted { history } => {
                warn!(
                    job_id = %job.handle,
                    submission_id = job.submission_id,
                    attempts = history.len(),
                    error = message,
                    "Retries exhausted"
                );
                self.fail(job, message).await
            }
        }
    }

    /// Resolve the job to the terminal error verdict.
    async fn fail(&self, job: &Arc<TrackedJob>, message: &str) -> Result<()> {
        if job.processed.load(Ordering::Acquire) {
            // A hand-off is in progress and decides the outcome.
            return Ok(());
        }
        self.retries.lock().await.clear(job.handle.as_str());
        self.service
            .handle_failure(&job.handle, job.submission_id, message)
            .await?;
        job.finish(JobStatus::Error, None, Some(message.to_string()));
        Ok(())
    }

    /// Past the judging timeout: ask the worker once more, then give up.
    ///
    /// A result the worker already produced is still handed off.
    async fn expire(&self, job: &Arc<TrackedJob>) -> Result<()> {
        match self.worker.poll_job(&job.handle).await {
            Ok(poll) if poll.status == JobStatus::Complete => {
                self.observe(job, poll).await?;
            }
            Ok(_) => {}
            Err(e) => debug!(job_id = %job.handle, error = %e, "Final poll failed"),
        }
        if !job.is_terminal() {
            self.fail(job, TIMED_OUT).await?;
        }
        Ok(())
    }

    /// Drive a job to a terminal verdict, sleeping between polls.
    pub async fn await_completion(&self, handle: &JobHandle) -> Result<JobVerdict> {
        let job = self.job(handle)?;
        loop {
            let verdict = self.get_status(handle).await?;
            if verdict.status.is_terminal() {
                return Ok(verdict);
            }

            let wait = self.next_wait(&job);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = job.cancel.cancelled() => {}
            }
        }
    }

    fn next_wait(&self, job: &TrackedJob) -> Duration {
        let poll = self.config.poll_interval();
        let backoff = job
            .state()
            .backoff_until
            .map(|t| t.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        poll.max(backoff)
    }

    /// Cancel a job that a newer dispatch replaced. Its result will be
    /// discarded whenever it arrives.
    pub async fn supersede(&self, handle: &JobHandle) {
        if let Some(job) = self.jobs.get(handle).map(|j| j.value().clone()) {
            job.cancel.cancel();
            job.finish(JobStatus::Error, None, Some(SUPERSEDED.into()));
        }
        self.retries.lock().await.clear(handle.as_str());

        if let Err(e) = self.worker.cancel_job(handle).await {
            warn!(job_id = %handle, error = %e, "Failed to withdraw superseded job");
        }
        info!(job_id = %handle, "Superseded job");
    }

    /// Expire every non-terminal job older than the judging timeout.
    pub async fn sweep_stuck(&self) -> usize {
        let timeout = self.config.job_timeout();
        let stuck: Vec<Arc<TrackedJob>> = self
            .jobs
            .iter()
            .filter(|j| !j.is_terminal() && j.created_at.elapsed() > timeout)
            .map(|j| j.value().clone())
            .collect();

        let mut resolved = 0;
        for job in stuck {
            match self.expire(&job).await {
                Ok(()) if job.is_terminal() => resolved += 1,
                Ok(()) => {}
                Err(e) => warn!(
                    job_id = %job.handle,
                    submission_id = job.submission_id,
                    error = %e,
                    "Failed to resolve stuck job"
                ),
            }
        }
        resolved
    }

    /// Forget terminal jobs that finished more than `max_age` ago.
    pub fn evict_terminal(&self, max_age: Duration) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            job.state()
                .finished_at
                .is_none_or(|t| t.elapsed() < max_age)
        });
        before - self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
