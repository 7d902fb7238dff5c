use std::sync::Arc;

use common::event::SubmissionCreated;
use common::judge_job::JudgeJob;
use common::retry::calculate_backoff;
use common::{Assignment, DomainEvent, EventPayload, JobHandle, Submission, TrackerConfig};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::bus::EventBus;
use crate::config::DispatchConfig;
use crate::error::{GraderError, Result};
use crate::policy;
use crate::service::GradingService;
use crate::storage::NewSubmission;
use crate::tracker::StatusTracker;
use crate::worker::ExecutionWorker;

/// A student's request to have code judged.
#[derive(Clone, Debug, Deserialize)]
pub struct SubmissionRequest {
    pub assignment_id: i32,
    pub student_id: i32,
    pub language: String,
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispatchReceipt {
    pub submission_id: i32,
    pub job: JobHandle,
    /// True when an identical in-flight dispatch was returned instead of a
    /// new one.
    pub reused: bool,
    /// Which of the student's submissions to the assignment this is, from 1.
    pub attempt: u32,
}

/// (assignment_id, student_id)
type SlotKey = (i32, i32);

#[derive(Clone, Debug)]
struct SlotEntry {
    submission_id: i32,
    handle: JobHandle,
    attempt: u32,
    language: String,
    code: String,
}

pub struct JobDispatcher {
    worker: Arc<dyn ExecutionWorker>,
    service: Arc<GradingService>,
    tracker: Arc<StatusTracker>,
    bus: Arc<EventBus>,
    slots: DashMap<SlotKey, SlotEntry>,
    slot_locks: DashMap<SlotKey, Arc<Mutex<()>>>,
    retry: TrackerConfig,
    limits: DispatchConfig,
}

impl JobDispatcher {
    pub fn new(
        worker: Arc<dyn ExecutionWorker>,
        service: Arc<GradingService>,
        tracker: Arc<StatusTracker>,
        bus: Arc<EventBus>,
        retry: TrackerConfig,
        limits: DispatchConfig,
    ) -> Self {
        Self {
            worker,
            service,
            tracker,
            bus,
            slots: DashMap::new(),
            slot_locks: DashMap::new(),
            retry,
            limits,
        }
    }

    fn slot_lock(&self, key: SlotKey) -> Arc<Mutex<()>> {
        self.slot_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn validate(&self, request: &SubmissionRequest, assignment: &Assignment) -> Result<()> {
        if request.code.trim().is_empty() {
            return Err(GraderError::InvalidSubmission("code is empty".into()));
        }
        let length = request.code.chars().count();
        if length > self.limits.max_code_length {
            return Err(GraderError::InvalidSubmission(format!(
                "code is {length} characters, limit is {}",
                self.limits.max_code_length
            )));
        }
        if !assignment.supports_language(&request.language) {
            return Err(GraderError::InvalidLanguage {
                language: request.language.clone(),
                assignment_id: assignment.id,
            });
        }
        if assignment.test_cases.is_empty() {
            return Err(GraderError::InvalidSubmission(format!(
                "assignment {} has no test cases",
                assignment.id
            )));
        }
        policy::validate(&assignment.grading)
    }

    /// Create a submission and start judging it.
    ///
    /// `SubmissionCreated` is published once the worker accepted the job.
    #[instrument(skip(self, request), fields(assignment_id = request.assignment_id, student_id = request.student_id))]
    pub async fn submit(&self, request: SubmissionRequest) -> Result<DispatchReceipt> {
        let key = (request.assignment_id, request.student_id);
        let lock = self.slot_lock(key);
        let _guard = lock.lock().await;

        let assignment = self.service.load_assignment(request.assignment_id).await?;
        self.validate(&request, &assignment)?;

        if let Some(entry) = self.slots.get(&key).map(|e| e.value().clone()) {
            if self.tracker.is_in_flight(&entry.handle) {
                if entry.code == request.code && entry.language == request.language {
                    info!(
                        submission_id = entry.submission_id,
                        job_id = %entry.handle,
                        "Identical submission in flight, reusing job"
                    );
                    return Ok(DispatchReceipt {
                        submission_id: entry.submission_id,
                        job: entry.handle,
                        reused: true,
                        attempt: entry.attempt,
                    });
                }
                return Err(GraderError::DuplicateInFlight {
                    existing: entry.handle,
                });
            }
        }

        let used = self
            .service
            .store()
            .count_attempts(request.assignment_id, request.student_id)
            .await?;
        if let Some(max_attempts) = assignment.max_attempts {
            if used >= max_attempts {
                return Err(GraderError::AttemptsExhausted {
                    student_id: request.student_id,
                    max_attempts,
                });
            }
        }

        let submission = self
            .service
            .store()
            .create_submission(NewSubmission {
                student_id: request.student_id,
                assignment_id: request.assignment_id,
                language: request.language.clone(),
                code: request.code.clone(),
            })
            .await?;

        let handle = self.start_job(&submission, &assignment).await?;

        self.slots.insert(
            key,
            SlotEntry {
                submission_id: submission.id,
                handle: handle.clone(),
                attempt: used + 1,
                language: request.language,
                code: request.code,
            },
        );

        self.bus.publish(DomainEvent::now(EventPayload::SubmissionCreated(
            SubmissionCreated {
                submission_id: submission.id,
                assignment_id: submission.assignment_id,
                student_id: submission.student_id,
                classroom_id: assignment.classroom_id,
            },
        )));

        info!(
            submission_id = submission.id,
            job_id = %handle,
            attempt = used + 1,
            "Submission dispatched"
        );
        Ok(DispatchReceipt {
            submission_id: submission.id,
            job: handle,
            reused: false,
            attempt: used + 1,
        })
    }

    /// Judge an existing submission again, superseding its current job.
    #[instrument(skip(self))]
    pub async fn redispatch(&self, submission_id: i32) -> Result<DispatchReceipt> {
        let submission = self.service.load_submission(submission_id).await?;
        let key = (submission.assignment_id, submission.student_id);
        let lock = self.slot_lock(key);
        let _guard = lock.lock().await;

        // Re-read under the slot lock.
        let submission = self.service.load_submission(submission_id).await?;
        if submission.is_judged() {
            return Err(GraderError::AlreadyJudged(submission_id));
        }
        let assignment = self.service.load_assignment(submission.assignment_id).await?;
        policy::validate(&assignment.grading)?;

        // Detach first: once this returns, the old job's result can no longer
        // land, even while the replacement waits on the worker.
        let submission = match submission.active_job.clone() {
            Some(old) => {
                let submission = self.service.detach_job(submission_id, &old).await?;
                if submission.is_judged() {
                    return Err(GraderError::AlreadyJudged(submission_id));
                }
                self.tracker.supersede(&old).await;
                submission
            }
            None => submission,
        };

        let handle = self.start_job(&submission, &assignment).await?;
        let attempt = self
            .service
            .store()
            .count_attempts(submission.assignment_id, submission.student_id)
            .await?;
        self.slots.insert(
            key,
            SlotEntry {
                submission_id,
                handle: handle.clone(),
                attempt,
                language: submission.language.clone(),
                code: submission.code.clone(),
            },
        );

        info!(submission_id, job_id = %handle, "Submission re-dispatched");
        Ok(DispatchReceipt {
            submission_id,
            job: handle,
            reused: false,
            attempt,
        })
    }

    /// Hand the job to the worker, retrying transient failures with backoff.
    async fn start_job(&self, submission: &Submission, assignment: &Assignment) -> Result<JobHandle> {
        let job = JudgeJob::new(
            submission.id,
            assignment.id,
            submission.code.clone(),
            submission.language.clone(),
            assignment.time_limit_ms,
            assignment.memory_limit_kb,
            assignment.test_cases.clone(),
        );

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u8 = 0;
        let handle = loop {
            attempt += 1;
            match self.worker.submit_job(&job).await {
                Ok(handle) => break handle,
                Err(e) if attempt < max_attempts => {
                    let delay =
                        calculate_backoff(attempt, self.retry.base_delay_ms, self.retry.max_delay_ms);
                    warn!(
                        submission_id = submission.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Worker rejected job, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let message = e.to_string();
                    self.service
                        .record_dispatch_failure(submission.id, &message)
                        .await?;
                    return Err(GraderError::WorkerUnavailable(message));
                }
            }
        };

        self.service.set_active_job(submission.id, &handle).await?;
        self.tracker
            .register(handle.clone(), submission.id, assignment.test_cases.clone());
        Ok(handle)
    }
}
