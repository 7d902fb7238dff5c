//! Every write to a submission record goes through [`GradingService`], under
//! that submission's lock. Automatic hand-off, manual grading and plagiarism
//! ingestion therefore never interleave on one submission.

use std::sync::Arc;

use common::event::SubmissionCompleted;
use common::judge_job::TestCaseData;
use common::judge_result::RawJudgeResult;
use common::{
    AggregatedResult, Assignment, DomainEvent, EventPayload, GradingStatus, JobHandle,
    PlagiarismReport, Submission,
};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::aggregator;
use crate::bus::EventBus;
use crate::error::{GraderError, Result};
use crate::plagiarism::{self, PlagiarismOutcome};
use crate::policy;
use crate::storage::GradingStore;

/// Result of handing a completed job to the grading pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum Handoff {
    /// The result was recorded on the submission.
    Applied(AggregatedResult),
    /// The job is no longer the submission's active job; nothing was written.
    Stale,
}

/// Returned to the instructor after a manual grade.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManualGradeReceipt {
    pub submission_id: i32,
    pub final_score: f64,
    pub grading_status: GradingStatus,
}

pub struct GradingService {
    store: Arc<dyn GradingStore>,
    bus: Arc<EventBus>,
    locks: DashMap<i32, Arc<Mutex<()>>>,
}

impl GradingService {
    pub fn new(store: Arc<dyn GradingStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn GradingStore> {
        &self.store
    }

    async fn lock(&self, submission_id: i32) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(submission_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub async fn load_submission(&self, id: i32) -> Result<Submission> {
        self.store
            .submission(id)
            .await?
            .ok_or(GraderError::SubmissionNotFound(id))
    }

    pub async fn load_assignment(&self, id: i32) -> Result<Assignment> {
        self.store
            .assignment(id)
            .await?
            .ok_or(GraderError::AssignmentNotFound(id))
    }

    /// Make `handle` the only job whose result may land on the submission.
    pub async fn set_active_job(&self, submission_id: i32, handle: &JobHandle) -> Result<()> {
        let _guard = self.lock(submission_id).await;
        let mut submission = self.load_submission(submission_id).await?;
        submission.active_job = Some(handle.clone());
        submission.judge_error = None;
        self.store.save_submission(&submission).await?;
        Ok(())
    }

    /// Stop `handle` from landing on the submission before a replacement job
    /// exists. Returns the submission as it stands afterwards.
    pub async fn detach_job(&self, submission_id: i32, handle: &JobHandle) -> Result<Submission> {
        let _guard = self.lock(submission_id).await;
        let mut submission = self.load_submission(submission_id).await?;
        if submission.active_job.as_ref() == Some(handle) {
            submission.active_job = None;
            self.store.save_submission(&submission).await?;
            debug!(submission_id, job_id = %handle, "Detached job");
        }
        Ok(submission)
    }

    /// Aggregate and grade a completed job's result.
    ///
    /// A `MalformedResult` leaves the submission untouched so the job can be
    /// polled again.
    pub async fn handle_completion(
        &self,
        handle: &JobHandle,
        submission_id: i32,
        raw: &RawJudgeResult,
        test_cases: &[TestCaseData],
    ) -> Result<Handoff> {
        let guard = self.lock(submission_id).await;
        let mut submission = self.load_submission(submission_id).await?;

        if submission.active_job.as_ref() != Some(handle) {
            info!(
                submission_id,
                job_id = %handle,
                active_job = ?submission.active_job,
                "Discarding result of superseded job"
            );
            return Ok(Handoff::Stale);
        }

        let assignment = self.load_assignment(submission.assignment_id).await?;
        let aggregation = aggregator::aggregate(raw, test_cases)?;
        let summary = aggregation.summary.clone();

        policy::apply_automatic(&mut submission, aggregation, &assignment.grading)?;
        submission.active_job = None;
        self.store.save_submission(&submission).await?;
        drop(guard);

        info!(
            submission_id,
            job_id = %handle,
            passed = summary.passed_tests,
            total = summary.total_tests,
            raw_score = summary.raw_score,
            grading_status = %submission.grading_status,
            "Recorded automatic result"
        );

        self.bus.publish(DomainEvent::now(EventPayload::SubmissionCompleted(
            SubmissionCompleted::from_submission(&submission, &summary, assignment.classroom_id),
        )));

        Ok(Handoff::Applied(summary))
    }

    /// Record the terminal error verdict. Grading status is left as it was.
    ///
    /// Returns false when `handle` is no longer the active job.
    pub async fn handle_failure(
        &self,
        handle: &JobHandle,
        submission_id: i32,
        message: &str,
    ) -> Result<bool> {
        let _guard = self.lock(submission_id).await;
        let mut submission = self.load_submission(submission_id).await?;

        if submission.active_job.as_ref() != Some(handle) {
            debug!(submission_id, job_id = %handle, "Failure of inactive job ignored");
            return Ok(false);
        }

        submission.active_job = None;
        submission.judge_error = Some(message.to_string());
        self.store.save_submission(&submission).await?;

        warn!(
            submission_id,
            job_id = %handle,
            error = message,
            grading_status = %submission.grading_status,
            "Judging failed"
        );
        Ok(true)
    }

    /// The worker never accepted a job for this submission.
    pub async fn record_dispatch_failure(&self, submission_id: i32, message: &str) -> Result<()> {
        let _guard = self.lock(submission_id).await;
        let mut submission = self.load_submission(submission_id).await?;
        submission.active_job = None;
        submission.judge_error = Some(message.to_string());
        self.store.save_submission(&submission).await?;
        Ok(())
    }

    pub async fn apply_manual_grade(
        &self,
        submission_id: i32,
        score: f64,
        feedback: Option<String>,
    ) -> Result<ManualGradeReceipt> {
        let guard = self.lock(submission_id).await;
        let mut submission = self.load_submission(submission_id).await?;
        let assignment = self.load_assignment(submission.assignment_id).await?;

        policy::apply_manual(&mut submission, &assignment.grading, score, feedback)?;
        self.store.save_submission(&submission).await?;
        drop(guard);

        let final_score = submission.final_score.unwrap_or(score);
        info!(
            submission_id,
            manual_score = score,
            final_score,
            "Applied manual grade"
        );

        let aggregate = submission.aggregate.clone().unwrap_or_default();
        self.bus.publish(DomainEvent::now(EventPayload::SubmissionCompleted(
            SubmissionCompleted::from_submission(&submission, &aggregate, assignment.classroom_id),
        )));

        Ok(ManualGradeReceipt {
            submission_id,
            final_score,
            grading_status: submission.grading_status,
        })
    }

    pub async fn ingest_plagiarism_reports(
        &self,
        submission_id: i32,
        reports: Vec<PlagiarismReport>,
    ) -> Result<PlagiarismOutcome> {
        let guard = self.lock(submission_id).await;
        let mut submission = self.load_submission(submission_id).await?;
        let assignment = self.load_assignment(submission.assignment_id).await?;

        let outcome = plagiarism::integrate(
            &mut submission,
            reports,
            &assignment.plagiarism,
            assignment.classroom_id,
        );
        if outcome.attached > 0 {
            self.store.save_submission(&submission).await?;
        }
        drop(guard);

        for detection in &outcome.detections {
            self.bus.publish(DomainEvent::now(EventPayload::PlagiarismDetected(
                detection.clone(),
            )));
        }
        Ok(outcome)
    }
}
