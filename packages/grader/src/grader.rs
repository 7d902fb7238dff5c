use std::sync::Arc;

use anyhow::Result as AnyResult;
use common::event::StudentEnrolled;
use common::{
    DomainEvent, EventKind, EventPayload, JobHandle, PlagiarismReport, Submission,
};
use tracing::info;

use crate::bus::{EventBus, Subscriber, SubscriptionId};
use crate::config::GraderAppConfig;
use crate::dispatcher::{DispatchReceipt, JobDispatcher, SubmissionRequest};
use crate::error::Result;
use crate::plagiarism::PlagiarismOutcome;
use crate::service::{GradingService, ManualGradeReceipt};
use crate::storage::GradingStore;
use crate::sweeper::BackgroundTasks;
use crate::tracker::{JobVerdict, StatusTracker};
use crate::worker::ExecutionWorker;

/// Top-level context. Owns the event bus and wires the dispatcher, tracker
/// and grading service to one store and one worker.
pub struct Grader {
    config: GraderAppConfig,
    bus: Arc<EventBus>,
    service: Arc<GradingService>,
    tracker: Arc<StatusTracker>,
    dispatcher: JobDispatcher,
}

impl Grader {
    pub fn new(
        config: GraderAppConfig,
        store: Arc<dyn GradingStore>,
        worker: Arc<dyn ExecutionWorker>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let service = Arc::new(GradingService::new(store, bus.clone()));
        let tracker = Arc::new(StatusTracker::new(
            worker.clone(),
            service.clone(),
            config.tracker.clone(),
        ));
        let dispatcher = JobDispatcher::new(
            worker,
            service.clone(),
            tracker.clone(),
            bus.clone(),
            config.tracker.clone(),
            config.dispatch.clone(),
        );
        Self {
            config,
            bus,
            service,
            tracker,
            dispatcher,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub async fn submit(&self, request: SubmissionRequest) -> Result<DispatchReceipt> {
        self.dispatcher.submit(request).await
    }

    pub async fn redispatch(&self, submission_id: i32) -> Result<DispatchReceipt> {
        self.dispatcher.redispatch(submission_id).await
    }

    pub async fn job_status(&self, handle: &JobHandle) -> Result<JobVerdict> {
        self.tracker.get_status(handle).await
    }

    pub async fn await_completion(&self, handle: &JobHandle) -> Result<JobVerdict> {
        self.tracker.await_completion(handle).await
    }

    pub async fn submission(&self, id: i32) -> Result<Submission> {
        self.service.load_submission(id).await
    }

    pub async fn apply_manual_grade(
        &self,
        submission_id: i32,
        score: f64,
        feedback: Option<String>,
    ) -> Result<ManualGradeReceipt> {
        self.service
            .apply_manual_grade(submission_id, score, feedback)
            .await
    }

    pub async fn ingest_plagiarism_reports(
        &self,
        submission_id: i32,
        reports: Vec<PlagiarismReport>,
    ) -> Result<PlagiarismOutcome> {
        self.service
            .ingest_plagiarism_reports(submission_id, reports)
            .await
    }

    /// Announce an enrollment made by the classroom service.
    pub fn record_enrollment(&self, enrollment_id: i32, classroom_id: i32, student_id: i32) {
        info!(enrollment_id, classroom_id, student_id, "Student enrolled");
        self.bus
            .publish(DomainEvent::now(EventPayload::StudentEnrolled(StudentEnrolled {
                enrollment_id,
                classroom_id,
                student_id,
            })));
    }

    pub fn subscribe(&self, kind: EventKind, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.bus.subscribe(kind, subscriber)
    }

    pub fn subscribe_fn<F>(&self, kind: EventKind, id: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) -> AnyResult<()> + Send + Sync + 'static,
    {
        self.bus.subscribe_fn(kind, id, f)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Start the stuck job sweeper and the retry-state cleanup.
    pub fn spawn_background_tasks(&self) -> BackgroundTasks {
        BackgroundTasks::spawn(self.tracker.clone(), &self.config.tracker)
    }
}
