use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::grading_status::GradingStatus;
use crate::submission::{AggregatedResult, Submission, TestResult};

/// Event category used as the subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SubmissionCreated,
    SubmissionCompleted,
    StudentEnrolled,
    PlagiarismDetected,
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        Self::SubmissionCreated,
        Self::SubmissionCompleted,
        Self::StudentEnrolled,
        Self::PlagiarismDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmissionCreated => "SUBMISSION_CREATED",
            Self::SubmissionCompleted => "SUBMISSION_COMPLETED",
            Self::StudentEnrolled => "STUDENT_ENROLLED",
            Self::PlagiarismDetected => "PLAGIARISM_DETECTED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionCreated {
    pub submission_id: i32,
    pub assignment_id: i32,
    pub student_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionCompleted {
    pub submission_id: i32,
    pub assignment_id: i32,
    pub student_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<i32>,
    pub grading_status: GradingStatus,
    pub raw_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    pub passed_tests: u32,
    pub total_tests: u32,
    pub public_passed: u32,
    pub public_total: u32,
    pub private_passed: u32,
    pub private_total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_runtime_ms: Option<u64>,
    pub test_results: Vec<TestResult>,
}

impl SubmissionCompleted {
    /// Build the payload from a judged submission.
    pub fn from_submission(
        submission: &Submission,
        aggregate: &AggregatedResult,
        classroom_id: Option<i32>,
    ) -> Self {
        Self {
            submission_id: submission.id,
            assignment_id: submission.assignment_id,
            student_id: submission.student_id,
            classroom_id,
            grading_status: submission.grading_status,
            raw_score: aggregate.raw_score,
            final_score: submission.final_score,
            passed_tests: aggregate.passed_tests,
            total_tests: aggregate.total_tests,
            public_passed: aggregate.public_passed,
            public_total: aggregate.public_total,
            private_passed: aggregate.private_passed,
            private_total: aggregate.private_total,
            average_runtime_ms: aggregate.average_runtime_ms,
            test_results: submission.test_results.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StudentEnrolled {
    pub enrollment_id: i32,
    pub classroom_id: i32,
    pub student_id: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismDetected {
    pub submission_id: i32,
    pub assignment_id: i32,
    pub student_id: i32,
    pub compared_submission_id: i32,
    pub similarity: f64,
    pub report_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classroom_id: Option<i32>,
}

/// Payload of a domain event, tagged by kind on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    SubmissionCreated(SubmissionCreated),
    SubmissionCompleted(SubmissionCompleted),
    StudentEnrolled(StudentEnrolled),
    PlagiarismDetected(PlagiarismDetected),
}

/// Immutable, timestamped domain event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Stamp a payload with the current time.
    pub fn now(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::SubmissionCreated(_) => EventKind::SubmissionCreated,
            EventPayload::SubmissionCompleted(_) => EventKind::SubmissionCompleted,
            EventPayload::StudentEnrolled(_) => EventKind::StudentEnrolled,
            EventPayload::PlagiarismDetected(_) => EventKind::PlagiarismDetected,
        }
    }

    /// Submission the event refers to, if any.
    pub fn submission_id(&self) -> Option<i32> {
        match &self.payload {
            EventPayload::SubmissionCreated(p) => Some(p.submission_id),
            EventPayload::SubmissionCompleted(p) => Some(p.submission_id),
            EventPayload::PlagiarismDetected(p) => Some(p.submission_id),
            EventPayload::StudentEnrolled(_) => None,
        }
    }
}

impl From<SubmissionCreated> for EventPayload {
    fn from(value: SubmissionCreated) -> Self {
        Self::SubmissionCreated(value)
    }
}

impl From<SubmissionCompleted> for EventPayload {
    fn from(value: SubmissionCompleted) -> Self {
        Self::SubmissionCompleted(value)
    }
}

impl From<StudentEnrolled> for EventPayload {
    fn from(value: StudentEnrolled) -> Self {
        Self::StudentEnrolled(value)
    }
}

impl From<PlagiarismDetected> for EventPayload {
    fn from(value: PlagiarismDetected) -> Self {
        Self::PlagiarismDetected(value)
    }
}
