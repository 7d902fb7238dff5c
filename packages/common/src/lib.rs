pub mod config;
pub mod event;
pub mod grading_status;
pub mod job_status;
pub mod judge_job;
pub mod judge_result;
pub mod retry;
pub mod submission;

pub use config::{TrackerConfig, WorkerConfig};
pub use event::{DomainEvent, EventKind, EventPayload};
pub use grading_status::GradingStatus;
pub use job_status::{JobHandle, JobStatus};
pub use submission::{
    AggregatedResult, Assignment, GradingMethod, GradingPolicy, PlagiarismFlag, PlagiarismPolicy,
    PlagiarismReport, Submission, TestResult,
};
