use thiserror::Error;

use common::JobHandle;

use crate::storage::StorageError;
use crate::worker::WorkerError;

/// How a caller should react to a [`GraderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; the same request may succeed later.
    Retryable,
    /// The request itself is wrong and must be fixed.
    InvalidInput,
    /// The request is valid but this submission cannot be graded this way.
    Rejected,
    /// Fault inside the orchestrator or one of its collaborators.
    Internal,
}

#[derive(Debug, Error)]
pub enum GraderError {
    #[error("Execution worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Language '{language}' is not supported by assignment {assignment_id}")]
    InvalidLanguage { language: String, assignment_id: i32 },

    #[error("Submission slot already has job {existing} in flight")]
    DuplicateInFlight { existing: JobHandle },

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Student {student_id} has used all {max_attempts} attempts")]
    AttemptsExhausted { student_id: i32, max_attempts: u32 },

    #[error("Malformed judge result: {0}")]
    MalformedResult(String),

    #[error("Compilation failed: {0}")]
    CompilationFailed(String),

    #[error("Submission {0} already holds an automatic result")]
    AlreadyJudged(i32),

    #[error("Submission {0} has no automatic result yet")]
    NotYetJudged(i32),

    #[error("Submission {0} is already finalized by automatic grading")]
    AlreadyFinalized(i32),

    #[error("Manual grading is not allowed for automatic assignment {0}")]
    ManualGradingNotAllowed(i32),

    #[error("Score {0} is outside [0, 100]")]
    OutOfRange(f64),

    #[error("Invalid grading policy: {0}")]
    InvalidPolicy(String),

    #[error("Submission {0} not found")]
    SubmissionNotFound(i32),

    #[error("Assignment {0} not found")]
    AssignmentNotFound(i32),

    #[error("Job {0} is not tracked")]
    JobNotFound(JobHandle),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl GraderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::WorkerUnavailable(_) | Self::DuplicateInFlight { .. } => ErrorClass::Retryable,
            Self::MalformedResult(_) => ErrorClass::Retryable,
            Self::InvalidLanguage { .. }
            | Self::InvalidSubmission(_)
            | Self::OutOfRange(_)
            | Self::SubmissionNotFound(_)
            | Self::AssignmentNotFound(_)
            | Self::JobNotFound(_) => ErrorClass::InvalidInput,
            Self::AttemptsExhausted { .. }
            | Self::CompilationFailed(_)
            | Self::AlreadyJudged(_)
            | Self::NotYetJudged(_)
            | Self::AlreadyFinalized(_)
            | Self::ManualGradingNotAllowed(_) => ErrorClass::Rejected,
            Self::InvalidPolicy(_) | Self::Storage(_) | Self::Config(_) => ErrorClass::Internal,
        }
    }

    /// Short machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkerUnavailable(_) => "WORKER_UNAVAILABLE",
            Self::InvalidLanguage { .. } => "INVALID_LANGUAGE",
            Self::DuplicateInFlight { .. } => "DUPLICATE_IN_FLIGHT",
            Self::InvalidSubmission(_) => "INVALID_SUBMISSION",
            Self::AttemptsExhausted { .. } => "ATTEMPTS_EXHAUSTED",
            Self::MalformedResult(_) => "MALFORMED_RESULT",
            Self::CompilationFailed(_) => "COMPILATION_FAILED",
            Self::AlreadyJudged(_) => "ALREADY_JUDGED",
            Self::NotYetJudged(_) => "NOT_YET_JUDGED",
            Self::AlreadyFinalized(_) => "ALREADY_FINALIZED",
            Self::ManualGradingNotAllowed(_) => "MANUAL_GRADING_NOT_ALLOWED",
            Self::OutOfRange(_) => "OUT_OF_RANGE",
            Self::InvalidPolicy(_) => "INVALID_POLICY",
            Self::SubmissionNotFound(_) => "SUBMISSION_NOT_FOUND",
            Self::AssignmentNotFound(_) => "ASSIGNMENT_NOT_FOUND",
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<WorkerError> for GraderError {
    fn from(e: WorkerError) -> Self {
        GraderError::WorkerUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraderError>;
