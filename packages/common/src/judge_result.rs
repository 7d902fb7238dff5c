use serde::{Deserialize, Serialize};

use crate::job_status::JobStatus;

/// Compiler failure reported by the worker instead of test results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompileErrorInfo {
    /// Machine-readable error type (e.g., "COMPILATION_FAILED").
    pub error_type: String,
    /// Short description.
    pub error_message: String,
    /// Full compiler output.
    pub full_error: Option<String>,
}

/// Raw outcome of one test case as delivered by the worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCaseOutcome {
    /// Test case ID that was executed.
    pub test_case_id: i32,
    /// Whether the output matched.
    pub passed: bool,
    /// Program stdout, absent on crash or timeout.
    pub actual_output: Option<String>,
    /// Time used in milliseconds.
    pub execution_time_ms: Option<u64>,
    /// Memory used in kilobytes.
    pub memory_kb: Option<u64>,
    /// Runtime error, if any.
    pub error_message: Option<String>,
}

/// Result payload of a completed job.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawJudgeResult {
    /// Per-test-case outcomes, in execution order.
    #[serde(default)]
    pub test_results: Vec<TestCaseOutcome>,
    /// Passed count as reported by the worker, cross-checked by the aggregator.
    pub passed_tests: Option<u32>,
    /// Total count as reported by the worker, cross-checked by the aggregator.
    pub total_tests: Option<u32>,
    /// Set instead of test results when compilation failed.
    pub compile_error: Option<CompileErrorInfo>,
}

/// One answer to a status poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoll {
    pub status: JobStatus,
    /// Present only when `status` is `Complete`.
    pub result: Option<RawJudgeResult>,
    /// Worker-side error description when `status` is `Error`.
    pub error: Option<String>,
}

impl WorkerPoll {
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            result: None,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            status: JobStatus::Running,
            result: None,
            error: None,
        }
    }

    pub fn complete(result: RawJudgeResult) -> Self {
        Self {
            status: JobStatus::Complete,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            result: None,
            error: Some(message.into()),
        }
    }
}
