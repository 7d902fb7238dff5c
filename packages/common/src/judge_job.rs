use serde::{Deserialize, Serialize};

use crate::job_status::JobHandle;

/// Test case data needed for judging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCaseData {
    /// Test case ID
    pub id: i32,
    /// Input data to feed to the program
    pub input: String,
    /// Expected output for comparison
    pub expected_output: String,
    /// Whether the result is shown to the student. Private cases still count.
    pub is_public: bool,
}

/// A judge job handed to the execution worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeJob {
    /// Job identifier
    pub job_id: JobHandle,
    /// ID of the submission being judged
    pub submission_id: i32,
    /// ID of the assignment
    pub assignment_id: i32,
    /// Source code
    pub code: String,
    /// Programming language (e.g., "cpp", "python")
    pub language: String,
    /// Time limit in milliseconds
    pub time_limit: Option<u32>,
    /// Memory limit in kilobytes
    pub memory_limit: Option<u32>,
    /// Test cases to run
    pub test_cases: Vec<TestCaseData>,
}

impl JudgeJob {
    /// Create a new judge job with a generated handle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        submission_id: i32,
        assignment_id: i32,
        code: String,
        language: String,
        time_limit: Option<u32>,
        memory_limit: Option<u32>,
        test_cases: Vec<TestCaseData>,
    ) -> Self {
        Self {
            job_id: JobHandle::generate(),
            submission_id,
            assignment_id,
            code,
            language,
            time_limit,
            memory_limit,
            test_cases,
        }
    }
}
