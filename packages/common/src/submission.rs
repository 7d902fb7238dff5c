use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grading_status::GradingStatus;
use crate::job_status::JobHandle;
use crate::judge_job::TestCaseData;

/// Weight of the automatic score under `Hybrid` grading when not configured.
pub const DEFAULT_HYBRID_AUTO_WEIGHT: f64 = 0.5;

/// Similarity at or above which a submission is flagged when not configured.
pub const DEFAULT_PLAGIARISM_THRESHOLD: f64 = 0.3;

/// How automatic and manual scores combine for an assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradingMethod {
    Automatic,
    Manual,
    Hybrid,
}

/// Per-assignment grading composition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradingPolicy {
    pub method: GradingMethod,
    /// Share of the automatic score in a `Hybrid` final score, in `[0, 1]`.
    #[serde(default = "default_auto_weight")]
    pub auto_weight: f64,
    /// Share of private tests in the automatic score, in `[0, 1]`. Absent
    /// means the automatic score is the plain pass rate.
    #[serde(default)]
    pub private_weight: Option<f64>,
}

fn default_auto_weight() -> f64 {
    DEFAULT_HYBRID_AUTO_WEIGHT
}

impl GradingPolicy {
    pub fn new(method: GradingMethod) -> Self {
        Self {
            method,
            auto_weight: DEFAULT_HYBRID_AUTO_WEIGHT,
            private_weight: None,
        }
    }

    pub fn with_auto_weight(mut self, auto_weight: f64) -> Self {
        self.auto_weight = auto_weight;
        self
    }

    pub fn with_private_weight(mut self, private_weight: f64) -> Self {
        self.private_weight = Some(private_weight);
        self
    }
}

/// Per-assignment plagiarism gating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_PLAGIARISM_THRESHOLD
}

impl Default for PlagiarismPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_PLAGIARISM_THRESHOLD,
        }
    }
}

/// Assignment settings the orchestrator reads. Owned by the classroom service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i32,
    #[serde(default)]
    pub classroom_id: Option<i32>,
    pub grading: GradingPolicy,
    pub supported_languages: Vec<String>,
    pub test_cases: Vec<TestCaseData>,
    #[serde(default)]
    pub plagiarism: PlagiarismPolicy,
    /// Maximum number of submissions per student, unlimited when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Time limit in milliseconds forwarded to the worker.
    #[serde(default)]
    pub time_limit_ms: Option<u32>,
    /// Memory limit in kilobytes forwarded to the worker.
    #[serde(default)]
    pub memory_limit_kb: Option<u32>,
}

impl Assignment {
    pub fn supports_language(&self, language: &str) -> bool {
        self.supported_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language))
    }
}

/// Counts produced by the result aggregator.
///
/// The public/private split is carried unweighted to every downstream stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub passed_tests: u32,
    pub total_tests: u32,
    pub public_passed: u32,
    pub public_total: u32,
    pub private_passed: u32,
    pub private_total: u32,
    /// `100 * passed / total`, or 0 when there are no tests.
    pub raw_score: f64,
    /// Mean execution time over results that reported one.
    pub average_runtime_ms: Option<u64>,
}

/// Stored outcome of one test case. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case_id: i32,
    pub passed: bool,
    pub actual_output: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub error_message: Option<String>,
}

/// Similarity report produced by the external detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismReport {
    pub report_id: i32,
    pub submission_id: i32,
    pub compared_submission_id: i32,
    /// Similarity in `[0, 1]`.
    pub similarity: f64,
    pub checked_at: DateTime<Utc>,
}

/// Advisory flag raised by plagiarism gating. Never changes a grade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismFlag {
    pub max_similarity: f64,
    pub flagged_at: DateTime<Utc>,
}

/// One attempt by one student on one assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i32,
    pub student_id: i32,
    pub assignment_id: i32,
    pub language: String,
    pub code: String,
    pub submitted_at: DateTime<Utc>,
    pub passed_tests: Option<u32>,
    pub total_tests: Option<u32>,
    /// Full breakdown behind `passed_tests`/`total_tests`.
    pub aggregate: Option<AggregatedResult>,
    pub grading_status: GradingStatus,
    pub auto_score: Option<f64>,
    pub manual_score: Option<f64>,
    pub final_score: Option<f64>,
    pub test_results: Vec<TestResult>,
    pub plagiarism_reports: Vec<PlagiarismReport>,
    pub plagiarism_flag: Option<PlagiarismFlag>,
    pub feedback: Option<String>,
    /// Job whose result is allowed to land on this submission.
    pub active_job: Option<JobHandle>,
    /// Set when the judging job ended in the terminal error verdict.
    pub judge_error: Option<String>,
}

impl Submission {
    pub fn new(
        id: i32,
        student_id: i32,
        assignment_id: i32,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            student_id,
            assignment_id,
            language: language.into(),
            code: code.into(),
            submitted_at: Utc::now(),
            passed_tests: None,
            total_tests: None,
            aggregate: None,
            grading_status: GradingStatus::Pending,
            auto_score: None,
            manual_score: None,
            final_score: None,
            test_results: Vec::new(),
            plagiarism_reports: Vec::new(),
            plagiarism_flag: None,
            feedback: None,
            active_job: None,
            judge_error: None,
        }
    }

    /// Returns true once an automatic result has been recorded.
    pub fn is_judged(&self) -> bool {
        self.auto_score.is_some()
    }

    /// Checks the record-level invariants.
    pub fn invariant_violations(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if self.final_score.is_some() != self.grading_status.is_final() {
            violations.push("final_score must be set iff grading status is graded");
        }
        if let (Some(passed), Some(total)) = (self.passed_tests, self.total_tests) {
            if passed > total {
                violations.push("passed_tests exceeds total_tests");
            }
        }
        if let Some(agg) = &self.aggregate {
            if agg.public_passed + agg.private_passed != agg.passed_tests {
                violations.push("public_passed + private_passed != passed_tests");
            }
            if Some(agg.passed_tests) != self.passed_tests
                || Some(agg.total_tests) != self.total_tests
            {
                violations.push("aggregate disagrees with recorded counts");
            }
        }
        violations
    }
}
