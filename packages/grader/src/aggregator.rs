//! Turns a worker's raw payload into counts and a raw score.
//!
//! Only partitions and counts; weighting public against private results is
//! a policy decision made downstream. A compile error is not a result.

use std::collections::HashSet;

use common::judge_job::TestCaseData;
use common::judge_result::RawJudgeResult;
use common::{AggregatedResult, TestResult};

use crate::error::{GraderError, Result};

/// Output of [`aggregate`]: the counts plus the per-test records to store.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub summary: AggregatedResult,
    pub test_results: Vec<TestResult>,
}

pub fn raw_score(passed: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * f64::from(passed) / f64::from(total)
    }
}

pub fn aggregate(raw: &RawJudgeResult, test_cases: &[TestCaseData]) -> Result<Aggregation> {
    if let Some(compile_error) = &raw.compile_error {
        // Nothing ran, so there is nothing to count.
        let message = compile_error
            .full_error
            .clone()
            .unwrap_or_else(|| compile_error.error_message.clone());
        return Err(GraderError::CompilationFailed(message));
    }

    if raw.test_results.is_empty() && raw.total_tests.is_none() {
        return Err(GraderError::MalformedResult(
            "result carries neither test results nor counts".into(),
        ));
    }

    let mut seen = HashSet::with_capacity(raw.test_results.len());
    let mut test_results = Vec::with_capacity(raw.test_results.len());
    for outcome in &raw.test_results {
        if !test_cases.iter().any(|tc| tc.id == outcome.test_case_id) {
            return Err(GraderError::MalformedResult(format!(
                "unknown test case {}",
                outcome.test_case_id
            )));
        }
        if !seen.insert(outcome.test_case_id) {
            return Err(GraderError::MalformedResult(format!(
                "test case {} reported twice",
                outcome.test_case_id
            )));
        }
        test_results.push(TestResult {
            test_case_id: outcome.test_case_id,
            passed: outcome.passed,
            actual_output: outcome.actual_output.clone(),
            execution_time_ms: outcome.execution_time_ms,
            memory_kb: outcome.memory_kb,
            error_message: outcome.error_message.clone(),
        });
    }

    if test_results.len() != test_cases.len() {
        return Err(GraderError::MalformedResult(format!(
            "expected {} test results, got {}",
            test_cases.len(),
            test_results.len()
        )));
    }

    let summary = count(test_cases, &test_results)?;

    if let Some(total) = raw.total_tests {
        if total != summary.total_tests {
            return Err(GraderError::MalformedResult(format!(
                "reported total {total} disagrees with {} results",
                summary.total_tests
            )));
        }
    }
    if let Some(passed) = raw.passed_tests {
        if passed != summary.passed_tests {
            return Err(GraderError::MalformedResult(format!(
                "reported passed count {passed} disagrees with {} passing results",
                summary.passed_tests
            )));
        }
    }

    Ok(Aggregation {
        summary,
        test_results,
    })
}

fn count(test_cases: &[TestCaseData], results: &[TestResult]) -> Result<AggregatedResult> {
    let mut summary = AggregatedResult::default();
    let mut runtime_sum: u64 = 0;
    let mut runtime_count: u64 = 0;

    for result in results {
        let Some(tc) = test_cases.iter().find(|tc| tc.id == result.test_case_id) else {
            return Err(GraderError::MalformedResult(format!(
                "unknown test case {}",
                result.test_case_id
            )));
        };
        let passed = u32::from(result.passed);
        if tc.is_public {
            summary.public_total += 1;
            summary.public_passed += passed;
        } else {
            summary.private_total += 1;
            summary.private_passed += passed;
        }
        if let Some(ms) = result.execution_time_ms {
            runtime_sum = runtime_sum.saturating_add(ms);
            runtime_count += 1;
        }
    }

    summary.passed_tests = summary.public_passed + summary.private_passed;
    summary.total_tests = summary.public_total + summary.private_total;
    summary.raw_score = raw_score(summary.passed_tests, summary.total_tests);
    summary.average_runtime_ms = (runtime_count > 0)
        .then(|| (runtime_sum as f64 / runtime_count as f64).round() as u64);

    Ok(summary)
}
