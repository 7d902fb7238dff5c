//! Grading policy: how the automatic score and an instructor's score become
//! the final score, and which grading status each step lands in.

use common::{AggregatedResult, GradingMethod, GradingPolicy, GradingStatus, Submission};
use tracing::debug;

use crate::aggregator::{Aggregation, raw_score};
use crate::error::{GraderError, Result};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

pub fn validate(policy: &GradingPolicy) -> Result<()> {
    if !(0.0..=1.0).contains(&policy.auto_weight) {
        return Err(GraderError::InvalidPolicy(format!(
            "auto_weight {} is outside [0, 1]",
            policy.auto_weight
        )));
    }
    if let Some(weight) = policy.private_weight {
        if !(0.0..=1.0).contains(&weight) {
            return Err(GraderError::InvalidPolicy(format!(
                "private_weight {weight} is outside [0, 1]"
            )));
        }
    }
    Ok(())
}

/// Automatic score for a result under `policy`.
///
/// Without a private weight this is the raw score. With one, public and
/// private pass rates are blended and rounded to two decimals; a result
/// with no private tests falls back to the raw score.
pub fn automatic_score(summary: &AggregatedResult, policy: &GradingPolicy) -> f64 {
    let Some(weight) = policy.private_weight else {
        return summary.raw_score;
    };
    if summary.private_total == 0 {
        return summary.raw_score;
    }
    let public = if summary.public_total > 0 {
        raw_score(summary.public_passed, summary.public_total) * (1.0 - weight)
    } else {
        0.0
    };
    let private = raw_score(summary.private_passed, summary.private_total) * weight;
    ((public + private) * 100.0).round() / 100.0
}

/// Weighted combination used by `Hybrid`, rounded half away from zero.
///
/// With the default weight of 0.5 this is `round((raw + manual) / 2)`.
pub fn hybrid_score(raw: f64, manual: f64, auto_weight: f64) -> f64 {
    (auto_weight * raw + (1.0 - auto_weight) * manual).round()
}

/// Record an automatic result on a submission and advance its status.
///
/// The automatic score is written once; a second call is refused.
pub fn apply_automatic(
    submission: &mut Submission,
    aggregation: Aggregation,
    policy: &GradingPolicy,
) -> Result<()> {
    validate(policy)?;
    if submission.is_judged() {
        return Err(GraderError::AlreadyJudged(submission.id));
    }

    let summary = aggregation.summary;
    let auto_score = automatic_score(&summary, policy);
    submission.passed_tests = Some(summary.passed_tests);
    submission.total_tests = Some(summary.total_tests);
    submission.auto_score = Some(auto_score);
    submission.test_results = aggregation.test_results;
    submission.judge_error = None;

    match policy.method {
        GradingMethod::Automatic => {
            submission.final_score = Some(auto_score);
            submission.grading_status = GradingStatus::Graded;
        }
        GradingMethod::Manual | GradingMethod::Hybrid => {
            // A manual grade that landed first stays in force.
            if submission
                .grading_status
                .can_advance_to(GradingStatus::SystemGraded)
            {
                submission.grading_status = GradingStatus::SystemGraded;
            }
        }
    }
    submission.aggregate = Some(summary);

    debug!(
        submission_id = submission.id,
        method = ?policy.method,
        status = %submission.grading_status,
        final_score = ?submission.final_score,
        "Applied automatic result"
    );
    Ok(())
}

/// Apply an instructor's score.
pub fn apply_manual(
    submission: &mut Submission,
    policy: &GradingPolicy,
    score: f64,
    feedback: Option<String>,
) -> Result<()> {
    validate(policy)?;
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(GraderError::OutOfRange(score));
    }

    let final_score = match policy.method {
        GradingMethod::Automatic => {
            return Err(if submission.grading_status.is_final() {
                GraderError::AlreadyFinalized(submission.id)
            } else {
                GraderError::ManualGradingNotAllowed(submission.assignment_id)
            });
        }
        GradingMethod::Manual => score,
        GradingMethod::Hybrid => {
            let raw = submission
                .auto_score
                .ok_or(GraderError::NotYetJudged(submission.id))?;
            hybrid_score(raw, score, policy.auto_weight)
        }
    };

    submission.manual_score = Some(score);
    submission.final_score = Some(final_score);
    submission.feedback = feedback;
    submission.grading_status = GradingStatus::Graded;
    Ok(())
}
