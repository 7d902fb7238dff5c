use chrono::Utc;
use common::event::PlagiarismDetected;
use common::{PlagiarismFlag, PlagiarismPolicy, PlagiarismReport, Submission};
use tracing::{info, warn};

/// What ingesting a batch of reports did to a submission.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlagiarismOutcome {
    /// Reports newly attached.
    pub attached: usize,
    /// Reports dropped as invalid or already attached.
    pub skipped: usize,
    /// Highest similarity across every attached report.
    pub max_similarity: Option<f64>,
    /// One entry per newly attached report at or above the threshold.
    pub detections: Vec<PlagiarismDetected>,
}

impl PlagiarismOutcome {
    pub fn flagged(&self) -> bool {
        !self.detections.is_empty()
    }
}

pub fn max_similarity(reports: &[PlagiarismReport]) -> Option<f64> {
    reports.iter().map(|r| r.similarity).reduce(f64::max)
}

/// Attach reports to `submission` and apply the gating policy.
///
/// Scores are never touched. Reports arriving after grading is final are
/// still attached and still raise the advisory flag.
pub fn integrate(
    submission: &mut Submission,
    reports: Vec<PlagiarismReport>,
    policy: &PlagiarismPolicy,
    classroom_id: Option<i32>,
) -> PlagiarismOutcome {
    let mut outcome = PlagiarismOutcome::default();
    let mut fresh = Vec::new();

    for report in reports {
        if report.submission_id != submission.id {
            warn!(
                submission_id = submission.id,
                report_id = report.report_id,
                report_submission_id = report.submission_id,
                "Report belongs to another submission, skipping"
            );
            outcome.skipped += 1;
            continue;
        }
        if !(0.0..=1.0).contains(&report.similarity) {
            warn!(
                submission_id = submission.id,
                report_id = report.report_id,
                similarity = report.similarity,
                "Similarity outside [0, 1], skipping"
            );
            outcome.skipped += 1;
            continue;
        }
        if submission
            .plagiarism_reports
            .iter()
            .any(|r| r.report_id == report.report_id)
        {
            outcome.skipped += 1;
            continue;
        }
        submission.plagiarism_reports.push(report.clone());
        fresh.push(report);
        outcome.attached += 1;
    }

    outcome.max_similarity = max_similarity(&submission.plagiarism_reports);

    if !policy.enabled {
        return outcome;
    }

    if let Some(max) = outcome.max_similarity.filter(|m| *m >= policy.threshold) {
        match &mut submission.plagiarism_flag {
            Some(flag) => flag.max_similarity = flag.max_similarity.max(max),
            None => {
                submission.plagiarism_flag = Some(PlagiarismFlag {
                    max_similarity: max,
                    flagged_at: Utc::now(),
                })
            }
        }
    }

    for report in fresh.iter().filter(|r| r.similarity >= policy.threshold) {
        info!(
            submission_id = submission.id,
            compared_submission_id = report.compared_submission_id,
            similarity = report.similarity,
            grading_status = %submission.grading_status,
            "Plagiarism detected"
        );
        outcome.detections.push(PlagiarismDetected {
            submission_id: submission.id,
            assignment_id: submission.assignment_id,
            student_id: submission.student_id,
            compared_submission_id: report.compared_submission_id,
            similarity: report.similarity,
            report_id: report.report_id,
            classroom_id,
        });
    }

    outcome
}
