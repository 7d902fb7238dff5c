use chrono::Utc;
use common::{EventKind, GradingMethod, GradingStatus, JobStatus, PlagiarismReport};
use grader::{ErrorClass, GraderError};

use crate::harness::*;

/// Submit, script a run with the given failing cases and wait for it.
async fn judged(t: &TestGrader, failing: &[i32]) -> i32 {
    let receipt = t.grader.submit(request("int main() {}")).await.unwrap();
    t.worker
        .script(&receipt.job, vec![Step::Running, completed(failing)]);
    let verdict = t.grader.await_completion(&receipt.job).await.unwrap();
    assert_eq!(verdict.status, JobStatus::Complete);
    receipt.submission_id
}

mod automatic {
    use super::*;

    #[tokio::test]
    async fn eight_of_ten_is_graded_eighty() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));

        // one public and one private failure
        let id = judged(&t, &[3, 9]).await;

        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.grading_status, GradingStatus::Graded);
        assert_eq!(sub.final_score, Some(80.0));
        assert_eq!(sub.auto_score, Some(80.0));
        assert_eq!((sub.passed_tests, sub.total_tests), (Some(8), Some(10)));
        assert_eq!(sub.test_results.len(), 10);
        assert!(sub.invariant_violations().is_empty());

        assert_eq!(
            t.event_kinds(),
            vec![EventKind::SubmissionCreated, EventKind::SubmissionCompleted]
        );
        let completed = &t.completions()[0];
        assert_eq!(completed.raw_score, 80.0);
        assert_eq!(completed.final_score, Some(80.0));
        assert_eq!((completed.public_passed, completed.public_total), (6, 7));
        assert_eq!((completed.private_passed, completed.private_total), (2, 3));
        assert_eq!(completed.classroom_id, Some(CLASSROOM_ID));
        assert!(completed.average_runtime_ms.is_some());
    }

    #[tokio::test]
    async fn compile_error_is_a_judging_error_not_a_grade() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let receipt = t.grader.submit(request("int main() {")).await.unwrap();
        t.worker.script(&receipt.job, vec![compile_error()]);

        let verdict = t.grader.await_completion(&receipt.job).await.unwrap();

        assert_eq!(verdict.status, JobStatus::Error);
        assert!(verdict.error.as_deref().is_some_and(|m| m.contains("expected ';'")));
        assert!(verdict.result.is_none());
        // No retries are spent on a deterministic failure.
        assert_eq!(t.worker.polls(&receipt.job), 1);

        let sub = t.grader.submission(receipt.submission_id).await.unwrap();
        assert_eq!(sub.grading_status, GradingStatus::Pending);
        assert_eq!(sub.final_score, None);
        assert_eq!(sub.auto_score, None);
        assert!(sub.judge_error.as_deref().is_some_and(|m| m.contains("expected ';'")));
        assert!(sub.test_results.is_empty());
        assert!(t.completions().is_empty());
    }

    #[tokio::test]
    async fn instructor_cannot_override_automatic_grade() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let id = judged(&t, &[3, 9]).await;

        let err = t
            .grader
            .apply_manual_grade(id, 100.0, None)
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::AlreadyFinalized(i) if i == id));
        assert_eq!(err.class(), ErrorClass::Rejected);
        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.final_score, Some(80.0));
        assert_eq!(t.completions().len(), 1);
    }

    #[tokio::test]
    async fn pending_automatic_submission_refuses_manual_grade() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let receipt = t.grader.submit(request("int main() {}")).await.unwrap();

        let err = t
            .grader
            .apply_manual_grade(receipt.submission_id, 50.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GraderError::ManualGradingNotAllowed(ASSIGNMENT_ID)));
    }
}

mod manual {
    use super::*;

    #[tokio::test]
    async fn system_graded_until_instructor_grades() {
        let t = TestGrader::new(assignment(GradingMethod::Manual));
        let id = judged(&t, &[3, 9]).await;

        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.grading_status, GradingStatus::SystemGraded);
        assert_eq!(sub.final_score, None);
        assert_eq!(sub.passed_tests, Some(8));

        let receipt = t
            .grader
            .apply_manual_grade(id, 90.0, Some("Good job".into()))
            .await
            .unwrap();

        assert_eq!(receipt.submission_id, id);
        assert_eq!(receipt.final_score, 90.0);
        assert_eq!(receipt.grading_status, GradingStatus::Graded);

        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.feedback.as_deref(), Some("Good job"));
        assert!(sub.invariant_violations().is_empty());

        let completions = t.completions();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[1].final_score, Some(90.0));
        assert_eq!(completions[1].passed_tests, 8);
    }

    #[tokio::test]
    async fn out_of_range_score_changes_nothing() {
        let t = TestGrader::new(assignment(GradingMethod::Manual));
        let id = judged(&t, &[]).await;

        for bad in [-1.0, 100.01, f64::NAN] {
            let err = t.grader.apply_manual_grade(id, bad, None).await.unwrap_err();
            assert!(matches!(err, GraderError::OutOfRange(_)));
            assert_eq!(err.class(), ErrorClass::InvalidInput);
        }

        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.grading_status, GradingStatus::SystemGraded);
        assert_eq!(t.completions().len(), 1);
    }

    #[tokio::test]
    async fn grade_before_judging_survives_the_automatic_result() {
        let t = TestGrader::new(assignment(GradingMethod::Manual));
        let receipt = t.grader.submit(request("int main() {}")).await.unwrap();

        t.grader
            .apply_manual_grade(receipt.submission_id, 75.0, None)
            .await
            .unwrap();
        t.worker.script(&receipt.job, vec![completed(&[1, 2, 3, 4, 5])]);
        t.grader.await_completion(&receipt.job).await.unwrap();

        let sub = t.grader.submission(receipt.submission_id).await.unwrap();
        assert_eq!(sub.grading_status, GradingStatus::Graded);
        assert_eq!(sub.final_score, Some(75.0));
        assert_eq!(sub.auto_score, Some(50.0));
        assert!(sub.invariant_violations().is_empty());
    }

    #[tokio::test]
    async fn regrade_replaces_the_score() {
        let t = TestGrader::new(assignment(GradingMethod::Manual));
        let id = judged(&t, &[]).await;

        t.grader.apply_manual_grade(id, 60.0, None).await.unwrap();
        let receipt = t.grader.apply_manual_grade(id, 85.0, None).await.unwrap();

        assert_eq!(receipt.final_score, 85.0);
        assert_eq!(t.completions().len(), 3);
    }
}

mod hybrid {
    use super::*;

    #[tokio::test]
    async fn averages_raw_and_manual() {
        let t = TestGrader::new(assignment(GradingMethod::Hybrid));
        let id = judged(&t, &[3, 9]).await;

        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.grading_status, GradingStatus::SystemGraded);

        let receipt = t.grader.apply_manual_grade(id, 60.0, None).await.unwrap();

        assert_eq!(receipt.final_score, 70.0);
        assert_eq!(receipt.grading_status, GradingStatus::Graded);
        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.manual_score, Some(60.0));
        assert_eq!(sub.auto_score, Some(80.0));
    }

    #[tokio::test]
    async fn private_tests_can_outweigh_public_ones() {
        let mut a = assignment(GradingMethod::Automatic);
        a.grading.private_weight = Some(0.6);
        let t = TestGrader::new(a);

        // public 6/7, private 2/3
        let id = judged(&t, &[3, 9]).await;

        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.final_score, Some(74.29));
        assert_eq!(t.completions()[0].raw_score, 80.0);
        assert_eq!(t.completions()[0].final_score, Some(74.29));
    }

    #[tokio::test]
    async fn configured_weight_is_honoured() {
        let mut a = assignment(GradingMethod::Hybrid);
        a.grading.auto_weight = 0.75;
        let t = TestGrader::new(a);
        let id = judged(&t, &[3, 9]).await;

        let receipt = t.grader.apply_manual_grade(id, 60.0, None).await.unwrap();
        assert_eq!(receipt.final_score, 75.0);
    }

    #[tokio::test]
    async fn manual_grade_needs_automatic_result() {
        let t = TestGrader::new(assignment(GradingMethod::Hybrid));
        let receipt = t.grader.submit(request("int main() {}")).await.unwrap();

        let err = t
            .grader
            .apply_manual_grade(receipt.submission_id, 60.0, None)
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::NotYetJudged(_)));
        let sub = t.grader.submission(receipt.submission_id).await.unwrap();
        assert_eq!(sub.grading_status, GradingStatus::Pending);
    }
}

mod plagiarism {
    use super::*;

    fn report(report_id: i32, submission_id: i32, similarity: f64) -> PlagiarismReport {
        PlagiarismReport {
            report_id,
            submission_id,
            compared_submission_id: 500 + report_id,
            similarity,
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn report_on_graded_submission_flags_without_changing_grade() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let id = judged(&t, &[3, 9]).await;

        let outcome = t
            .grader
            .ingest_plagiarism_reports(id, vec![report(1, id, 0.95)])
            .await
            .unwrap();

        assert!(outcome.flagged());
        let sub = t.grader.submission(id).await.unwrap();
        assert_eq!(sub.final_score, Some(80.0));
        assert_eq!(sub.grading_status, GradingStatus::Graded);
        assert_eq!(sub.plagiarism_reports.len(), 1);
        assert_eq!(sub.plagiarism_flag.unwrap().max_similarity, 0.95);
        assert_eq!(
            t.event_kinds().last(),
            Some(&EventKind::PlagiarismDetected)
        );
    }

    #[tokio::test]
    async fn reingesting_a_report_fires_once() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let id = judged(&t, &[]).await;

        for _ in 0..3 {
            t.grader
                .ingest_plagiarism_reports(id, vec![report(1, id, 0.5)])
                .await
                .unwrap();
        }

        let detections = t
            .event_kinds()
            .into_iter()
            .filter(|k| *k == EventKind::PlagiarismDetected)
            .count();
        assert_eq!(detections, 1);
    }

    #[tokio::test]
    async fn disabled_gating_only_attaches() {
        let mut a = assignment(GradingMethod::Automatic);
        a.plagiarism.enabled = false;
        let t = TestGrader::new(a);
        let id = judged(&t, &[]).await;

        let outcome = t
            .grader
            .ingest_plagiarism_reports(id, vec![report(1, id, 0.99)])
            .await
            .unwrap();

        assert_eq!(outcome.attached, 1);
        assert!(!outcome.flagged());
        assert!(!t.event_kinds().contains(&EventKind::PlagiarismDetected));
    }

    #[tokio::test]
    async fn reports_for_unknown_submission_are_rejected() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let err = t
            .grader
            .ingest_plagiarism_reports(77, vec![report(1, 77, 0.9)])
            .await
            .unwrap_err();
        assert!(matches!(err, GraderError::SubmissionNotFound(77)));
    }
}
