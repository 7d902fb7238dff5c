use common::{EventKind, GradingMethod, GradingStatus, JobStatus};
use grader::{ErrorClass, GraderError, SubmissionRequest};

use crate::harness::*;

mod submission_dispatch {
    use super::*;

    #[tokio::test]
    async fn accepted_dispatch_publishes_created_before_any_result() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));

        let receipt = t.grader.submit(request("int main() {}")).await.unwrap();

        assert!(!receipt.reused);
        assert_eq!(receipt.attempt, 1);
        assert_eq!(t.event_kinds(), vec![EventKind::SubmissionCreated]);

        let submission = t.grader.submission(receipt.submission_id).await.unwrap();
        assert_eq!(submission.grading_status, GradingStatus::Pending);
        assert_eq!(submission.active_job.as_ref(), Some(&receipt.job));
        assert_eq!(submission.final_score, None);

        let jobs = t.worker.submitted();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].test_cases.len(), 10);
        assert_eq!(jobs[0].time_limit, Some(1000));

        let verdict = t.grader.job_status(&receipt.job).await.unwrap();
        assert_eq!(verdict.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn created_event_carries_classroom() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        t.grader.submit(request("int main() {}")).await.unwrap();

        let events = t.events.lock().unwrap();
        match &events[0].payload {
            common::EventPayload::SubmissionCreated(p) => {
                assert_eq!(p.student_id, STUDENT_ID);
                assert_eq!(p.classroom_id, Some(CLASSROOM_ID));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn language_match_is_case_insensitive() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let mut req = request("print(1)");
        req.language = "Python".into();
        assert!(t.grader.submit(req).await.is_ok());
    }
}

mod slot_exclusivity {
    use super::*;

    #[tokio::test]
    async fn identical_resubmission_reuses_in_flight_job() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));

        let first = t.grader.submit(request("int main() {}")).await.unwrap();
        let second = t.grader.submit(request("int main() {}")).await.unwrap();

        assert!(second.reused);
        assert_eq!(second.job, first.job);
        assert_eq!(second.attempt, 1);
        assert_eq!(second.submission_id, first.submission_id);
        assert_eq!(t.store.submissions().len(), 1);
        assert_eq!(t.worker.submitted().len(), 1);
        assert_eq!(t.event_kinds(), vec![EventKind::SubmissionCreated]);
    }

    #[tokio::test]
    async fn different_code_while_in_flight_is_rejected() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));

        let first = t.grader.submit(request("int main() {}")).await.unwrap();
        let err = t
            .grader
            .submit(request("int main() { return 0; }"))
            .await
            .unwrap_err();

        match &err {
            GraderError::DuplicateInFlight { existing } => assert_eq!(existing, &first.job),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert_eq!(t.store.submissions().len(), 1);
    }

    #[tokio::test]
    async fn other_students_have_their_own_slot() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));

        t.grader.submit(request("int main() {}")).await.unwrap();
        let other = t
            .grader
            .submit(SubmissionRequest {
                student_id: STUDENT_ID + 1,
                ..request("int main() { return 1; }")
            })
            .await
            .unwrap();

        assert!(!other.reused);
        assert_eq!(t.store.submissions().len(), 2);
    }

    #[tokio::test]
    async fn slot_frees_once_the_job_is_terminal() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));

        let first = t.grader.submit(request("int main() {}")).await.unwrap();
        t.worker.script(&first.job, vec![completed(&[])]);
        t.grader.await_completion(&first.job).await.unwrap();

        let second = t.grader.submit(request("int main() {}")).await.unwrap();
        assert!(!second.reused);
        assert_eq!(second.attempt, 2);
        assert_ne!(second.submission_id, first.submission_id);
    }
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let mut req = request("fn main() {}");
        req.language = "rust".into();

        let err = t.grader.submit(req).await.unwrap_err();

        assert!(matches!(err, GraderError::InvalidLanguage { ref language, assignment_id: ASSIGNMENT_ID } if language == "rust"));
        assert_eq!(err.class(), ErrorClass::InvalidInput);
        assert!(t.store.submissions().is_empty());
        assert!(t.event_kinds().is_empty());
    }

    #[tokio::test]
    async fn empty_and_oversized_code_are_rejected() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));

        let err = t.grader.submit(request("   \n")).await.unwrap_err();
        assert!(matches!(err, GraderError::InvalidSubmission(_)));

        let huge = "x".repeat(10_001);
        let err = t.grader.submit(request(&huge)).await.unwrap_err();
        assert!(matches!(err, GraderError::InvalidSubmission(_)));

        assert!(t.store.submissions().is_empty());
    }

    #[tokio::test]
    async fn assignment_without_test_cases_is_rejected() {
        let mut a = assignment(GradingMethod::Automatic);
        a.test_cases.clear();
        let t = TestGrader::new(a);

        let err = t.grader.submit(request("int main() {}")).await.unwrap_err();
        assert!(matches!(err, GraderError::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn unknown_assignment_is_reported() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        let err = t
            .grader
            .submit(SubmissionRequest {
                assignment_id: 999,
                ..request("int main() {}")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraderError::AssignmentNotFound(999)));
    }

    #[tokio::test]
    async fn attempt_limit_is_enforced() {
        let mut a = assignment(GradingMethod::Automatic);
        a.max_attempts = Some(1);
        let t = TestGrader::new(a);

        let first = t.grader.submit(request("int main() {}")).await.unwrap();
        t.worker.script(&first.job, vec![completed(&[])]);
        t.grader.await_completion(&first.job).await.unwrap();

        let err = t
            .grader
            .submit(request("int main() { return 0; }"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraderError::AttemptsExhausted {
                student_id: STUDENT_ID,
                max_attempts: 1
            }
        ));
        assert_eq!(err.class(), ErrorClass::Rejected);
    }

    #[tokio::test]
    async fn out_of_range_hybrid_weight_is_a_policy_error() {
        let mut a = assignment(GradingMethod::Hybrid);
        a.grading.auto_weight = 1.2;
        let t = TestGrader::new(a);

        let err = t.grader.submit(request("int main() {}")).await.unwrap_err();
        assert!(matches!(err, GraderError::InvalidPolicy(_)));
    }
}

mod worker_availability {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn transient_submit_failures_are_retried() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        t.worker.fail_next_submits(2);

        let receipt = t.grader.submit(request("int main() {}")).await.unwrap();

        assert_eq!(t.worker.submitted().len(), 1);
        assert_eq!(t.worker.submitted()[0].job_id, receipt.job);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_worker_fails_dispatch_without_limbo() {
        let t = TestGrader::new(assignment(GradingMethod::Automatic));
        t.worker.fail_next_submits(3);

        let err = t.grader.submit(request("int main() {}")).await.unwrap_err();

        assert!(matches!(err, GraderError::WorkerUnavailable(_)));
        assert_eq!(err.code(), "WORKER_UNAVAILABLE");
        assert!(t.event_kinds().is_empty());

        let stored = t.store.submissions();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].grading_status, GradingStatus::Pending);
        assert_eq!(stored[0].active_job, None);
        assert!(stored[0].judge_error.is_some());
    }
}
