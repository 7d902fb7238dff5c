#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::judge_job::{JudgeJob, TestCaseData};
use common::judge_result::{CompileErrorInfo, RawJudgeResult, TestCaseOutcome, WorkerPoll};
use common::{
    Assignment, DomainEvent, EventKind, EventPayload, GradingMethod, GradingPolicy, JobHandle,
    PlagiarismPolicy,
};
use grader::config::GraderAppConfig;
use grader::{ExecutionWorker, Grader, MemoryStore, SubmissionRequest, WorkerError};

pub const ASSIGNMENT_ID: i32 = 1;
pub const CLASSROOM_ID: i32 = 11;
pub const STUDENT_ID: i32 = 42;

/// One scripted answer to `poll_job`.
#[derive(Clone, Debug)]
pub enum Step {
    Queued,
    Running,
    Complete(RawJudgeResult),
    Error(String),
    Unreachable,
}

/// Worker double. Each handle replays its script; the last step repeats.
#[derive(Default)]
pub struct ScriptedWorker {
    scripts: Mutex<HashMap<JobHandle, VecDeque<Step>>>,
    submitted: Mutex<Vec<JudgeJob>>,
    cancelled: Mutex<Vec<JobHandle>>,
    polls: Mutex<HashMap<JobHandle, u32>>,
    failing_submits: AtomicU32,
}

impl ScriptedWorker {
    pub fn script(&self, handle: &JobHandle, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(handle.clone(), steps.into());
    }

    /// Make the next `n` `submit_job` calls fail.
    pub fn fail_next_submits(&self, n: u32) {
        self.failing_submits.store(n, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<JudgeJob> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<JobHandle> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn polls(&self, handle: &JobHandle) -> u32 {
        self.polls.lock().unwrap().get(handle).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ExecutionWorker for ScriptedWorker {
    async fn submit_job(&self, job: &JudgeJob) -> Result<JobHandle, WorkerError> {
        let remaining = self.failing_submits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_submits.store(remaining - 1, Ordering::SeqCst);
            return Err(WorkerError::Unavailable("connection refused".into()));
        }
        self.submitted.lock().unwrap().push(job.clone());
        Ok(job.job_id.clone())
    }

    async fn poll_job(&self, handle: &JobHandle) -> Result<WorkerPoll, WorkerError> {
        *self.polls.lock().unwrap().entry(handle.clone()).or_default() += 1;

        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(handle) {
                Some(steps) if steps.len() > 1 => steps.pop_front(),
                Some(steps) => steps.front().cloned(),
                None => None,
            }
        };

        match step.unwrap_or(Step::Queued) {
            Step::Queued => Ok(WorkerPoll::queued()),
            Step::Running => Ok(WorkerPoll::running()),
            Step::Complete(raw) => Ok(WorkerPoll::complete(raw)),
            Step::Error(message) => Ok(WorkerPoll::error(message)),
            Step::Unreachable => Err(WorkerError::Unavailable("connection reset".into())),
        }
    }

    async fn cancel_job(&self, handle: &JobHandle) -> Result<(), WorkerError> {
        self.cancelled.lock().unwrap().push(handle.clone());
        Ok(())
    }
}

/// Ten test cases: 1-7 public, 8-10 private.
pub fn assignment(method: GradingMethod) -> Assignment {
    Assignment {
        id: ASSIGNMENT_ID,
        classroom_id: Some(CLASSROOM_ID),
        grading: GradingPolicy::new(method),
        supported_languages: vec!["cpp".into(), "python".into()],
        test_cases: (1..=10)
            .map(|id| TestCaseData {
                id,
                input: format!("{id}"),
                expected_output: format!("{}", id * 2),
                is_public: id <= 7,
            })
            .collect(),
        plagiarism: PlagiarismPolicy {
            enabled: true,
            threshold: 0.3,
        },
        max_attempts: None,
        time_limit_ms: Some(1000),
        memory_limit_kb: Some(65536),
    }
}

/// A completed run where only `failing` test cases fail.
pub fn completed(failing: &[i32]) -> Step {
    Step::Complete(RawJudgeResult {
        test_results: (1..=10)
            .map(|id| {
                let passed = !failing.contains(&id);
                TestCaseOutcome {
                    test_case_id: id,
                    passed,
                    actual_output: Some(if passed { format!("{}", id * 2) } else { "0".into() }),
                    execution_time_ms: Some(10 + id as u64),
                    memory_kb: Some(1024),
                    error_message: None,
                }
            })
            .collect(),
        ..Default::default()
    })
}

pub fn compile_error() -> Step {
    Step::Complete(RawJudgeResult {
        compile_error: Some(CompileErrorInfo {
            error_type: "COMPILATION_FAILED".into(),
            error_message: "expected ';'".into(),
            full_error: Some("main.cpp:3:5: error: expected ';'".into()),
        }),
        ..Default::default()
    })
}

pub fn request(code: &str) -> SubmissionRequest {
    SubmissionRequest {
        assignment_id: ASSIGNMENT_ID,
        student_id: STUDENT_ID,
        language: "cpp".into(),
        code: code.into(),
    }
}

pub fn fast_config() -> GraderAppConfig {
    let mut config = GraderAppConfig::default();
    config.tracker.poll_interval_ms = 10;
    config.tracker.base_delay_ms = 20;
    config.tracker.max_delay_ms = 100;
    config.tracker.job_timeout_secs = 5;
    config.tracker.sweep_interval_secs = 1;
    config
}

pub struct TestGrader {
    pub grader: Arc<Grader>,
    pub store: Arc<MemoryStore>,
    pub worker: Arc<ScriptedWorker>,
    pub events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl TestGrader {
    pub fn new(assignment: Assignment) -> Self {
        Self::with_config(assignment, fast_config())
    }

    pub fn with_config(assignment: Assignment, config: GraderAppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.put_assignment(assignment);
        let worker = Arc::new(ScriptedWorker::default());
        let grader = Arc::new(Grader::new(config, store.clone(), worker.clone()));

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let sink = events.clone();
            grader.subscribe_fn(*kind, "recorder", move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        }

        Self {
            grader,
            store,
            worker,
            events,
        }
    }

    pub fn event_kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }

    pub fn completions(&self) -> Vec<common::event::SubmissionCompleted> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::SubmissionCompleted(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }
}
