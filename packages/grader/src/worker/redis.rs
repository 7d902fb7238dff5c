use async_trait::async_trait;
use chrono::Utc;
use common::JobHandle;
use common::config::WorkerConfig;
use common::judge_job::JudgeJob;
use common::judge_result::{CompileErrorInfo, RawJudgeResult, TestCaseOutcome, WorkerPoll};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{ExecutionWorker, WorkerError};

/// Worker reached through the judge's Redis protocol.
///
/// Keys, with the default `judge` prefix:
/// - `judge:<job_id>`: hash with `data` (job JSON) and `createdAt`
/// - `judge:queue`: list the judge pops job ids from
/// - `judge:status:<job_id>`: optional progress marker written by the judge
/// - `judge:submit:verdict:<job_id>`: verdict JSON once the job finished
#[derive(Clone)]
pub struct RedisWorker {
    conn: MultiplexedConnection,
    config: WorkerConfig,
}

impl RedisWorker {
    pub async fn connect(config: WorkerConfig) -> Result<Self, WorkerError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| WorkerError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| WorkerError::Unavailable(e.to_string()))?;
        info!(url = %config.url, prefix = %config.key_prefix, "Connected to judge worker");
        Ok(Self { conn, config })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.config.key_prefix, suffix)
    }
}

fn unavailable(e: redis::RedisError) -> WorkerError {
    WorkerError::Unavailable(e.to_string())
}

#[async_trait]
impl ExecutionWorker for RedisWorker {
    async fn submit_job(&self, job: &JudgeJob) -> Result<JobHandle, WorkerError> {
        let mut conn = self.conn.clone();
        let data = json!({
            "code": job.code,
            "language": job.language,
            "mode": "submit",
            "timeLimit": job.time_limit,
            "memoryLimit": job.memory_limit,
            "testCases": job.test_cases.iter().map(|tc| json!({
                "testCaseId": tc.id,
                "input": tc.input,
                "expectedOutput": tc.expected_output,
                "isPublic": tc.is_public,
            })).collect::<Vec<_>>(),
        });

        let job_key = self.key(job.job_id.as_str());
        let fields = [
            ("data", data.to_string()),
            ("createdAt", Utc::now().timestamp_millis().to_string()),
        ];
        conn.hset_multiple::<_, _, _, ()>(&job_key, &fields)
            .await
            .map_err(unavailable)?;
        conn.lpush::<_, _, ()>(self.key(&self.config.queue_name), job.job_id.as_str())
            .await
            .map_err(unavailable)?;

        debug!(
            job_id = %job.job_id,
            submission_id = job.submission_id,
            "Enqueued judge job"
        );
        Ok(job.job_id.clone())
    }

    async fn poll_job(&self, handle: &JobHandle) -> Result<WorkerPoll, WorkerError> {
        let mut conn = self.conn.clone();
        let verdict: Option<String> = conn
            .get(self.key(&format!("submit:verdict:{handle}")))
            .await
            .map_err(unavailable)?;

        if let Some(raw) = verdict {
            return parse_verdict(&raw);
        }

        let progress: Option<String> = conn
            .get(self.key(&format!("status:{handle}")))
            .await
            .map_err(unavailable)?;

        Ok(match progress.as_deref() {
            Some("running") => WorkerPoll::running(),
            Some("error") => WorkerPoll::error("judge reported an error"),
            _ => WorkerPoll::queued(),
        })
    }

    async fn cancel_job(&self, handle: &JobHandle) -> Result<(), WorkerError> {
        let mut conn = self.conn.clone();
        conn.lrem::<_, _, ()>(self.key(&self.config.queue_name), 0, handle.as_str())
            .await
            .map_err(unavailable)?;
        conn.del::<_, ()>(self.key(handle.as_str()))
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTestResult {
    test_case_id: i32,
    #[serde(default)]
    actual: Option<String>,
    #[serde(default)]
    execution_time: Option<f64>,
    #[serde(default)]
    memory_usage: Option<f64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    passed: Option<bool>,
}

impl From<WireTestResult> for TestCaseOutcome {
    fn from(w: WireTestResult) -> Self {
        let passed = w
            .passed
            .unwrap_or_else(|| w.status.as_deref() == Some("passed"));
        Self {
            test_case_id: w.test_case_id,
            passed,
            actual_output: w.actual,
            execution_time_ms: w.execution_time.map(|t| t.max(0.0).round() as u64),
            memory_kb: w.memory_usage.map(|m| m.max(0.0).round() as u64),
            error_message: w.error.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    full_error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVerdict {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    test_results: Option<Vec<WireTestResult>>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(flatten)]
    inline_error: WireError,
}

/// Interpret the verdict the judge stored for a finished job.
///
/// Accepts a bare array of test results, an object with `testResults`, or a
/// `compile_error`/`error` status object.
pub fn parse_verdict(raw: &str) -> Result<WorkerPoll, WorkerError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| WorkerError::Protocol(e.to_string()))?;

    if value.is_array() {
        let results: Vec<WireTestResult> =
            serde_json::from_value(value).map_err(|e| WorkerError::Protocol(e.to_string()))?;
        return Ok(WorkerPoll::complete(RawJudgeResult {
            test_results: results.into_iter().map(Into::into).collect(),
            ..Default::default()
        }));
    }

    let verdict: WireVerdict =
        serde_json::from_value(value).map_err(|e| WorkerError::Protocol(e.to_string()))?;
    let error = verdict.error.unwrap_or(verdict.inline_error);

    match verdict.status.as_deref() {
        Some("compile_error") => Ok(WorkerPoll::complete(RawJudgeResult {
            compile_error: Some(CompileErrorInfo {
                error_type: error
                    .error_type
                    .unwrap_or_else(|| "COMPILATION_FAILED".into()),
                error_message: error
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Compilation failed".into()),
                full_error: error.full_error.or(error.error_message),
            }),
            ..Default::default()
        })),
        Some("error") | Some("system_error") => Ok(WorkerPoll::error(
            error
                .error_message
                .unwrap_or_else(|| "judge system error".into()),
        )),
        _ => match verdict.test_results {
            Some(results) => Ok(WorkerPoll::complete(RawJudgeResult {
                test_results: results.into_iter().map(Into::into).collect(),
                ..Default::default()
            })),
            None => Err(WorkerError::Protocol(
                "verdict has no test results".into(),
            )),
        },
    }
}
