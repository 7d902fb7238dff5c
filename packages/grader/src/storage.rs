use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{Assignment, Submission};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Fields of a submission known at creation time.
#[derive(Clone, Debug)]
pub struct NewSubmission {
    pub student_id: i32,
    pub assignment_id: i32,
    pub language: String,
    pub code: String,
}

/// Records the orchestrator reads and writes. The backing database is owned
/// by the platform; this is the whole contract the core needs from it.
#[async_trait]
pub trait GradingStore: Send + Sync {
    async fn assignment(&self, id: i32) -> Result<Option<Assignment>, StorageError>;

    /// Persist a new pending submission and return it with its identity.
    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StorageError>;

    async fn submission(&self, id: i32) -> Result<Option<Submission>, StorageError>;

    /// Overwrite an existing submission record.
    async fn save_submission(&self, submission: &Submission) -> Result<(), StorageError>;

    /// Number of submissions a student made on an assignment.
    async fn count_attempts(&self, assignment_id: i32, student_id: i32)
    -> Result<u32, StorageError>;
}

/// In-process store used by the CLI and the tests.
#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI32,
    assignments: DashMap<i32, Assignment>,
    submissions: DashMap<i32, Submission>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_assignment(&self, assignment: Assignment) {
        self.assignments.insert(assignment.id, assignment);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        let mut all: Vec<Submission> = self.submissions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }
}

#[async_trait]
impl GradingStore for MemoryStore {
    async fn assignment(&self, id: i32) -> Result<Option<Assignment>, StorageError> {
        Ok(self.assignments.get(&id).map(|a| a.value().clone()))
    }

    async fn create_submission(&self, new: NewSubmission) -> Result<Submission, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut submission =
            Submission::new(id, new.student_id, new.assignment_id, new.language, new.code);
        submission.submitted_at = Utc::now();
        self.submissions.insert(id, submission.clone());
        Ok(submission)
    }

    async fn submission(&self, id: i32) -> Result<Option<Submission>, StorageError> {
        Ok(self.submissions.get(&id).map(|s| s.value().clone()))
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StorageError> {
        match self.submissions.get_mut(&submission.id) {
            Some(mut existing) => {
                *existing = submission.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "submission {}",
                submission.id
            ))),
        }
    }

    async fn count_attempts(
        &self,
        assignment_id: i32,
        student_id: i32,
    ) -> Result<u32, StorageError> {
        Ok(self
            .submissions
            .iter()
            .filter(|s| s.assignment_id == assignment_id && s.student_id == student_id)
            .count() as u32)
    }
}
