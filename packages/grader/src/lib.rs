pub mod aggregator;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod grader;
pub mod plagiarism;
pub mod policy;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod tracker;
pub mod worker;

pub use bus::{EventBus, Subscriber, SubscriptionId};
pub use dispatcher::{DispatchReceipt, SubmissionRequest};
pub use error::{ErrorClass, GraderError, Result};
pub use grader::Grader;
pub use service::ManualGradeReceipt;
pub use storage::{GradingStore, MemoryStore};
pub use tracker::JobVerdict;
pub use worker::{ExecutionWorker, RedisWorker, WorkerError};
