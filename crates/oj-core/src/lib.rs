//! Core data model of the judge worker: verdicts, task trees, wire events.

pub mod error;
pub mod events;
pub mod spec;
pub mod types;
pub mod verdict;

pub use error::JudgeError;
pub use events::{
    AuthRequest, ProblemType, RejectReason, ServerEvent, SubmissionAck, SubmissionEvent,
    SubmissionRequest, SubmissionResult,
};
pub use spec::{SpecError, collect_testdata, expand_task_table};
pub use types::{JudgeStat, LogEntry, TaskDef, TaskGroup, TaskResult, TaskSpec, TestdataPair};
pub use verdict::Verdict;
