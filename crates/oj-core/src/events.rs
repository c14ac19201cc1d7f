//! Wire-level messages exchanged with the dispatcher. The transport
//! itself lives in the worker binary; these types define the information
//! every message carries.

use serde::{Deserialize, Serialize};

use crate::types::{JudgeStat, LogMap, TaskResult};

/// Sent once on connect, before any event flows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    Regular,
    SpecialJudge,
    Interactive,
}

/// One submission to judge, as received from the dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub id: u64,
    pub problem_id: u64,
    pub code: String,
    pub problem_type: ProblemType,
    /// Flat task table; expanded by `spec::expand_task_table`.
    pub task_table: Vec<Vec<i64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UnsupportedProblem,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub pipeline_success: bool,
    pub final_stat: JudgeStat,
    pub code_length: u64,
    #[serde(default)]
    pub log: LogMap,
}

/// Outbound event stream for one submission: exactly one ack, zero or
/// more progress events, exactly one terminal `Result` or `Exception`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionEvent {
    Ack(SubmissionAck),
    PartialStat { values: Vec<TaskResult> },
    Result(SubmissionResult),
    Exception { message: String },
}

impl SubmissionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionEvent::Result(_) | SubmissionEvent::Exception { .. }
        )
    }
}

/// Inbound events from the dispatcher subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    RequestJudge(SubmissionRequest),
    AbortTask { id: u64 },
    QueryStatus,
}
