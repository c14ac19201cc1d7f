//! The per-submission judge pipeline: compile, sandboxed runs, output
//! checking, grading, and the handler that streams results back.

pub mod checker;
pub mod handler;
pub mod pipeline;
pub mod report;

pub use checker::{Checker, CheckerInput, CheckerOutput, TolerantDiff};
pub use handler::{HandlerConfig, handle_submission};
pub use pipeline::{JudgePipeline, PipelineConfig, ScoreBoard, TaskRun};
pub use report::{RunFlags, SandboxReport, determine_verdict};
