//! Translates one incoming submission request into the outbound event
//! stream: one acknowledgement, one partial-stat bundle, one terminal
//! result or exception.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use oj_core::error::JudgeError;
use oj_core::events::{
    ProblemType, RejectReason, SubmissionAck, SubmissionEvent, SubmissionRequest, SubmissionResult,
};
use oj_core::spec::{collect_testdata, expand_task_table};
use oj_core::types::{JudgeStat, TaskResult};
use oj_core::verdict::Verdict;
use oj_process::{Journal, Journals};

use crate::checker::TolerantDiff;
use crate::pipeline::{JudgePipeline, PipelineConfig, ScoreBoard};
use crate::report::{RunFlags, determine_verdict};

#[derive(Clone, Debug, Default)]
pub struct HandlerConfig {
    /// Root directory holding `<problem_id>/<label>.{in,out}`.
    pub testdata_root: PathBuf,
    pub pipeline: PipelineConfig,
}

/// Judge one submission, emitting events in order.
///
/// Any failure inside the judge itself surfaces as a single terminal
/// exception event; the returned error only reports a dead event
/// channel, which nobody downstream can observe anyway.
pub async fn handle_submission(
    config: &HandlerConfig,
    req: &SubmissionRequest,
    events: &mpsc::Sender<SubmissionEvent>,
) -> Result<()> {
    match judge_submission(config, req, events).await {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.is::<ChannelClosed>() {
                return Err(err);
            }
            error!(submission = req.id, "judging failed: {err:#}");
            let message = render_failure(&err);
            emit(events, SubmissionEvent::Exception { message }).await
        }
    }
}

/// Terminal exception text: known judge errors carry their own detail,
/// anything else is reported as uncaught with the full error chain.
fn render_failure(err: &anyhow::Error) -> String {
    match err.downcast_ref::<JudgeError>() {
        Some(judge_err) => judge_err.detail(),
        None => format!("uncaught error while judging:\n{err:?}"),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("submission event channel closed")]
struct ChannelClosed;

async fn emit(events: &mpsc::Sender<SubmissionEvent>, event: SubmissionEvent) -> Result<()> {
    events.send(event).await.map_err(|_| ChannelClosed.into())
}

async fn judge_submission(
    config: &HandlerConfig,
    req: &SubmissionRequest,
    events: &mpsc::Sender<SubmissionEvent>,
) -> Result<()> {
    if req.problem_type != ProblemType::Regular {
        warn!(
            submission = req.id,
            problem_type = ?req.problem_type,
            "only regular problems are supported; rejecting"
        );
        return emit(
            events,
            SubmissionEvent::Ack(SubmissionAck {
                id: req.id,
                reject_reason: Some(RejectReason::UnsupportedProblem),
            }),
        )
        .await;
    }

    emit(
        events,
        SubmissionEvent::Ack(SubmissionAck {
            id: req.id,
            reject_reason: None,
        }),
    )
    .await?;

    let spec = expand_task_table(&req.task_table).map_err(JudgeError::from)?;

    let problem_dir = config.testdata_root.join(req.problem_id.to_string());
    let (testdata, missing) = collect_testdata(&spec, &problem_dir);
    if !missing.is_empty() {
        return Err(JudgeError::TestdataMissing {
            problem_id: req.problem_id,
            missing,
        }
        .into());
    }

    let build_dir = &config.pipeline.build_dir;
    let scratch_dir = &config.pipeline.scratch_dir;
    for dir in [build_dir, scratch_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let journals = Journals::new(
        Journal::create(&scratch_dir.join("judge.stdout.log"))?,
        Journal::create(&scratch_dir.join("judge.stderr.log"))?,
    );
    let mut pipeline = JudgePipeline::new(
        config.pipeline.clone(),
        Box::new(TolerantDiff),
        journals,
    );

    let src_path = build_dir.join("program.cpp");
    std::fs::write(&src_path, &req.code)
        .with_context(|| format!("failed to write user source to {}", src_path.display()))?;
    let code_length = req.code.len() as u64;
    info!(submission = req.id, code_length, "wrote user source");

    let program_path = build_dir.join("program");
    let built = pipeline
        .build(&src_path, &program_path, "-DONLINE_JUDGE")
        .await?;

    if !built {
        pipeline.finalize()?;
        return emit(
            events,
            SubmissionEvent::Result(SubmissionResult {
                pipeline_success: true,
                final_stat: JudgeStat::from_verdict(Verdict::Ce),
                code_length,
                log: pipeline.take_log_map(),
            }),
        )
        .await;
    }

    let mut board = ScoreBoard::new();
    let mut results: Vec<TaskResult> = Vec::with_capacity(spec.task_count());
    let mut task_idx = 0usize;

    for group in &spec.groups {
        if group.index == 0 && !group.tasks.is_empty() {
            info!("------ judging samples ------");
        } else if group.index == 1 {
            info!("------ judging real tasks ------");
        }
        board.begin_group(group);

        for task in &group.tasks {
            let pair = &testdata[task_idx];
            task_idx += 1;

            let run = pipeline
                .run_task(task, &pair.input, build_dir, &["./program"], "")
                .await?;

            let mut verdict = determine_verdict(
                &run.report,
                task.time_limit_ms,
                RunFlags {
                    stdout_ole: run.stdout_ole,
                    process_failed: run.process_failed,
                },
            )?;

            if verdict == Verdict::Pending {
                verdict = pipeline
                    .check(&run, &pair.input, &pair.expected, verdict)?
                    .verdict;
            }

            let time_used_ms = run.report.time_ms()?;
            let mem_used_bytes = run.report.max_memory_bytes()?;
            run.clean()?;

            info!(task = %task.label, verdict = %verdict, time_used_ms, "task judged");
            board.record(task, verdict);
            results.push(TaskResult {
                task_group: group.index,
                subtask: task.number,
                stat: JudgeStat {
                    verdict,
                    score: 0,
                    time_used_ms,
                    mem_used_bytes,
                },
            });
        }

        board.end_group();
    }

    emit(events, SubmissionEvent::PartialStat { values: results }).await?;

    pipeline.finalize()?;
    emit(
        events,
        SubmissionEvent::Result(SubmissionResult {
            pipeline_success: true,
            final_stat: JudgeStat {
                verdict: board.final_verdict(),
                score: board.score_total(),
                time_used_ms: 0,
                mem_used_bytes: 0,
            },
            code_length,
            log: pipeline.take_log_map(),
        }),
    )
    .await
}
