//! Per-submission pipeline: compile the user program, run it in the
//! sandbox per task, score groups, and collect logs for the final
//! result.

use std::io::{BufReader, Seek, SeekFrom};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use oj_core::types::{LogEntry, LogMap, TaskDef, TaskGroup};
use oj_core::verdict::Verdict;
use oj_process::rlimit::limit_address_space;
use oj_process::{Journals, StreamSink, inherit_fd, run_piped};

use crate::checker::{Checker, CheckerInput, CheckerOutput};
use crate::report::SandboxReport;

pub const COMPILE_TAG: &str = "COMPILE";

/// Compilation preset for the single supported language.
pub const DEFAULT_COMPILE_TEMPLATE: &str =
    "g++ -Wall -O2 -fdiagnostics-color=always {CFLAGS} -o {output} {src}";

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub nsjail_path: PathBuf,
    pub nsjail_cfg_path: PathBuf,
    /// Where the user source is written and compiled; tmpfs recommended.
    pub build_dir: PathBuf,
    /// Where per-run scratch output files live.
    pub scratch_dir: PathBuf,
    pub compile_template: String,
    /// Byte cap for each compiler stream.
    pub build_output_limit: u64,
    /// Address-space rlimit for the compiler, in bytes.
    pub build_mem_limit: u64,
    /// Byte cap for the user program's stdout.
    pub run_output_limit: u64,
    /// Supervisor deadline for the compile step.
    pub compile_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            nsjail_path: PathBuf::from("nsjail"),
            nsjail_cfg_path: PathBuf::from("nsjail.cfg"),
            build_dir: PathBuf::from("/run/shm/judge"),
            scratch_dir: PathBuf::from("/tmp/judge"),
            compile_template: DEFAULT_COMPILE_TEMPLATE.to_string(),
            build_output_limit: 128 * 1024,
            build_mem_limit: 256 * 1024 * 1024,
            run_output_limit: 64 * 1024 * 1024,
            compile_timeout: Duration::from_secs(60),
        }
    }
}

/// Format a compile command template, shell-quoting every non-empty
/// interpolation value. Empty values are emitted unquoted so they vanish
/// when the line is split.
pub fn format_compile_command(
    template: &str,
    src: &Path,
    output: &Path,
    cflags: &str,
) -> Result<Vec<String>> {
    fn quoted(value: &str) -> Result<String> {
        if value.is_empty() {
            return Ok(String::new());
        }
        Ok(shlex::try_quote(value)
            .context("interpolation value cannot be quoted")?
            .into_owned())
    }

    let cmdline = template
        .replace("{CFLAGS}", &quoted(cflags)?)
        .replace("{src}", &quoted(&src.to_string_lossy())?)
        .replace("{output}", &quoted(&output.to_string_lossy())?);

    let argv = shlex::split(&cmdline)
        .with_context(|| format!("compile command does not parse: {cmdline}"))?;
    if argv.is_empty() {
        bail!("compile command is empty");
    }
    Ok(argv)
}

/// Everything observed about one sandboxed run, plus the scratch file
/// holding the user program's stdout.
pub struct TaskRun {
    pub report: SandboxReport,
    pub stdout_ole: bool,
    pub process_failed: bool,
    user_output: NamedTempFile,
}

impl TaskRun {
    pub fn user_output_path(&self) -> &Path {
        self.user_output.path()
    }

    /// Unlink the scratch output file.
    pub fn clean(self) -> Result<()> {
        self.user_output
            .close()
            .context("failed to unlink user output scratch file")
    }
}

pub struct JudgePipeline {
    config: PipelineConfig,
    checker: Box<dyn Checker>,
    journals: Journals,
    log_map: LogMap,
    build_ole_stdout: bool,
    build_ole_stderr: bool,
}

impl JudgePipeline {
    pub fn new(config: PipelineConfig, checker: Box<dyn Checker>, journals: Journals) -> Self {
        Self {
            config,
            checker,
            journals,
            log_map: LogMap::new(),
            build_ole_stdout: false,
            build_ole_stderr: false,
        }
    }

    /// Compile the user source. Both compiler streams are journaled
    /// under [`COMPILE_TAG`] with the build output cap applied. Returns
    /// whether the compiler exited zero.
    pub async fn build(&mut self, src: &Path, output: &Path, cflags: &str) -> Result<bool> {
        let argv = format_compile_command(&self.config.compile_template, src, output, cflags)?;
        info!(command = ?argv, "running compiler");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.config.build_dir)
            .stdin(Stdio::null());
        limit_address_space(&mut cmd, self.config.build_mem_limit);

        let cap = self.config.build_output_limit;
        let deadline = self.config.compile_timeout;
        let started = Instant::now();
        let completed = {
            let mut session = self.journals.session(COMPILE_TAG)?;
            let (j1, j2) = session.sinks();
            run_piped(
                cmd,
                Some(StreamSink::bounded(j1, cap)),
                Some(StreamSink::bounded(j2, cap)),
                Some(deadline),
            )
            .await?
        };

        self.build_ole_stdout = completed.stdout_ole;
        self.build_ole_stderr = completed.stderr_ole;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            exit_code = completed.exit_code,
            "build finished"
        );
        Ok(completed.success())
    }

    /// Run the compiled program on one input file under the sandbox.
    ///
    /// stdin comes from the testdata input, stdout goes to a fresh
    /// scratch file under the run output cap, stderr is discarded. The
    /// sandbox's statistics log is read back through an inherited
    /// descriptor once the child has been reaped.
    pub async fn run_task(
        &mut self,
        task: &TaskDef,
        input_path: &Path,
        cwd: &Path,
        exec: &[&str],
        extra_args: &str,
    ) -> Result<TaskRun> {
        let mut log_file = tempfile::tempfile().context("failed to create sandbox log file")?;
        let log_fd = log_file.as_raw_fd();

        let mut args: Vec<String> = vec![
            "-C".into(),
            self.config.nsjail_cfg_path.display().to_string(),
            "-D".into(),
            cwd.display().to_string(),
            "-t".into(),
            task.time_limit_ms.div_ceil(1000).to_string(),
            "--cgroup_mem_max".into(),
            (task.mem_limit_kib * 1024).to_string(),
            "--log_fd".into(),
            log_fd.to_string(),
        ];
        if !extra_args.is_empty() {
            args.extend(
                shlex::split(extra_args)
                    .with_context(|| format!("sandbox extra args do not parse: {extra_args}"))?,
            );
        }
        args.push("--".into());

        let stdin = std::fs::File::open(input_path)
            .with_context(|| format!("failed to open testdata input {}", input_path.display()))?;

        let mut cmd = Command::new(&self.config.nsjail_path);
        cmd.args(&args)
            .args(exec)
            .stdin(Stdio::from(stdin))
            .stderr(Stdio::null());
        inherit_fd(&mut cmd, log_fd);

        let mut user_output = NamedTempFile::new_in(&self.config.scratch_dir)
            .context("failed to create user output scratch file")?;
        debug!(path = %user_output.path().display(), "using scratch output");
        info!(task = %task.label, command = ?args, "running sandbox");

        let cap = self.config.run_output_limit;
        // Generous supervisor deadline; the real wall-clock limit is the
        // sandbox's own.
        let deadline = Duration::from_millis(task.time_limit_ms * 2 + 10_000);
        let started = Instant::now();
        let completed = {
            let _session = self.journals.session(&format!("RUN-{}", task.label))?;
            run_piped(
                cmd,
                Some(StreamSink::bounded(&mut user_output, cap)),
                None,
                Some(deadline),
            )
            .await?
        };
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            exit_code = completed.exit_code,
            "run finished"
        );

        log_file
            .seek(SeekFrom::Start(0))
            .context("failed to rewind sandbox log")?;
        let report = SandboxReport::parse(BufReader::new(log_file))?;

        Ok(TaskRun {
            report,
            stdout_ole: completed.stdout_ole,
            process_failed: !completed.success(),
            user_output,
        })
    }

    /// Hand the run's output to the configured checker.
    pub fn check(
        &self,
        run: &TaskRun,
        input_path: &Path,
        expected_path: &Path,
        prior_verdict: Verdict,
    ) -> Result<CheckerOutput> {
        self.checker.check(&CheckerInput {
            input_path,
            expected_path,
            user_output_path: run.user_output_path(),
            prior_verdict,
        })
    }

    /// Populate the outbound log map from the compile journals.
    pub fn finalize(&mut self) -> Result<()> {
        let stdout = self.journals.stdout().dump(COMPILE_TAG)?;
        let stderr = self.journals.stderr().dump(COMPILE_TAG)?;
        self.log_map.insert(
            "COMPILE_STDOUT".to_string(),
            LogEntry {
                content: String::from_utf8_lossy(&stdout).into_owned(),
                truncated: self.build_ole_stdout,
            },
        );
        self.log_map.insert(
            "COMPILE_STDERR".to_string(),
            LogEntry {
                content: String::from_utf8_lossy(&stderr).into_owned(),
                truncated: self.build_ole_stderr,
            },
        );
        Ok(())
    }

    pub fn take_log_map(&mut self) -> LogMap {
        std::mem::take(&mut self.log_map)
    }
}

/// Accumulates group scores and the aggregate verdict while tasks are
/// judged in tree order.
#[derive(Debug)]
pub struct ScoreBoard {
    score_total: u32,
    final_verdict: Verdict,
    current: Option<GroupScore>,
}

impl Default for ScoreBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct GroupScore {
    index: u32,
    score: u32,
    score_max: u32,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self {
            score_total: 0,
            final_verdict: Verdict::Ac,
            current: None,
        }
    }

    pub fn begin_group(&mut self, group: &TaskGroup) {
        // Group 0 (samples) is informational and never contributes.
        let score_max = if group.index == 0 { 0 } else { group.score_max };
        self.current = Some(GroupScore {
            index: group.index,
            score: score_max,
            score_max,
        });
    }

    pub fn record(&mut self, task: &TaskDef, verdict: Verdict) {
        if verdict.outranks(self.final_verdict) {
            self.final_verdict = verdict;
        }
        if verdict != Verdict::Ac
            && !task.fallthrough
            && let Some(current) = &mut self.current
        {
            current.score = 0;
        }
    }

    /// Close the open group, adding its score to the total. Returns the
    /// group's contribution.
    pub fn end_group(&mut self) -> u32 {
        let Some(current) = self.current.take() else {
            return 0;
        };
        if current.index != 0 {
            info!(
                group = current.index,
                score = current.score,
                score_max = current.score_max,
                "group scored"
            );
        }
        self.score_total += current.score;
        current.score
    }

    pub fn score_total(&self) -> u32 {
        self.score_total
    }

    pub fn final_verdict(&self) -> Verdict {
        self.final_verdict
    }
}
