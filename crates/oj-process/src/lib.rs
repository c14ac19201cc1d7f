//! Subprocess execution with bounded pipe draining.
//!
//! The runner drains a child's stdout/stderr into caller-supplied sinks
//! with per-stream byte caps. Hitting a cap does NOT kill the child: the
//! sandbox's pid-namespace may ignore SIGPIPE, and the sandbox's terminal
//! statistics are still wanted, so the stream is simply closed and the
//! child runs on until it exits or its own limits fire.

pub mod journal;
pub mod rlimit;

pub use journal::{Journal, JournalSession, Journals};

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Drain chunk size: 16 pages, the conventional pipe buffer size.
pub const PIPE_BUFFER_SIZE: usize = 4096 * 16;

/// Destination for one piped stream, with an optional byte cap.
///
/// Bytes beyond the cap are never written to the sink; the overflow is
/// recorded as an OLE flag on the completed run instead.
pub struct StreamSink<'a> {
    writer: &'a mut (dyn Write + Send),
    limit: Option<u64>,
}

impl<'a> StreamSink<'a> {
    pub fn bounded(writer: &'a mut (dyn Write + Send), limit: u64) -> Self {
        Self {
            writer,
            limit: Some(limit),
        }
    }

    pub fn unbounded(writer: &'a mut (dyn Write + Send)) -> Self {
        Self {
            writer,
            limit: None,
        }
    }
}

/// Summary of a completed piped run. The captured bytes live in the
/// sinks the caller handed in.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipedOutput {
    /// Child exit code; 1 when killed by a signal.
    pub exit_code: i32,
    pub stdout_len: u64,
    pub stderr_len: u64,
    pub stdout_ole: bool,
    pub stderr_ole: bool,
}

impl PipedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The supervisor deadline expired and the child was killed.
#[derive(Debug, thiserror::Error)]
#[error("child did not finish within {timeout_ms} ms and was killed")]
pub struct RunTimeout {
    pub timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct StreamStatus {
    bytes: u64,
    ole: bool,
}

/// Run a child process, draining piped streams into the given sinks.
///
/// Where a sink is present the corresponding stream is piped; otherwise
/// whatever disposition the caller already set on `cmd` (inherit,
/// devnull, an explicit file) is honored. Stdin, working directory and
/// `pre_exec` hooks are likewise configured by the caller beforehand.
///
/// Both pipes are drained concurrently with the child's execution, in
/// chunks of [`PIPE_BUFFER_SIZE`]; within one stream, bytes reach the
/// sink in emission order. When a sink's cap is reached the runner
/// probes for exactly one more byte: data means the stream overflowed
/// (OLE), EOF means it ended exactly at the cap.
///
/// `deadline`, when set, bounds the whole run; expiry kills the child
/// and fails with [`RunTimeout`], leaving whatever was captured in the
/// sinks.
pub async fn run_piped(
    mut cmd: Command,
    stdout: Option<StreamSink<'_>>,
    stderr: Option<StreamSink<'_>>,
    deadline: Option<Duration>,
) -> Result<PipedOutput> {
    if stdout.is_some() {
        cmd.stdout(Stdio::piped());
    }
    if stderr.is_some() {
        cmd.stderr(Stdio::piped());
    }
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn command")?;
    let out_pipe = child.stdout.take();
    let err_pipe = child.stderr.take();

    let drained = async {
        let (out, err) = tokio::join!(
            drain_stream(out_pipe, stdout),
            drain_stream(err_pipe, stderr),
        );
        let (out, err) = (out?, err?);
        let status = child.wait().await.context("failed to wait for child")?;
        Ok::<_, anyhow::Error>((out, err, status))
    };

    let outcome = match deadline {
        Some(limit) => {
            let timed = tokio::time::timeout(limit, drained).await;
            match timed {
                Ok(res) => res?,
                Err(_) => {
                    let timeout_ms = limit.as_millis() as u64;
                    warn!(timeout_ms, "supervisor deadline expired; killing child");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(RunTimeout { timeout_ms }.into());
                }
            }
        }
        None => drained.await?,
    };
    let (out, err, status) = outcome;

    let exit_code = status.code().unwrap_or_else(|| {
        warn!("child terminated by signal, reporting exit code 1");
        1
    });
    debug!(
        exit_code,
        stdout_len = out.bytes,
        stderr_len = err.bytes,
        stdout_ole = out.ole,
        stderr_ole = err.ole,
        "piped run finished"
    );

    Ok(PipedOutput {
        exit_code,
        stdout_len: out.bytes,
        stderr_len: err.bytes,
        stdout_ole: out.ole,
        stderr_ole: err.ole,
    })
}

/// Drain one pipe to EOF or to its cap, then probe for overflow.
///
/// Dropping the pipe on return closes the parent's end; the child keeps
/// running either way.
async fn drain_stream<R>(pipe: Option<R>, sink: Option<StreamSink<'_>>) -> Result<StreamStatus>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let (Some(mut pipe), Some(sink)) = (pipe, sink) else {
        return Ok(StreamStatus::default());
    };
    let StreamSink { writer, limit } = sink;

    let mut buf = vec![0u8; PIPE_BUFFER_SIZE];
    let mut status = StreamStatus::default();

    loop {
        let want = match limit {
            Some(cap) => (cap - status.bytes).min(PIPE_BUFFER_SIZE as u64) as usize,
            None => PIPE_BUFFER_SIZE,
        };

        if want == 0 {
            // Cap reached: a successful 1-byte read means the child had
            // more to say than the cap allows.
            let mut probe = [0u8; 1];
            let n = pipe
                .read(&mut probe)
                .await
                .context("failed to probe pipe past byte cap")?;
            if n > 0 {
                status.ole = true;
            }
            break;
        }

        let n = pipe
            .read(&mut buf[..want])
            .await
            .context("failed to read from child pipe")?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .context("failed to write to stream sink")?;
        status.bytes += n as u64;
    }

    Ok(status)
}

/// Keep `fd` open across `exec` by clearing its close-on-exec flag in
/// the child. Used to hand the sandbox its statistics log descriptor.
pub fn inherit_fd(cmd: &mut Command, fd: std::os::fd::RawFd) {
    // SAFETY: fcntl is async-signal-safe and the closure runs between
    // fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
