use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsRawFd;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::*;

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.args(["-c", script]);
    cmd
}

#[tokio::test]
async fn test_captures_stdout_exactly() {
    let mut out = Vec::new();
    let completed = run_piped(
        sh("printf 'hello'"),
        Some(StreamSink::unbounded(&mut out)),
        None,
        None,
    )
    .await
    .unwrap();

    assert!(completed.success());
    assert_eq!(out, b"hello");
    assert_eq!(completed.stdout_len, 5);
    assert!(!completed.stdout_ole);
}

#[tokio::test]
async fn test_captures_both_streams_independently() {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let completed = run_piped(
        sh("printf 'to-out'; printf 'to-err' >&2"),
        Some(StreamSink::unbounded(&mut out)),
        Some(StreamSink::unbounded(&mut err)),
        None,
    )
    .await
    .unwrap();

    assert!(completed.success());
    assert_eq!(out, b"to-out");
    assert_eq!(err, b"to-err");
}

#[tokio::test]
async fn test_large_output_is_byte_faithful() {
    // More than one PIPE_BUFFER_SIZE chunk.
    let mut out = Vec::new();
    let completed = run_piped(
        sh("i=0; while [ $i -lt 12000 ]; do printf '0123456789'; i=$((i+1)); done"),
        Some(StreamSink::unbounded(&mut out)),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(completed.stdout_len, 120_000);
    assert_eq!(out.len(), 120_000);
    assert!(out.chunks(10).all(|c| c == b"0123456789"));
}

#[tokio::test]
async fn test_ole_flag_set_past_cap() {
    let mut out = Vec::new();
    let completed = run_piped(
        sh("printf 'aaaaaaaa'"),
        Some(StreamSink::bounded(&mut out, 4)),
        None,
        None,
    )
    .await
    .unwrap();

    assert!(completed.stdout_ole);
    assert_eq!(out, b"aaaa", "capture is the first cap bytes only");
    assert_eq!(completed.stdout_len, 4);
}

#[tokio::test]
async fn test_output_exactly_at_cap_is_not_ole() {
    let mut out = Vec::new();
    let completed = run_piped(
        sh("printf 'aaaa'"),
        Some(StreamSink::bounded(&mut out, 4)),
        None,
        None,
    )
    .await
    .unwrap();

    assert!(!completed.stdout_ole, "1-byte probe must see EOF");
    assert_eq!(out, b"aaaa");
}

#[tokio::test]
async fn test_caps_are_per_stream() {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let completed = run_piped(
        sh("printf 'oooooooo'; printf 'eeee' >&2"),
        Some(StreamSink::bounded(&mut out, 4)),
        Some(StreamSink::bounded(&mut err, 64)),
        None,
    )
    .await
    .unwrap();

    assert!(completed.stdout_ole);
    assert!(!completed.stderr_ole);
    assert_eq!(err, b"eeee");
}

#[tokio::test]
async fn test_child_survives_cap_and_exits_on_its_own() {
    // The child writes past the cap and then exits normally; the runner
    // must not kill it and must still reap the real exit code.
    let mut out = Vec::new();
    let completed = run_piped(
        sh("printf 'xxxxxxxx'; exit 7"),
        Some(StreamSink::bounded(&mut out, 2)),
        None,
        None,
    )
    .await
    .unwrap();

    assert!(completed.stdout_ole);
    assert_eq!(completed.exit_code, 7);
}

#[tokio::test]
async fn test_exit_code_propagates() {
    let completed = run_piped(sh("exit 3"), None, None, None).await.unwrap();
    assert_eq!(completed.exit_code, 3);
    assert!(!completed.success());
}

#[tokio::test]
async fn test_stdin_from_file() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut input, "line一\n".as_bytes()).unwrap();

    let mut cmd = sh("cat");
    cmd.stdin(Stdio::from(input.reopen().unwrap()));

    let mut out = Vec::new();
    let completed = run_piped(cmd, Some(StreamSink::unbounded(&mut out)), None, None)
        .await
        .unwrap();

    assert!(completed.success());
    assert_eq!(out, "line一\n".as_bytes());
}

#[tokio::test]
async fn test_deadline_kills_child() {
    let started = std::time::Instant::now();
    let err = run_piped(
        sh("sleep 30"),
        None,
        None,
        Some(Duration::from_millis(200)),
    )
    .await
    .unwrap_err();

    assert!(err.downcast_ref::<RunTimeout>().is_some(), "got: {err:#}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_deadline_keeps_partial_capture() {
    let mut out = Vec::new();
    let err = run_piped(
        sh("printf 'partial'; sleep 30"),
        Some(StreamSink::unbounded(&mut out)),
        None,
        Some(Duration::from_millis(300)),
    )
    .await
    .unwrap_err();

    assert!(err.downcast_ref::<RunTimeout>().is_some());
    assert_eq!(out, b"partial");
}

#[tokio::test]
async fn test_inherited_fd_crosses_exec() {
    // Same mechanism the pipeline uses for the sandbox statistics log:
    // the child writes to an inherited descriptor, the parent reads the
    // file back after the wait.
    let mut log = tempfile::tempfile().unwrap();
    let fd = log.as_raw_fd();

    // /proc/self/fd/<n> only exists in the child if the descriptor
    // survived exec; plain sh cannot redirect to multi-digit fds.
    let mut cmd = sh(&format!("echo from-child > /proc/self/fd/{fd}"));
    inherit_fd(&mut cmd, fd);

    let completed = run_piped(cmd, None, None, None).await.unwrap();
    assert!(completed.success());

    log.seek(SeekFrom::Start(0)).unwrap();
    let mut content = String::new();
    log.read_to_string(&mut content).unwrap();
    assert_eq!(content, "from-child\n");
}

#[tokio::test]
async fn test_journal_as_runner_sink() {
    let mut journal = Journal::new(tempfile::tempfile().unwrap()).unwrap();
    journal.start("RUN-1").unwrap();
    let completed = run_piped(
        sh("printf 'captured'"),
        Some(StreamSink::bounded(&mut journal, 1024)),
        None,
        None,
    )
    .await
    .unwrap();
    journal.end().unwrap();

    assert!(completed.success());
    assert_eq!(journal.dump("RUN-1").unwrap(), b"captured");
}
