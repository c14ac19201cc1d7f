//! Parsing of the sandbox's statistics log and the verdict oracle that
//! interprets it.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use oj_core::{JudgeError, Verdict};

/// Keys the sandbox must always report; anything less is a corrupt log.
pub const MANDATORY_KEYS: [&str; 4] = [
    "cgroup_memory_failcnt",
    "cgroup_memory_max_usage",
    "exit_normally",
    "time",
];

/// Statistics line grammar: `[S][<pid>] __STAT__:0 [<n>:]<key> = <value>`.
fn stat_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[S\]\[\d+\] __STAT__:0 (?:\d+:)?(\w+)\s+=\s+(.*)$").expect("valid regex")
    })
}

/// Key/value statistics emitted by the sandbox over its log descriptor.
#[derive(Clone, Debug, Default)]
pub struct SandboxReport {
    values: HashMap<String, String>,
}

impl SandboxReport {
    /// Scan a log stream for statistics records; other lines (the
    /// sandbox's chatter) are ignored. Fails when a mandatory key is
    /// absent.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut values = HashMap::new();
        for line in reader.lines() {
            let line = line.context("failed to read sandbox log")?;
            if let Some(caps) = stat_line_re().captures(&line) {
                values.insert(caps[1].to_string(), caps[2].to_string());
            }
        }

        let report = Self { values };
        for key in MANDATORY_KEYS {
            if !report.values.contains_key(key) {
                return Err(JudgeError::SandboxReportKey(key.to_string()).into());
            }
        }
        Ok(report)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn parse_u64(&self, key: &str) -> Result<u64> {
        let value = self
            .get(key)
            .ok_or_else(|| JudgeError::SandboxReportKey(key.to_string()))?;
        value.parse().map_err(|_| {
            JudgeError::SandboxReportValue {
                key: key.to_string(),
                value: value.to_string(),
            }
            .into()
        })
    }

    /// Wall time of the supervised program, in milliseconds.
    pub fn time_ms(&self) -> Result<u64> {
        self.parse_u64("time")
    }

    /// Peak cgroup memory usage, in bytes.
    pub fn max_memory_bytes(&self) -> Result<u64> {
        self.parse_u64("cgroup_memory_max_usage")
    }

    /// The cgroup hit its memory ceiling at least once.
    pub fn memory_over_limit(&self) -> bool {
        self.get("cgroup_memory_failcnt") != Some("0")
    }

    pub fn exited_normally(&self) -> bool {
        self.get("exit_normally") != Some("false")
    }

    /// Present and not `"false"` means the syscall policy fired.
    pub fn seccomp_violation(&self) -> bool {
        matches!(self.get("seccomp_violation"), Some(v) if v != "false")
    }
}

/// Runner-side observations that feed the oracle alongside the report.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunFlags {
    pub stdout_ole: bool,
    /// The sandbox process itself exited non-zero.
    pub process_failed: bool,
}

/// Derive a verdict from the sandbox report and the runner flags.
///
/// First match wins; `Pending` means no sandbox-level failure and the
/// checker still has to decide.
pub fn determine_verdict(
    report: &SandboxReport,
    time_limit_ms: u64,
    flags: RunFlags,
) -> Result<Verdict> {
    if report.seccomp_violation() {
        return Ok(Verdict::Rf);
    }
    if flags.stdout_ole {
        return Ok(Verdict::Ole);
    }
    if report.memory_over_limit() {
        return Ok(Verdict::Mle);
    }
    if !report.exited_normally() && report.time_ms()? >= time_limit_ms {
        return Ok(Verdict::Tle);
    }
    if flags.process_failed {
        return Ok(Verdict::Re);
    }
    Ok(Verdict::Pending)
}
