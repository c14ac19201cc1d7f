use std::path::PathBuf;

/// Failures that prevent producing a meaningful verdict. Per-task
/// outcomes (WA, TLE, ...) are verdicts, not errors.
#[derive(thiserror::Error, Debug)]
pub enum JudgeError {
    #[error("testdata for problem {problem_id} is not ready: {} file(s) missing", .missing.len())]
    TestdataMissing {
        problem_id: u64,
        missing: Vec<PathBuf>,
    },

    #[error("mandatory key '{0}' is missing from the sandbox report")]
    SandboxReportKey(String),

    #[error("sandbox report value for '{key}' is malformed: '{value}'")]
    SandboxReportValue { key: String, value: String },

    #[error(transparent)]
    Spec(#[from] crate::spec::SpecError),
}

impl JudgeError {
    /// Human-readable message including the per-file detail the terminal
    /// exception event must carry.
    pub fn detail(&self) -> String {
        match self {
            JudgeError::TestdataMissing { missing, .. } => {
                let mut msg = self.to_string();
                for path in missing {
                    msg.push_str("\n> ");
                    msg.push_str(&path.display().to_string());
                }
                msg
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_testdata_missing_counts_files() {
        let err = JudgeError::TestdataMissing {
            problem_id: 42,
            missing: vec![PathBuf::from("/data/42/1.in"), PathBuf::from("/data/42/1.out")],
        };
        assert_eq!(
            err.to_string(),
            "testdata for problem 42 is not ready: 2 file(s) missing"
        );
    }

    #[test]
    fn test_detail_lists_missing_paths() {
        let err = JudgeError::TestdataMissing {
            problem_id: 42,
            missing: vec![PathBuf::from("/data/42/1.in")],
        };
        let detail = err.detail();
        assert!(detail.contains("\n> /data/42/1.in"));
    }

    #[test]
    fn test_display_sandbox_report_key() {
        let err = JudgeError::SandboxReportKey("time".into());
        assert_eq!(
            err.to_string(),
            "mandatory key 'time' is missing from the sandbox report"
        );
    }

    #[test]
    fn test_spec_error_is_transparent() {
        let err: JudgeError = crate::spec::SpecError::TrailingRows { got: 2 }.into();
        assert_eq!(
            err.to_string(),
            "task table has 2 trailing row(s) past the declared records"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JudgeError>();
    }
}
