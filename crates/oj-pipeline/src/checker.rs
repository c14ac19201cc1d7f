//! Output checking. A checker compares the expected and produced output
//! files and settles a `Pending` verdict; anything implementing
//! [`Checker`] can be plugged into the pipeline.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use oj_core::Verdict;

/// Paths and context handed to a checker for one task.
#[derive(Clone, Copy, Debug)]
pub struct CheckerInput<'a> {
    pub input_path: &'a Path,
    pub expected_path: &'a Path,
    pub user_output_path: &'a Path,
    /// Verdict decided so far, possibly `Pending`. A checker never
    /// upgrades a real failure.
    pub prior_verdict: Verdict,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckerOutput {
    pub verdict: Verdict,
    pub meta: HashMap<String, String>,
}

pub trait Checker: Send + Sync {
    fn check(&self, input: &CheckerInput<'_>) -> Result<CheckerOutput>;
}

/// Reference checker: line-by-line comparison that forgives trailing
/// EOL characters and leading/trailing whitespace on each line.
pub struct TolerantDiff;

impl Checker for TolerantDiff {
    fn check(&self, input: &CheckerInput<'_>) -> Result<CheckerOutput> {
        let user = open_buffered(input.user_output_path)?;
        let expected = open_buffered(input.expected_path)?;
        let diff_line = tolerant_diff_at(user, expected)?;

        let mut meta = HashMap::new();
        match diff_line {
            Some(line) => {
                debug!(line, "rejected: first differing line");
                meta.insert("lineno".to_string(), line.to_string());
            }
            None => debug!("accepted: no differences found"),
        }

        let verdict = if input.prior_verdict == Verdict::Pending {
            if diff_line.is_some() {
                Verdict::Wa
            } else {
                Verdict::Ac
            }
        } else {
            input.prior_verdict
        };

        Ok(CheckerOutput { verdict, meta })
    }
}

fn open_buffered(path: &Path) -> Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {} for checking", path.display()))?;
    Ok(BufReader::new(file))
}

/// 0-based index of the first differing line, or `None` when the files
/// are equivalent. A file ends when a read returns empty; a file ending
/// while the other still yields (possibly blank) lines is a difference.
fn tolerant_diff_at<A: BufRead, B: BufRead>(mut a: A, mut b: B) -> Result<Option<u64>> {
    let mut line = 0u64;
    let mut buf_a = String::new();
    let mut buf_b = String::new();

    loop {
        buf_a.clear();
        buf_b.clear();
        a.read_line(&mut buf_a).context("failed to read produced output")?;
        b.read_line(&mut buf_b).context("failed to read expected output")?;

        if !buf_a.is_empty() {
            if buf_b.is_empty() || buf_a.trim() != buf_b.trim() {
                return Ok(Some(line));
            }
        } else if !buf_b.is_empty() {
            return Ok(Some(line));
        } else {
            return Ok(None);
        }
        line += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn diff(a: &str, b: &str) -> Option<u64> {
        tolerant_diff_at(Cursor::new(a.to_string()), Cursor::new(b.to_string())).unwrap()
    }

    #[test]
    fn test_identical_files_match() {
        assert_eq!(diff("1 2 3\nfour\n", "1 2 3\nfour\n"), None);
    }

    #[test]
    fn test_whitespace_and_crlf_are_forgiven() {
        assert_eq!(diff("  1 2 3   \r\n", "1 2 3\n"), None);
        assert_eq!(diff("a\r\nb", "a\nb\n"), None);
    }

    #[test]
    fn test_interior_whitespace_still_differs() {
        assert_eq!(diff("1  2 3\n", "1 2 3\n"), Some(0));
    }

    #[test]
    fn test_first_differing_line_is_reported() {
        assert_eq!(diff("same\nsame\ndiff\n", "same\nsame\nother\n"), Some(2));
    }

    #[test]
    fn test_shorter_file_differs_at_end() {
        assert_eq!(diff("a\n", "a\nb\n"), Some(1));
        assert_eq!(diff("a\nb\n", "a\n"), Some(1));
    }

    #[test]
    fn test_trailing_blank_line_differs() {
        // The longer file still yields a (blank) read, so it differs.
        assert_eq!(diff("a\n\n", "a\n"), Some(1));
    }

    #[test]
    fn test_empty_files_match() {
        assert_eq!(diff("", ""), None);
    }

    fn checker_input<'a>(
        expected: &'a Path,
        user: &'a Path,
        prior: Verdict,
    ) -> CheckerInput<'a> {
        CheckerInput {
            input_path: Path::new("/dev/null"),
            expected_path: expected,
            user_output_path: user,
            prior_verdict: prior,
        }
    }

    #[test]
    fn test_checker_settles_pending_to_ac() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("t.out");
        let user = dir.path().join("user.out");
        std::fs::write(&expected, "1 2 3\n").unwrap();
        std::fs::write(&user, "  1 2 3   \r\n").unwrap();

        let out = TolerantDiff
            .check(&checker_input(&expected, &user, Verdict::Pending))
            .unwrap();
        assert_eq!(out.verdict, Verdict::Ac);
        assert!(out.meta.is_empty());
    }

    #[test]
    fn test_checker_settles_pending_to_wa_with_lineno() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("t.out");
        let user = dir.path().join("user.out");
        std::fs::write(&expected, "ok\nexpected\n").unwrap();
        std::fs::write(&user, "ok\nwrong\n").unwrap();

        let out = TolerantDiff
            .check(&checker_input(&expected, &user, Verdict::Pending))
            .unwrap();
        assert_eq!(out.verdict, Verdict::Wa);
        assert_eq!(out.meta.get("lineno").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_checker_preserves_real_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("t.out");
        let user = dir.path().join("user.out");
        std::fs::write(&expected, "x\n").unwrap();
        std::fs::write(&user, "x\n").unwrap();

        // Matching output must not upgrade an existing TLE.
        let out = TolerantDiff
            .check(&checker_input(&expected, &user, Verdict::Tle))
            .unwrap();
        assert_eq!(out.verdict, Verdict::Tle);
    }

    #[test]
    fn test_checker_missing_user_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("t.out");
        std::fs::write(&expected, "x\n").unwrap();

        let missing = dir.path().join("absent.out");
        let err = TolerantDiff
            .check(&checker_input(&expected, &missing, Verdict::Pending))
            .unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }
}
