use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::verdict::Verdict;

/// One atomic unit of execution: a single run of the compiled program on
/// one input file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDef {
    /// Unique within a submission; also names the testdata files.
    pub label: String,
    /// Subtask number within the group. 1-based; 0 is reserved for the
    /// synthetic open-case task.
    pub number: u32,
    pub time_limit_ms: u64,
    pub mem_limit_kib: u64,
    /// A non-AC verdict on a fallthrough task does not zero its group's
    /// score.
    pub fallthrough: bool,
}

/// An ordered run of tasks sharing one score cap, graded all-or-nothing
/// modulo fallthrough tasks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
    /// Contiguous from 0; group 0 holds the non-scoring samples.
    pub index: u32,
    /// Ignored for group 0.
    pub score_max: u32,
    pub tasks: Vec<TaskDef>,
}

/// The whole task tree for one submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub groups: Vec<TaskGroup>,
}

impl TaskSpec {
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(|g| g.tasks.len()).sum()
    }

    /// Tasks in tree order: group ascending, task within group ascending.
    pub fn iter_tasks(&self) -> impl Iterator<Item = (&TaskGroup, &TaskDef)> {
        self.groups
            .iter()
            .flat_map(|g| g.tasks.iter().map(move |t| (g, t)))
    }
}

/// Statistics attached to a task or to the whole submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeStat {
    pub verdict: Verdict,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub time_used_ms: u64,
    #[serde(default)]
    pub mem_used_bytes: u64,
}

impl JudgeStat {
    /// A stat carrying only a verdict (compile failure, rejection).
    pub fn from_verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            score: 0,
            time_used_ms: 0,
            mem_used_bytes: 0,
        }
    }
}

/// Outcome of one task, positioned in the task tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_group: u32,
    pub subtask: u32,
    pub stat: JudgeStat,
}

/// A captured log stream returned with the final result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub content: String,
    /// Set when the stream hit its byte cap and was cut short.
    pub truncated: bool,
}

/// Map of named log streams (`COMPILE_STDOUT`, `COMPILE_STDERR`, ...).
pub type LogMap = HashMap<String, LogEntry>;

/// Testdata binding for one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestdataPair {
    pub input: PathBuf,
    pub expected: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(label: &str, number: u32) -> TaskDef {
        TaskDef {
            label: label.to_string(),
            number,
            time_limit_ms: 1000,
            mem_limit_kib: 65536,
            fallthrough: false,
        }
    }

    #[test]
    fn test_iter_tasks_tree_order() {
        let spec = TaskSpec {
            groups: vec![
                TaskGroup {
                    index: 0,
                    score_max: 0,
                    tasks: vec![task("0", 1)],
                },
                TaskGroup {
                    index: 1,
                    score_max: 100,
                    tasks: vec![task("1-1", 1), task("1-2", 2)],
                },
            ],
        };
        let order: Vec<_> = spec
            .iter_tasks()
            .map(|(g, t)| (g.index, t.label.as_str()))
            .collect();
        assert_eq!(order, vec![(0, "0"), (1, "1-1"), (1, "1-2")]);
        assert_eq!(spec.task_count(), 3);
    }

    #[test]
    fn test_judge_stat_from_verdict() {
        let stat = JudgeStat::from_verdict(Verdict::Ce);
        assert_eq!(stat.verdict, Verdict::Ce);
        assert_eq!(stat.score, 0);
        assert_eq!(stat.time_used_ms, 0);
    }
}
