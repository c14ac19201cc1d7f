//! Expansion of the flat task table into an ordered task tree, and the
//! testdata binding check that gates the pipeline.

use std::path::{Path, PathBuf};

use crate::types::{TaskDef, TaskGroup, TaskSpec, TestdataPair};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("task table ended early: expected {expected} at row {row}")]
    Truncated { row: usize, expected: &'static str },

    #[error("task table row {row} has {got} column(s): expected at least {expected}")]
    ShortRow {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("task table row {row}: {field} must be positive (got {value})")]
    NonPositive {
        row: usize,
        field: &'static str,
        value: i64,
    },

    #[error("task table has {got} trailing row(s) past the declared records")]
    TrailingRows { got: usize },
}

/// Cursor over the flat record rows with position tracking for errors.
struct Rows<'a> {
    rows: &'a [Vec<i64>],
    pos: usize,
}

impl<'a> Rows<'a> {
    fn take(&mut self, expected: &'static str, width: usize) -> Result<&'a [i64], SpecError> {
        let row = self.rows.get(self.pos).ok_or(SpecError::Truncated {
            row: self.pos,
            expected,
        })?;
        if row.len() < width {
            return Err(SpecError::ShortRow {
                row: self.pos,
                expected: width,
                got: row.len(),
            });
        }
        self.pos += 1;
        Ok(row)
    }

    fn limits(&mut self, expected: &'static str) -> Result<(u64, u64), SpecError> {
        let row_idx = self.pos;
        let row = self.take(expected, 2)?;
        let (tl, ml) = (row[0], row[1]);
        for (field, value) in [("time_limit", tl), ("mem_limit", ml)] {
            if value <= 0 {
                return Err(SpecError::NonPositive {
                    row: row_idx,
                    field,
                    value,
                });
            }
        }
        Ok((tl as u64, ml as u64))
    }
}

/// Label scheme: the group index alone when the group holds a single
/// task, `"{group}-{n}"` otherwise.
fn task_label(group: u32, number: u32, total: i64) -> String {
    if total > 1 {
        format!("{group}-{number}")
    } else {
        format!("{group}")
    }
}

/// Expand a flat task description into the task tree.
///
/// Layout: a `(num_samples, num_groups)` header, one limit row per
/// sample, then per group a `(num_tasks, has_opencase, score_max)` record
/// followed by an extra limit row for the open case (if declared) and one
/// limit row per task. Any deviation from the declared record counts is
/// an error.
pub fn expand_task_table(rows: &[Vec<i64>]) -> Result<TaskSpec, SpecError> {
    let mut cursor = Rows { rows, pos: 0 };

    let header = cursor.take("(num_samples, num_groups) header", 2)?;
    let (num_samples, num_groups) = (header[0], header[1]);
    for (field, value) in [("num_samples", num_samples), ("num_groups", num_groups)] {
        if value < 0 {
            return Err(SpecError::NonPositive {
                row: 0,
                field,
                value,
            });
        }
    }

    let mut samples = Vec::with_capacity(num_samples as usize);
    for i in 0..num_samples {
        let number = (i + 1) as u32;
        let (time_limit_ms, mem_limit_kib) = cursor.limits("sample limit row")?;
        samples.push(TaskDef {
            label: task_label(0, number, num_samples),
            number,
            time_limit_ms,
            mem_limit_kib,
            fallthrough: false,
        });
    }

    let mut groups = vec![TaskGroup {
        index: 0,
        score_max: 0,
        tasks: samples,
    }];

    for g in 1..=num_groups {
        let row_idx = cursor.pos;
        let subheader = cursor.take("(num_tasks, has_opencase, score_max) record", 3)?;
        let (num_tasks, has_opencase, score_max) = (subheader[0], subheader[1], subheader[2]);
        if num_tasks < 0 || score_max < 0 {
            return Err(SpecError::NonPositive {
                row: row_idx,
                field: if num_tasks < 0 { "num_tasks" } else { "score_max" },
                value: num_tasks.min(score_max),
            });
        }

        let group = g as u32;
        let mut tasks = Vec::with_capacity(num_tasks as usize + 1);

        if has_opencase != 0 {
            // The open case consumes an extra limit row and scores
            // leniently: its failure never zeroes the group.
            let (time_limit_ms, mem_limit_kib) = cursor.limits("open-case limit row")?;
            tasks.push(TaskDef {
                label: format!("{group}-ocen"),
                number: 0,
                time_limit_ms,
                mem_limit_kib,
                fallthrough: true,
            });
        }

        for j in 0..num_tasks {
            let number = (j + 1) as u32;
            let (time_limit_ms, mem_limit_kib) = cursor.limits("task limit row")?;
            tasks.push(TaskDef {
                label: task_label(group, number, num_tasks),
                number,
                time_limit_ms,
                mem_limit_kib,
                fallthrough: false,
            });
        }

        groups.push(TaskGroup {
            index: group,
            score_max: score_max as u32,
            tasks,
        });
    }

    if cursor.pos != rows.len() {
        return Err(SpecError::TrailingRows {
            got: rows.len() - cursor.pos,
        });
    }

    Ok(TaskSpec { groups })
}

/// Resolve the `(input, expected)` file pair for every task, in tree
/// order. Paths that are not regular files are reported in the second
/// return value; the caller aborts the submission when any are missing.
pub fn collect_testdata(spec: &TaskSpec, base: &Path) -> (Vec<TestdataPair>, Vec<PathBuf>) {
    let mut pairs = Vec::with_capacity(spec.task_count());
    let mut missing = Vec::new();

    for (_, task) in spec.iter_tasks() {
        let input = base.join(format!("{}.in", task.label));
        let expected = base.join(format!("{}.out", task.label));
        for p in [&input, &expected] {
            if !p.is_file() {
                missing.push(p.clone());
            }
        }
        pairs.push(TestdataPair { input, expected });
    }

    (pairs, missing)
}
