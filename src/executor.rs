//! External collaborator interface: running a notebook's code cells and
//! capturing what they produce.
//!
//! Grounded on `jupyter_cache/executors/base.py::JupyterExecutorAbstract`
//! and `ExecutorRunResult`. The actual act of executing a kernel is outside
//! this crate's scope (a real implementation would shell out to a Jupyter
//! kernel or an embedded interpreter); this module defines the trait seam
//! the execution pipeline (C6) drives, plus a small in-process reference
//! implementation used by this crate's own tests and suitable as a starting
//! point for a real one.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::model::{CellKind, NotebookDoc, Output};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("executor failed to start: {0}")]
    StartupFailed(String),
    #[error("executor raised while running cell {index}: {message}")]
    CellRaised { index: usize, message: String },
}

/// What running a notebook produced.
pub struct ExecutionOutcome {
    /// The notebook, with `execution_count` and `outputs` filled in on every
    /// code cell that ran before either finishing or hitting an error.
    pub notebook: NotebookDoc,
    pub elapsed: Duration,
    /// `Some` if a code cell raised and execution stopped there (or, with
    /// `allow_errors`, simply raised and continued): the traceback text to
    /// record against the project, per spec.md's "cell error" outcome.
    pub cell_error_traceback: Option<String>,
}

/// Runs a notebook's code cells in place, in `cwd`.
///
/// Implementations may block the calling thread for up to `timeout`; the
/// pipeline (C6) is responsible for running executor calls off whatever
/// async runtime drives the rest of the crate.
pub trait Executor: Send + Sync {
    fn execute_in_place(
        &self,
        notebook: &NotebookDoc,
        cwd: &Path,
        timeout: Duration,
        allow_errors: bool,
    ) -> Result<ExecutionOutcome, ExecutorError>;
}

/// A reference executor that doesn't actually run any code: it assigns
/// sequential execution counts to code cells and, for any cell whose source
/// contains the literal text `raise`, produces an `Output::Error` and stops
/// (or continues, if `allow_errors`).
///
/// Mirrors `JupyterExecutorBasic` closely enough to exercise the pipeline's
/// scheduling and error-handling paths in tests without depending on a real
/// kernel.
#[derive(Default)]
pub struct StubExecutor;

impl Executor for StubExecutor {
    fn execute_in_place(
        &self,
        notebook: &NotebookDoc,
        _cwd: &Path,
        _timeout: Duration,
        allow_errors: bool,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let mut out = notebook.clone();
        let mut traceback = None;
        let mut n: u64 = 0;
        for cell in out.cells.iter_mut() {
            if cell.kind != CellKind::Code {
                continue;
            }
            n += 1;
            cell.execution_count = Some(n);
            if cell.source.contains("raise") {
                let message = format!("stub raised on cell {n}");
                cell.outputs = vec![Output::Error {
                    ename: "StubError".into(),
                    evalue: message.clone(),
                    traceback: vec![message.clone()],
                }];
                traceback = Some(message);
                if !allow_errors {
                    break;
                }
            } else {
                cell.outputs = vec![Output::ExecuteResult {
                    execution_count: Some(n),
                    data: [("text/plain".to_string(), serde_json::Value::String(cell.source.clone()))]
                        .into_iter()
                        .collect(),
                    metadata: Default::default(),
                }];
            }
        }
        Ok(ExecutionOutcome {
            notebook: out,
            elapsed: Duration::from_millis(0),
            cell_error_traceback: traceback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cell;
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use serde_json::Map;

    fn notebook(cells: Vec<Cell>) -> NotebookDoc {
        NotebookDoc { metadata: Map::new(), cells, format_major: 4, format_minor: 5 }
    }

    #[test]
    fn stub_executor_assigns_sequential_execution_counts() {
        let nb = notebook(vec![Cell::new_code("1 + 1"), Cell::new_code("2 + 2")]);
        let outcome = StubExecutor.execute_in_place(&nb, Path::new("."), Duration::from_secs(1), false).unwrap();
        pretty_assert_eq!(outcome.notebook.cells[0].execution_count, Some(1));
        pretty_assert_eq!(outcome.notebook.cells[1].execution_count, Some(2));
        assert!(outcome.cell_error_traceback.is_none());
    }

    #[test]
    fn stub_executor_stops_on_error_without_allow_errors() {
        let nb = notebook(vec![Cell::new_code("raise ValueError()"), Cell::new_code("2 + 2")]);
        let outcome = StubExecutor.execute_in_place(&nb, Path::new("."), Duration::from_secs(1), false).unwrap();
        assert!(outcome.cell_error_traceback.is_some());
        pretty_assert_eq!(outcome.notebook.cells[1].execution_count, None);
    }

    #[test]
    fn stub_executor_continues_past_error_with_allow_errors() {
        let nb = notebook(vec![Cell::new_code("raise ValueError()"), Cell::new_code("2 + 2")]);
        let outcome = StubExecutor.execute_in_place(&nb, Path::new("."), Duration::from_secs(1), true).unwrap();
        assert!(outcome.cell_error_traceback.is_some());
        pretty_assert_eq!(outcome.notebook.cells[1].execution_count, Some(2));
    }
}
