//! Purpose: Server-side task operations: status, wait, cancel, release, list, results.
//! Exports: task methods on `LabbcatClient`.
//! Role: HTTP half of the task protocol; the wait loop itself lives in `core::task`.
//! Invariants: Task ids are passed through untouched; the client keeps no task state.
#![allow(clippy::result_large_err)]

use super::client::{ApiResult, LabbcatClient, Params};
use crate::core::task::{TaskStatus, WaitOptions, poll_until_settled};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

impl LabbcatClient {
    pub fn task_status(&self, task_id: &str) -> ApiResult<TaskStatus> {
        let url = self.endpoint(&["thread"])?;
        self.get_model(&url, &Params::new().with("threadId", task_id))
            .map_err(|err| err.with_task_id(task_id))
    }

    /// Polls the task until it stops running or `options` ends the wait.
    ///
    /// Callers tell completion from a timeout by the returned status's `running` flag.
    pub fn wait_for_task(&self, task_id: &str, options: &WaitOptions) -> ApiResult<TaskStatus> {
        tracing::debug!(task_id, max_wait = ?options.max_wait, "waiting for task");
        let status = poll_until_settled(|| self.task_status(task_id), options, std::thread::sleep)?;
        if status.running {
            tracing::info!(task_id, percent = ?status.percent_complete, "task still running");
        } else {
            tracing::info!(task_id, status = ?status.status, "task finished");
        }
        Ok(status)
    }

    /// Stops a running task without releasing it.
    pub fn cancel_task(&self, task_id: &str) -> ApiResult<()> {
        self.thread_command(task_id, "cancel")?;
        tracing::info!(task_id, "task cancelled");
        Ok(())
    }

    /// Frees a finished task's server resources.
    pub fn release_task(&self, task_id: &str) -> ApiResult<()> {
        self.thread_command(task_id, "release")?;
        tracing::debug!(task_id, "task released");
        Ok(())
    }

    pub fn get_tasks(&self) -> ApiResult<BTreeMap<String, TaskStatus>> {
        let url = self.endpoint(&["threads"])?;
        self.get_model(&url, &Params::new())
    }

    /// Downloads the task's result file into `dir`; `None` if it has no result yet.
    pub fn task_results(&self, task_id: &str, dir: &Path) -> ApiResult<Option<PathBuf>> {
        let status = self.task_status(task_id)?;
        let Some(location) = status.result_url.as_deref() else {
            return Ok(None);
        };
        let url = self.resolve(location)?;
        self.post_to_file(&url, &Params::new(), dir, None)
            .map(Some)
            .map_err(|err| err.with_task_id(task_id))
    }

    fn thread_command(&self, task_id: &str, command: &str) -> ApiResult<()> {
        let url = self.endpoint(&["threads"])?;
        let params = Params::new()
            .with("threadId", task_id)
            .with("command", command);
        self.get_model::<serde_json::Value>(&url, &params)
            .map(|_| ())
            .map_err(|err| err.with_task_id(task_id))
    }
}
