//! Test doubles for the engine: scripted executors and a toy pipeline.
//!
//! Exported (not cfg(test)) so integration tests and demos can drive the
//! engine without real collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::event::EngineError;
use crate::engine::identity::CaseId;
use crate::engine::plan::{NextAction, Pipeline};
use crate::engine::retry::RetryPolicy;
use crate::engine::state::{CaseState, Phase, TaskOutcome};
use crate::engine::task::{TaskExecutor, TaskFailure, TaskRequest};

/// Executor that succeeds immediately with `null` for every task.
pub struct NoopTaskExecutor;

#[async_trait]
impl TaskExecutor for NoopTaskExecutor {
    async fn invoke(&self, _case_id: &CaseId, _request: &TaskRequest) -> Result<Value, TaskFailure> {
        Ok(Value::Null)
    }
}

/// Executor driven by a per-task script of canned results.
///
/// Each invocation pops the front of the task's script; an empty script
/// yields `null`. Every call is recorded so tests can assert exactly which
/// tasks ran, and how often.
pub struct ScriptedTaskExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, TaskFailure>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTaskExecutor {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues the next result for `task`.
    pub fn push(&self, task: &str, result: Result<Value, TaskFailure>) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(task.to_string())
            .or_default()
            .push_back(result);
    }

    /// Task names in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of invocations of `task`.
    pub fn count(&self, task: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|t| t.as_str() == task)
            .count()
    }
}

impl Default for ScriptedTaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedTaskExecutor {
    async fn invoke(&self, _case_id: &CaseId, request: &TaskRequest) -> Result<Value, TaskFailure> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.task.clone());
        let next = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&request.task)
            .and_then(|q| q.pop_front());
        next.unwrap_or(Ok(Value::Null))
    }
}

/// Executor that fails each task transiently `n` times, then succeeds.
pub struct FailNTimes {
    n: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl FailNTimes {
    pub fn new(n: u32) -> Self {
        Self {
            n,
            counts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TaskExecutor for FailNTimes {
    async fn invoke(&self, _case_id: &CaseId, request: &TaskRequest) -> Result<Value, TaskFailure> {
        let mut counts = self.counts.lock().expect("counts lock");
        let seen = counts.entry(request.task.clone()).or_insert(0);
        if *seen < self.n {
            *seen += 1;
            return Err(TaskFailure::transient(format!(
                "induced failure {} of {}",
                *seen, self.n
            )));
        }
        Ok(serde_json::json!({ "ok": request.task }))
    }
}

/// Toy pipeline: one task named `work`, then complete with its output.
pub struct SingleTaskPipeline {
    pub policy: RetryPolicy,
    pub timeout: Duration,
}

impl SingleTaskPipeline {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            timeout: Duration::from_secs(5),
        }
    }
}

impl Pipeline for SingleTaskPipeline {
    fn plan(&self, state: &CaseState) -> Result<NextAction, EngineError> {
        if state.is_terminal() {
            return Ok(NextAction::Idle);
        }
        match state.task("work").outcome {
            Some(TaskOutcome::Completed(v)) => Ok(NextAction::Complete(v)),
            Some(TaskOutcome::Exhausted(e)) => Ok(NextAction::Fail(e)),
            None => Ok(NextAction::Schedule(vec![TaskRequest::named(
                "work",
                Value::Null,
                self.timeout,
                self.policy.clone(),
            )])),
        }
    }

    fn phase(&self, state: &CaseState) -> Phase {
        if state.result.is_some() {
            Phase::Completed
        } else if state.failure.is_some() {
            Phase::Failed
        } else if state.aborted.is_some() {
            Phase::Aborted
        } else {
            Phase::Acquiring
        }
    }

    fn summary(&self, _state: &CaseState) -> Option<Value> {
        None
    }
}
