//! Task executor: the single channel through which the engine touches the
//! outside world.
//!
//! A task is a named unit of external work. The engine does not interpret
//! task payloads; they pass through opaquely. Executors never retry
//! internally: retry and fallback are the driver's responsibility, guided by
//! the retry policy attached to each request.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::identity::{CaseId, TaskId};
use crate::engine::retry::RetryPolicy;

/// Classifies a task failure for the retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The invocation exceeded its timeout; retried like Transient.
    Timeout,
    /// The collaborator refused the request; never retried.
    Rejected,
    /// Transient (network blip, throttling); retried per policy.
    Transient,
    /// Permanent (validation, bad data); never retried.
    Permanent,
}

impl FailureKind {
    /// Whether the retry policy may schedule another attempt.
    pub fn retryable(&self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::Transient)
    }
}

/// Structured failure from a task invocation.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Rejected,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }
}

/// One task invocation as planned by the pipeline: name, opaque input,
/// timeout, and the retry policy that governs its attempts. The policy is
/// immutable once the invocation starts.
#[derive(Clone, Debug)]
pub struct TaskRequest {
    pub task_id: TaskId,
    pub task: String,
    pub input: Value,
    pub timeout: Duration,
    pub policy: RetryPolicy,
}

impl TaskRequest {
    /// A request whose task id is the task name (one logical invocation per
    /// task per case, as in the fixed pipeline).
    pub fn named(task: impl Into<String>, input: Value, timeout: Duration, policy: RetryPolicy) -> Self {
        let task = task.into();
        Self {
            task_id: task.clone(),
            task,
            input,
            timeout,
            policy,
        }
    }
}

/// Invokes one named external task. Must be safe to call concurrently for
/// independent invocations. The driver enforces the request timeout and
/// records outcomes as events; implementations only do the work.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn invoke(&self, case_id: &CaseId, request: &TaskRequest) -> Result<Value, TaskFailure>;
}
