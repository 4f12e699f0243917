//! Event type and EventStore for the caseflow engine.
//!
//! Events are the source of truth. All case state is derived by folding
//! events; nothing about a case is stored anywhere else.
//! Constraints: append is atomic (all or nothing); every event has a seq;
//! scan returns events in ascending seq order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::identity::{CaseId, Seq, TaskId};

/// A single event in a case's log.
///
/// Task lifecycle events carry the task id so attempt counts and outcomes can
/// be recovered by replay alone. `TaskFailed` is recorded once per failed
/// attempt; `TaskExhausted` is the terminal failure of the whole invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    /// Initial event; carries the application payload so that state is a pure
    /// function of the event sequence.
    CaseSubmitted { application: Value },
    /// A task invocation was issued for the first time.
    TaskScheduled {
        task_id: TaskId,
        task: String,
        input: Value,
    },
    /// The task completed; output is stored for replay.
    TaskCompleted { task_id: TaskId, output: Value },
    /// One attempt failed; `attempt` is 1-based.
    TaskFailed {
        task_id: TaskId,
        error: String,
        attempt: u32,
    },
    /// The retry budget ran out (or the failure was non-retryable).
    TaskExhausted { task_id: TaskId, error: String },
    /// An external signal was delivered to the case.
    SignalReceived { name: String, payload: Value },
    /// Terminal success; `result` is the merged pipeline outcome.
    CaseCompleted { result: Value },
    /// Terminal failure, distinct from completion. Still queryable.
    CaseFailed { error: String },
    /// Operator-initiated terminal event; the interpreter stops scheduling.
    CaseAborted { reason: String },
}

/// An event with its assigned sequence number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: Seq,
    pub event: Event,
}

/// Event store: append-only log per case, source of truth.
///
/// **Constraints (must hold in all implementations and tests):**
/// - `append`: either all events in the batch succeed or none (atomicity).
/// - Once `append` returns, the events are visible to every subsequent
///   `scan`, including after a process restart for durable stores.
/// - `scan(case_id, from)` returns events in **ascending seq order**.
pub trait EventStore: Send + Sync {
    /// Appends events for the given case. Returns the seq of the last written
    /// event. Implementations assign seqs and guarantee atomicity.
    fn append(&self, case_id: &CaseId, events: &[Event]) -> Result<Seq, EngineError>;

    /// Scans events for the case starting at `from` (inclusive), ascending.
    fn scan(&self, case_id: &CaseId, from: Seq) -> Result<Vec<SequencedEvent>, EngineError>;

    /// Returns the highest seq for the case (0 if no events).
    fn head(&self, case_id: &CaseId) -> Result<Seq, EngineError>;

    /// Enumerates every case id known to the store (for recovery).
    fn cases(&self) -> Result<Vec<CaseId>, EngineError>;
}

/// Engine-level error type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("event store error: {0}")]
    EventStore(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error("scheduler error: {0}")]
    Scheduler(String),
}
