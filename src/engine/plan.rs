//! Pipeline planning: derived state in, next action out.
//!
//! `Pipeline::plan` is a pure function. It never performs IO and never looks
//! at wall-clock time; given the same `CaseState` it always returns the same
//! action. That purity is what makes replay and crash recovery work.

use serde_json::Value;

use crate::engine::event::EngineError;
use crate::engine::state::{CaseState, Phase};
use crate::engine::task::TaskRequest;

/// What the driver should do next for a case.
#[derive(Debug)]
pub enum NextAction {
    /// Issue these task invocations (concurrently) and re-plan when they
    /// settle. Requests whose task already has a terminal outcome are skipped
    /// by the driver.
    Schedule(Vec<TaskRequest>),
    /// Park the case until the named signal arrives. No polling: the case
    /// consumes no resources while parked.
    Await { signal: String },
    /// Terminal success with the final result.
    Complete(Value),
    /// Terminal failure with a reason.
    Fail(String),
    /// The case is already terminal; nothing to do.
    Idle,
}

/// Decides what a case needs next from its derived state.
///
/// Implementations encode the stage graph: which tasks belong to which
/// stage, fallback branches on exhaustion, and when to park for a signal.
pub trait Pipeline: Send + Sync {
    /// Pure planning step; see module docs.
    fn plan(&self, state: &CaseState) -> Result<NextAction, EngineError>;

    /// Current phase of the case, for status views.
    fn phase(&self, state: &CaseState) -> Phase;

    /// Progress summary, once enough of the pipeline has run to produce one.
    /// `None` means "not ready yet", never an error.
    fn summary(&self, state: &CaseState) -> Option<Value>;
}
