//! Derived case state: a pure fold over the event log.
//!
//! Nothing here is stored independently. Replaying the same ordered events
//! from an empty state always yields the same `CaseState`; that equivalence
//! is the durability contract and is asserted in tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::event::{Event, SequencedEvent};
use crate::engine::identity::TaskId;

/// Pipeline phase, derived from the event log (see `Pipeline::phase`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Acquiring,
    Evaluating,
    Deciding,
    AwaitingSignal,
    Completed,
    Failed,
    Aborted,
}

/// Terminal outcome of one task invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Completed(Value),
    Exhausted(String),
}

/// Progress of one task invocation, reconstructed from its events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Whether a `TaskScheduled` event exists (re-drives must not duplicate it).
    pub scheduled: bool,
    /// Number of failed attempts so far; the next attempt is `failures + 1`.
    pub failures: u32,
    pub outcome: Option<TaskOutcome>,
}

impl TaskRecord {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Full derived state of one case.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseState {
    /// The submission payload, from `CaseSubmitted`.
    pub application: Option<Value>,
    /// Per-task progress, keyed by task id (BTreeMap for deterministic order).
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    /// First payload received per signal name; later signals are no-ops.
    pub signals: BTreeMap<String, Value>,
    /// Final result, from `CaseCompleted`.
    pub result: Option<Value>,
    /// Terminal failure, from `CaseFailed`.
    pub failure: Option<String>,
    /// Abort reason, from `CaseAborted`.
    pub aborted: Option<String>,
}

impl CaseState {
    /// Folds an ordered event sequence into state, starting from empty.
    pub fn fold<'a>(events: impl IntoIterator<Item = &'a SequencedEvent>) -> Self {
        let mut state = CaseState::default();
        for se in events {
            state.apply(&se.event);
        }
        state
    }

    /// Applies one event. Duplicate terminal events for a task and repeated
    /// signals are ignored, which keeps the fold idempotent under replay.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::CaseSubmitted { application } => {
                if self.application.is_none() {
                    self.application = Some(application.clone());
                }
            }
            Event::TaskScheduled { task_id, .. } => {
                self.tasks.entry(task_id.clone()).or_default().scheduled = true;
            }
            Event::TaskCompleted { task_id, output } => {
                let record = self.tasks.entry(task_id.clone()).or_default();
                if record.outcome.is_none() {
                    record.outcome = Some(TaskOutcome::Completed(output.clone()));
                }
            }
            Event::TaskFailed { task_id, .. } => {
                self.tasks.entry(task_id.clone()).or_default().failures += 1;
            }
            Event::TaskExhausted { task_id, error } => {
                let record = self.tasks.entry(task_id.clone()).or_default();
                if record.outcome.is_none() {
                    record.outcome = Some(TaskOutcome::Exhausted(error.clone()));
                }
            }
            Event::SignalReceived { name, payload } => {
                self.signals
                    .entry(name.clone())
                    .or_insert_with(|| payload.clone());
            }
            Event::CaseCompleted { result } => {
                if self.result.is_none() {
                    self.result = Some(result.clone());
                }
            }
            Event::CaseFailed { error } => {
                if self.failure.is_none() {
                    self.failure = Some(error.clone());
                }
            }
            Event::CaseAborted { reason } => {
                if self.aborted.is_none() {
                    self.aborted = Some(reason.clone());
                }
            }
        }
    }

    /// Completed output for a task, if any.
    pub fn output(&self, task_id: &str) -> Option<&Value> {
        match self.tasks.get(task_id).and_then(|r| r.outcome.as_ref()) {
            Some(TaskOutcome::Completed(v)) => Some(v),
            _ => None,
        }
    }

    /// Whether the task ended in `Exhausted`.
    pub fn exhausted(&self, task_id: &str) -> Option<&str> {
        match self.tasks.get(task_id).and_then(|r| r.outcome.as_ref()) {
            Some(TaskOutcome::Exhausted(e)) => Some(e.as_str()),
            _ => None,
        }
    }

    /// Progress record for a task (empty default when never touched).
    pub fn task(&self, task_id: &str) -> TaskRecord {
        self.tasks.get(task_id).cloned().unwrap_or_default()
    }

    /// First payload delivered for the named signal.
    pub fn signal(&self, name: &str) -> Option<&Value> {
        self.signals.get(name)
    }

    /// Completed, failed, or aborted.
    pub fn is_terminal(&self) -> bool {
        self.result.is_some() || self.failure.is_some() || self.aborted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(events: Vec<Event>) -> Vec<SequencedEvent> {
        events
            .into_iter()
            .enumerate()
            .map(|(i, event)| SequencedEvent {
                seq: (i + 1) as u64,
                event,
            })
            .collect()
    }

    #[test]
    fn fold_is_deterministic() {
        let events = seq(vec![
            Event::CaseSubmitted {
                application: serde_json::json!({"applicant_id": "A1"}),
            },
            Event::TaskScheduled {
                task_id: "fetch_bank_account".into(),
                task: "fetch_bank_account".into(),
                input: serde_json::json!("A1"),
            },
            Event::TaskFailed {
                task_id: "fetch_bank_account".into(),
                error: "Transient: blip".into(),
                attempt: 1,
            },
            Event::TaskCompleted {
                task_id: "fetch_bank_account".into(),
                output: serde_json::json!({"accounts": []}),
            },
        ]);
        let a = CaseState::fold(&events);
        let b = CaseState::fold(&events);
        assert_eq!(a, b);
        let record = a.task("fetch_bank_account");
        assert!(record.scheduled);
        assert_eq!(record.failures, 1);
        assert!(a.output("fetch_bank_account").is_some());
    }

    #[test]
    fn first_signal_wins() {
        let events = seq(vec![
            Event::CaseSubmitted {
                application: serde_json::json!({}),
            },
            Event::SignalReceived {
                name: "decision".into(),
                payload: serde_json::json!({"action": "approve"}),
            },
            Event::SignalReceived {
                name: "decision".into(),
                payload: serde_json::json!({"action": "reject"}),
            },
        ]);
        let state = CaseState::fold(&events);
        assert_eq!(state.signal("decision").unwrap()["action"], "approve");
    }

    #[test]
    fn first_terminal_task_outcome_wins() {
        let events = seq(vec![
            Event::TaskCompleted {
                task_id: "t".into(),
                output: serde_json::json!(1),
            },
            Event::TaskExhausted {
                task_id: "t".into(),
                error: "late".into(),
            },
        ]);
        let state = CaseState::fold(&events);
        assert_eq!(state.output("t"), Some(&serde_json::json!(1)));
        assert!(state.exhausted("t").is_none());
    }

    #[test]
    fn terminal_flags() {
        let mut state = CaseState::default();
        assert!(!state.is_terminal());
        state.apply(&Event::CaseAborted {
            reason: "operator".into(),
        });
        assert!(state.is_terminal());
        assert_eq!(state.aborted.as_deref(), Some("operator"));
    }
}
