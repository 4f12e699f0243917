//! Timeline view: a case's event log flattened for inspection.

use serde::{Deserialize, Serialize};

use crate::engine::event::{Event, SequencedEvent};
use crate::engine::identity::{CaseId, Seq, TaskId};
use crate::engine::state::Phase;

/// One log entry, reduced to what an operator needs to see.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub seq: Seq,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The full audit trail of a case.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseTimeline {
    pub case_id: CaseId,
    pub phase: Phase,
    pub entries: Vec<TimelineEntry>,
}

impl CaseTimeline {
    pub fn build(case_id: &CaseId, phase: Phase, log: &[SequencedEvent]) -> Self {
        let entries = log
            .iter()
            .map(|se| {
                let (kind, task_id, detail) = describe(&se.event);
                TimelineEntry {
                    seq: se.seq,
                    kind: kind.to_string(),
                    task_id,
                    detail,
                }
            })
            .collect();
        Self {
            case_id: case_id.clone(),
            phase,
            entries,
        }
    }
}

fn describe(event: &Event) -> (&'static str, Option<TaskId>, Option<String>) {
    match event {
        Event::CaseSubmitted { .. } => ("case_submitted", None, None),
        Event::TaskScheduled { task_id, task, .. } => {
            ("task_scheduled", Some(task_id.clone()), Some(task.clone()))
        }
        Event::TaskCompleted { task_id, .. } => ("task_completed", Some(task_id.clone()), None),
        Event::TaskFailed {
            task_id,
            error,
            attempt,
        } => (
            "task_failed",
            Some(task_id.clone()),
            Some(format!("attempt {attempt}: {error}")),
        ),
        Event::TaskExhausted { task_id, error } => (
            "task_exhausted",
            Some(task_id.clone()),
            Some(error.clone()),
        ),
        Event::SignalReceived { name, .. } => ("signal_received", None, Some(name.clone())),
        Event::CaseCompleted { .. } => ("case_completed", None, None),
        Event::CaseFailed { error } => ("case_failed", None, Some(error.clone())),
        Event::CaseAborted { reason } => ("case_aborted", None, Some(reason.clone())),
    }
}
