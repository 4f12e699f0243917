//! In-memory EventStore implementation.
//!
//! Append is atomic (all or nothing); scan returns events in ascending seq
//! order. Suitable for tests and single-process demos; use the sqlite store
//! for durability across restarts.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::engine::event::{EngineError, Event, EventStore, SequencedEvent};
use crate::engine::identity::{CaseId, Seq};

/// In-memory event store: one log per case, seq assigned on append.
pub struct InMemoryEventStore {
    /// case_id -> ordered events (seq 1, 2, 3, ...)
    logs: RwLock<HashMap<CaseId, Vec<SequencedEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
        }
    }

    fn next_seq(log: &[SequencedEvent]) -> Seq {
        log.last().map(|e| e.seq + 1).unwrap_or(1)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, case_id: &CaseId, events: &[Event]) -> Result<Seq, EngineError> {
        if events.is_empty() {
            return self.head(case_id);
        }
        let mut logs = self
            .logs
            .write()
            .map_err(|e| EngineError::EventStore(e.to_string()))?;
        let log = logs.entry(case_id.clone()).or_default();
        let start_seq = Self::next_seq(log);
        for (i, event) in events.iter().cloned().enumerate() {
            log.push(SequencedEvent {
                seq: start_seq + i as Seq,
                event,
            });
        }
        Ok(start_seq + events.len() as Seq - 1)
    }

    fn scan(&self, case_id: &CaseId, from: Seq) -> Result<Vec<SequencedEvent>, EngineError> {
        let logs = self
            .logs
            .read()
            .map_err(|e| EngineError::EventStore(e.to_string()))?;
        let log = match logs.get(case_id) {
            Some(l) => l,
            None => return Ok(Vec::new()),
        };
        Ok(log.iter().filter(|e| e.seq >= from).cloned().collect())
    }

    fn head(&self, case_id: &CaseId) -> Result<Seq, EngineError> {
        let logs = self
            .logs
            .read()
            .map_err(|e| EngineError::EventStore(e.to_string()))?;
        Ok(logs
            .get(case_id)
            .and_then(|l| l.last())
            .map(|e| e.seq)
            .unwrap_or(0))
    }

    fn cases(&self) -> Result<Vec<CaseId>, EngineError> {
        let logs = self
            .logs
            .read()
            .map_err(|e| EngineError::EventStore(e.to_string()))?;
        let mut ids: Vec<CaseId> = logs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_contiguous_seqs() {
        let store = InMemoryEventStore::new();
        let case = "case-seq".to_string();
        assert_eq!(store.head(&case).unwrap(), 0);
        let seq = store
            .append(
                &case,
                &[Event::CaseSubmitted {
                    application: serde_json::json!({"applicant_id": "A1"}),
                }],
            )
            .unwrap();
        assert_eq!(seq, 1);
        let seq2 = store
            .append(
                &case,
                &[
                    Event::SignalReceived {
                        name: "decision".into(),
                        payload: serde_json::json!({"action": "approve"}),
                    },
                    Event::CaseCompleted {
                        result: serde_json::json!({}),
                    },
                ],
            )
            .unwrap();
        assert_eq!(seq2, 3);
        assert_eq!(store.head(&case).unwrap(), 3);
    }

    #[test]
    fn scan_from_returns_tail_in_order() {
        let store = InMemoryEventStore::new();
        let case = "case-scan".to_string();
        store
            .append(
                &case,
                &[
                    Event::CaseSubmitted {
                        application: serde_json::json!({}),
                    },
                    Event::TaskScheduled {
                        task_id: "t1".into(),
                        task: "t1".into(),
                        input: serde_json::json!(null),
                    },
                    Event::TaskCompleted {
                        task_id: "t1".into(),
                        output: serde_json::json!("ok"),
                    },
                ],
            )
            .unwrap();
        let tail = store.scan(&case, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, 2);
        assert_eq!(tail[1].seq, 3);
    }

    #[test]
    fn scan_unknown_case_is_empty() {
        let store = InMemoryEventStore::new();
        assert!(store.scan(&"nope".to_string(), 1).unwrap().is_empty());
    }

    #[test]
    fn cases_enumerates_known_ids() {
        let store = InMemoryEventStore::new();
        for id in ["case-b", "case-a"] {
            store
                .append(
                    &id.to_string(),
                    &[Event::CaseSubmitted {
                        application: serde_json::json!({}),
                    }],
                )
                .unwrap();
        }
        assert_eq!(store.cases().unwrap(), vec!["case-a", "case-b"]);
    }
}
