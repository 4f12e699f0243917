//! SQLite-backed event store for durability across restarts.
//!
//! This module is feature-gated behind `sqlite-persistence`.

#[cfg(feature = "sqlite-persistence")]
use std::path::{Path, PathBuf};
#[cfg(feature = "sqlite-persistence")]
use std::sync::Mutex;
#[cfg(feature = "sqlite-persistence")]
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "sqlite-persistence")]
use rusqlite::{params, Connection};

#[cfg(feature = "sqlite-persistence")]
use crate::engine::event::{EngineError, Event, EventStore, SequencedEvent};
#[cfg(feature = "sqlite-persistence")]
use crate::engine::identity::{CaseId, Seq};

#[cfg(feature = "sqlite-persistence")]
fn map_store_err(prefix: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::EventStore(format!("{prefix}: {err}"))
}

#[cfg(feature = "sqlite-persistence")]
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// SQLite-backed event log store. The `(case_id, seq)` primary key makes
/// duplicate seq assignment impossible; append is a single transaction.
#[cfg(feature = "sqlite-persistence")]
pub struct SqliteEventStore {
    db_path: PathBuf,
    lock: Mutex<()>,
}

#[cfg(feature = "sqlite-persistence")]
impl SqliteEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn open_connection(&self) -> Result<Connection, EngineError> {
        if let Some(parent) = Path::new(&self.db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_store_err("create parent dir", e))?;
        }
        let conn =
            Connection::open(&self.db_path).map_err(|e| map_store_err("open sqlite db", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| map_store_err("set journal_mode", e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| map_store_err("set synchronous", e))?;
        self.ensure_schema(&conn)?;
        Ok(conn)
    }

    fn ensure_schema(&self, conn: &Connection) -> Result<(), EngineError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS case_events (
                case_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                event_json TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (case_id, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_case_events_case_seq
            ON case_events (case_id, seq);
            ",
        )
        .map_err(|e| map_store_err("ensure schema", e))?;
        Ok(())
    }
}

#[cfg(feature = "sqlite-persistence")]
impl EventStore for SqliteEventStore {
    fn append(&self, case_id: &CaseId, events: &[Event]) -> Result<Seq, EngineError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| map_store_err("lock poisoned", "mutex poisoned"))?;
        let mut conn = self.open_connection()?;

        if events.is_empty() {
            let head: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) FROM case_events WHERE case_id = ?1",
                    params![case_id],
                    |row| row.get(0),
                )
                .map_err(|e| map_store_err("read head", e))?;
            return Ok(head as Seq);
        }

        let tx = conn
            .transaction()
            .map_err(|e| map_store_err("begin tx", e))?;
        let current_head: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM case_events WHERE case_id = ?1",
                params![case_id],
                |row| row.get(0),
            )
            .map_err(|e| map_store_err("read head", e))?;

        let mut last_seq = current_head as Seq;
        for (idx, event) in events.iter().enumerate() {
            let seq = current_head + idx as i64 + 1;
            let json =
                serde_json::to_string(event).map_err(|e| map_store_err("serialize event", e))?;
            tx.execute(
                "INSERT INTO case_events (case_id, seq, event_json, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
                params![case_id, seq, json, now_ms()],
            )
            .map_err(|e| map_store_err("insert event", e))?;
            last_seq = seq as Seq;
        }

        tx.commit().map_err(|e| map_store_err("commit tx", e))?;
        Ok(last_seq)
    }

    fn scan(&self, case_id: &CaseId, from: Seq) -> Result<Vec<SequencedEvent>, EngineError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| map_store_err("lock poisoned", "mutex poisoned"))?;
        let conn = self.open_connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT seq, event_json FROM case_events
                 WHERE case_id = ?1 AND seq >= ?2
                 ORDER BY seq ASC",
            )
            .map_err(|e| map_store_err("prepare scan", e))?;
        let rows = stmt
            .query_map(params![case_id, from as i64], |row| {
                let seq: i64 = row.get(0)?;
                let json: String = row.get(1)?;
                let event: Event = serde_json::from_str(&json).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(
                        json.len(),
                        rusqlite::types::Type::Text,
                        Box::new(err),
                    )
                })?;
                Ok(SequencedEvent {
                    seq: seq as Seq,
                    event,
                })
            })
            .map_err(|e| map_store_err("query scan", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_store_err("row decode", e))?);
        }
        Ok(out)
    }

    fn head(&self, case_id: &CaseId) -> Result<Seq, EngineError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| map_store_err("lock poisoned", "mutex poisoned"))?;
        let conn = self.open_connection()?;
        let head: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM case_events WHERE case_id = ?1",
                params![case_id],
                |row| row.get(0),
            )
            .map_err(|e| map_store_err("read head", e))?;
        Ok(head as Seq)
    }

    fn cases(&self) -> Result<Vec<CaseId>, EngineError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| map_store_err("lock poisoned", "mutex poisoned"))?;
        let conn = self.open_connection()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT case_id FROM case_events ORDER BY case_id ASC")
            .map_err(|e| map_store_err("prepare cases", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| map_store_err("query cases", e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_store_err("row decode", e))?);
        }
        Ok(out)
    }
}

#[cfg(all(test, feature = "sqlite-persistence"))]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::SqliteEventStore;
    use crate::engine::event::{Event, EventStore};
    use crate::engine::state::CaseState;

    fn test_db_path(name: &str) -> std::path::PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("caseflow-{name}-{ts}.sqlite"))
    }

    #[test]
    fn sqlite_event_store_roundtrip() {
        let path = test_db_path("events");
        let store = SqliteEventStore::new(&path);
        let case_id = "case-sqlite-events".to_string();

        assert_eq!(store.head(&case_id).unwrap(), 0);
        let seq = store
            .append(
                &case_id,
                &[Event::CaseSubmitted {
                    application: serde_json::json!({"applicant_id": "A1"}),
                }],
            )
            .unwrap();
        assert_eq!(seq, 1);

        let seq2 = store
            .append(
                &case_id,
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

        let scanned = store.scan(&case_id, 2).unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(store.head(&case_id).unwrap(), 3);
    }

    #[test]
    fn reopened_store_replays_to_the_same_state() {
        let path = test_db_path("replay");
        let case_id = "case-sqlite-replay".to_string();
        {
            let store = SqliteEventStore::new(&path);
            store
                .append(
                    &case_id,
                    &[
                        Event::CaseSubmitted {
                            application: serde_json::json!({"amount": 5000.0}),
                        },
                        Event::TaskScheduled {
                            task_id: "fetch_bank_account".into(),
                            task: "fetch_bank_account".into(),
                            input: serde_json::json!("A1"),
                        },
                        Event::TaskCompleted {
                            task_id: "fetch_bank_account".into(),
                            output: serde_json::json!({"accounts": []}),
                        },
                    ],
                )
                .unwrap();
        }
        let store = SqliteEventStore::new(&path);
        let state = CaseState::fold(&store.scan(&case_id, 1).unwrap());
        assert!(state.output("fetch_bank_account").is_some());
        assert!(!state.is_terminal());
        assert_eq!(store.cases().unwrap(), vec![case_id]);
    }
}
