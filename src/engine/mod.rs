//! Durable case engine: event-sourced orchestration of staged pipelines.
//!
//! The event log is the only source of truth. A case's state is a pure fold
//! over its events; the driver replays, asks the pipeline what comes next,
//! and acts. Crash recovery is just re-driving non-terminal cases: settled
//! tasks are skipped, incomplete ones re-issued (at-least-once).

pub mod driver;
pub mod event;
pub mod event_store;
pub mod gateway;
pub mod identity;
pub mod plan;
pub mod retry;
pub mod scheduler;
pub mod sqlite_store;
pub mod state;
pub mod stubs;
pub mod task;
pub mod timeline;

pub use driver::{CaseDriver, CaseStatus};
pub use event::{EngineError, Event, EventStore, SequencedEvent};
pub use event_store::InMemoryEventStore;
pub use gateway::{CaseGateway, GatewayError, StatusView};
pub use identity::{CaseId, Seq, TaskId};
pub use plan::{NextAction, Pipeline};
pub use retry::{next_action, RetryAction, RetryPolicy};
pub use scheduler::CaseScheduler;
#[cfg(feature = "sqlite-persistence")]
pub use sqlite_store::SqliteEventStore;
pub use state::{CaseState, Phase, TaskOutcome, TaskRecord};
pub use task::{FailureKind, TaskExecutor, TaskFailure, TaskRequest};
pub use timeline::{CaseTimeline, TimelineEntry};
