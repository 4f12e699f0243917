//! caseflow: a durable, event-sourced orchestration engine for multi-stage
//! decision pipelines.
//!
//! A case moves through data-acquisition, parallel evaluation, an aggregate
//! decision, and a potentially long human-review wait. The event log is the
//! source of truth: all case state is derived by folding events, so any case
//! can be rehydrated after a crash and driven forward from exactly where it
//! stopped. Task bodies are external collaborators behind [engine::TaskExecutor].

pub mod engine;
pub mod server;
pub mod underwriting;
