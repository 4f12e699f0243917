//! Case server binary: wires the underwriting pipeline to the HTTP surface.
//!
//! Configuration via environment:
//! - `CASEFLOW_ADDR` — listen address (default `127.0.0.1:8080`)
//! - `CASEFLOW_DB` — sqlite event log path (requires the
//!   `sqlite-persistence` feature; in-memory store otherwise)
//! - `CASEFLOW_MAX_CONCURRENT` — driver pool size (default 8)
//! - `RUST_LOG` — tracing filter (default `info`)

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use caseflow::engine::driver::CaseDriver;
use caseflow::engine::event::EventStore;
use caseflow::engine::event_store::InMemoryEventStore;
use caseflow::engine::gateway::CaseGateway;
use caseflow::engine::scheduler::CaseScheduler;
use caseflow::server::{build_router, ApiState};
use caseflow::underwriting::pipeline::UnderwritingPipeline;
use caseflow::underwriting::tasks::HeuristicTaskExecutor;

fn event_store() -> Arc<dyn EventStore> {
    #[cfg(feature = "sqlite-persistence")]
    if let Ok(path) = std::env::var("CASEFLOW_DB") {
        tracing::info!(path, "using sqlite event store");
        return Arc::new(caseflow::engine::sqlite_store::SqliteEventStore::new(path));
    }
    tracing::info!("using in-memory event store");
    Arc::new(InMemoryEventStore::new())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::var("CASEFLOW_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let max_concurrent = std::env::var("CASEFLOW_MAX_CONCURRENT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(8);

    let events = event_store();
    let driver = Arc::new(CaseDriver::new(
        events.clone(),
        Arc::new(HeuristicTaskExecutor::new()),
        Arc::new(UnderwritingPipeline::new()),
        max_concurrent,
    ));
    let scheduler = Arc::new(CaseScheduler::new(driver, events));

    let resumed = scheduler.recover()?;
    if resumed > 0 {
        tracing::info!(resumed, "resumed cases from the event log");
    }

    let state = ApiState::new(Arc::new(CaseGateway::new(scheduler)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "case server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
