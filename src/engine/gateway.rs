//! Case gateway: the query and command surface over the scheduler.
//!
//! Everything here is read-your-writes against the event store: queries fold
//! the log on demand, commands append and wake the case. Queries over a case
//! that has not reached the queried stage return `NotReady`, never an error
//! payload from half-built state.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::engine::driver::CaseStatus;
use crate::engine::event::EngineError;
use crate::engine::identity::CaseId;
use crate::engine::scheduler::CaseScheduler;
use crate::engine::state::{CaseState, Phase};
use crate::engine::timeline::CaseTimeline;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown case: {0}")]
    UnknownCase(CaseId),
    /// The case exists but has not produced the queried value yet.
    #[error("not ready")]
    NotReady,
    #[error("unknown query: {0}")]
    UnknownQuery(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Status view for one case.
#[derive(Clone, Debug, Serialize)]
pub struct StatusView {
    pub case_id: CaseId,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting_signal: Option<String>,
}

pub struct CaseGateway {
    scheduler: Arc<CaseScheduler>,
}

impl CaseGateway {
    pub fn new(scheduler: Arc<CaseScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn submit(&self, application: Value) -> Result<CaseId, GatewayError> {
        Ok(self.scheduler.submit(application)?)
    }

    /// Delivers a named signal and returns the phase the case settled into.
    pub async fn signal(
        &self,
        case_id: &CaseId,
        name: &str,
        payload: Value,
    ) -> Result<StatusView, GatewayError> {
        self.ensure_known(case_id)?;
        self.scheduler.signal(case_id, name, payload).await?;
        self.status(case_id)
    }

    pub async fn abort(&self, case_id: &CaseId, reason: &str) -> Result<StatusView, GatewayError> {
        self.ensure_known(case_id)?;
        self.scheduler.abort(case_id, reason).await?;
        self.status(case_id)
    }

    /// Named read-only query against derived state.
    ///
    /// `summary` is the pipeline's progress summary; `final_result` is the
    /// terminal result. Both return `NotReady` until available.
    pub fn query(&self, case_id: &CaseId, name: &str) -> Result<Value, GatewayError> {
        let state = self.state(case_id)?;
        match name {
            "summary" => self
                .scheduler
                .driver()
                .pipeline()
                .summary(&state)
                .ok_or(GatewayError::NotReady),
            "final_result" => state.result.clone().ok_or(GatewayError::NotReady),
            other => Err(GatewayError::UnknownQuery(other.to_string())),
        }
    }

    pub fn status(&self, case_id: &CaseId) -> Result<StatusView, GatewayError> {
        let state = self.state(case_id)?;
        let phase = self.scheduler.driver().pipeline().phase(&state);
        let awaiting_signal = match self.scheduler.driver().status(&state) {
            CaseStatus::AwaitingSignal { signal } => Some(signal),
            _ => None,
        };
        Ok(StatusView {
            case_id: case_id.clone(),
            phase,
            awaiting_signal,
        })
    }

    pub fn timeline(&self, case_id: &CaseId) -> Result<CaseTimeline, GatewayError> {
        self.ensure_known(case_id)?;
        let log = self.scheduler.events().scan(case_id, 1)?;
        let state = CaseState::fold(&log);
        let phase = self.scheduler.driver().pipeline().phase(&state);
        Ok(CaseTimeline::build(case_id, phase, &log))
    }

    pub fn cases(&self) -> Result<Vec<CaseId>, GatewayError> {
        Ok(self.scheduler.events().cases()?)
    }

    pub fn scheduler(&self) -> &Arc<CaseScheduler> {
        &self.scheduler
    }

    fn state(&self, case_id: &CaseId) -> Result<CaseState, GatewayError> {
        self.ensure_known(case_id)?;
        Ok(CaseState::fold(&self.scheduler.events().scan(case_id, 1)?))
    }

    fn ensure_known(&self, case_id: &CaseId) -> Result<(), GatewayError> {
        if self.scheduler.events().head(case_id)? == 0 {
            return Err(GatewayError::UnknownCase(case_id.clone()));
        }
        Ok(())
    }
}
