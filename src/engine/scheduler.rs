//! Case scheduler: per-case exclusivity, signal delivery, crash recovery.
//!
//! Invariant enforced here: at most one drive pass per case at a time
//! (per-case async lock). Drives triggered while a case is being driven
//! queue on the case lock and run afterwards; a drive over an
//! already-settled case is a cheap no-op, so queued duplicates are harmless.
//!
//! Bounded execution lives in the driver: its pool caps concurrent task
//! attempts, and a case sleeping out a backoff or parked on a signal holds
//! no slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tokio::sync::Mutex as CaseLock;
use uuid::Uuid;

use crate::engine::driver::{CaseDriver, CaseStatus};
use crate::engine::event::{EngineError, Event, EventStore};
use crate::engine::identity::CaseId;
use crate::engine::state::CaseState;

pub struct CaseScheduler {
    driver: Arc<CaseDriver>,
    events: Arc<dyn EventStore>,
    locks: StdMutex<HashMap<CaseId, Arc<CaseLock<()>>>>,
}

impl CaseScheduler {
    pub fn new(driver: Arc<CaseDriver>, events: Arc<dyn EventStore>) -> Self {
        Self {
            driver,
            events,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Accepts a new case: appends `CaseSubmitted` and starts driving in the
    /// background. Returns immediately with the new case id.
    pub fn submit(&self, application: Value) -> Result<CaseId, EngineError> {
        let case_id: CaseId = format!("case-{}", Uuid::new_v4());
        self.events
            .append(&case_id, &[Event::CaseSubmitted { application }])?;
        tracing::info!(case_id, "case submitted");
        self.spawn_drive(case_id.clone());
        Ok(case_id)
    }

    /// Delivers a signal and drives the case until it parks or terminates.
    /// Appending is unconditional; the fold ignores signals a terminal case
    /// can no longer use.
    pub async fn signal(
        &self,
        case_id: &CaseId,
        name: &str,
        payload: Value,
    ) -> Result<CaseStatus, EngineError> {
        self.events.append(
            case_id,
            &[Event::SignalReceived {
                name: name.to_string(),
                payload,
            }],
        )?;
        tracing::info!(case_id, signal = name, "signal delivered");
        self.drive_now(case_id).await
    }

    /// Aborts the case. The abort event is terminal; in-flight task attempts
    /// may still finish (at-least-once), but their outcomes change nothing.
    pub async fn abort(
        &self,
        case_id: &CaseId,
        reason: &str,
    ) -> Result<CaseStatus, EngineError> {
        self.events.append(
            case_id,
            &[Event::CaseAborted {
                reason: reason.to_string(),
            }],
        )?;
        tracing::info!(case_id, reason, "case aborted");
        self.drive_now(case_id).await
    }

    /// Drives the case under the per-case lock, waiting for it if a drive is
    /// already in flight.
    pub async fn drive_now(&self, case_id: &CaseId) -> Result<CaseStatus, EngineError> {
        let lock = self.lock_for(case_id)?;
        let _exclusive = lock.lock().await;
        self.driver.drive(case_id).await
    }

    /// Re-drives every non-terminal case found in the store. Called once at
    /// startup; settled tasks are skipped by the driver, so only incomplete
    /// work is re-issued. Returns the number of cases resumed.
    pub fn recover(&self) -> Result<usize, EngineError> {
        let mut resumed = 0;
        for case_id in self.events.cases()? {
            let state = CaseState::fold(&self.events.scan(&case_id, 1)?);
            if state.is_terminal() {
                continue;
            }
            tracing::info!(case_id, "resuming case after restart");
            self.spawn_drive(case_id);
            resumed += 1;
        }
        Ok(resumed)
    }

    fn spawn_drive(&self, case_id: CaseId) {
        let lock = match self.lock_for(&case_id) {
            Ok(lock) => lock,
            Err(error) => {
                tracing::error!(case_id, %error, "could not take case lock");
                return;
            }
        };
        let driver = Arc::clone(&self.driver);
        tokio::spawn(async move {
            let _exclusive = lock.lock().await;
            if let Err(error) = driver.drive(&case_id).await {
                tracing::error!(case_id, %error, "background drive failed");
            }
        });
    }

    fn lock_for(&self, case_id: &CaseId) -> Result<Arc<CaseLock<()>>, EngineError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;
        Ok(Arc::clone(
            locks.entry(case_id.clone()).or_default(),
        ))
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn driver(&self) -> &Arc<CaseDriver> {
        &self.driver
    }
}
