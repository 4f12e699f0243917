//! Case driver: the fold → plan → act loop.
//!
//! One drive pass replays the case's events, asks the pipeline what comes
//! next, and acts: scheduling tasks, parking on a signal, or writing a
//! terminal event. Re-driving a case is always safe; tasks with a terminal
//! outcome are never re-run, and duplicate drives converge on the same
//! events.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::engine::event::{EngineError, Event, EventStore};
use crate::engine::identity::CaseId;
use crate::engine::plan::{NextAction, Pipeline};
use crate::engine::retry::{next_action, RetryAction};
use crate::engine::state::CaseState;
use crate::engine::task::{TaskExecutor, TaskFailure, TaskRequest};

/// Where a drive pass left the case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseStatus {
    Completed,
    AwaitingSignal { signal: String },
    Failed,
    Aborted,
    /// Terminal before this pass, or nothing to do.
    Idle,
}

/// Drives one case at a time through its pipeline.
///
/// The driver owns retry: it enforces per-request timeouts, sleeps the
/// backoff between attempts, and records every attempt as events. Callers
/// must ensure at most one drive pass runs per case at a time (the
/// scheduler's per-case lock).
///
/// The driver also owns the execution pool: at most `max_concurrent` task
/// attempts run at once, across all cases. A slot is held only while the
/// executor is actually running; a case waiting out a backoff delay (or
/// parked on a signal) holds no slot, so it cannot starve other cases.
pub struct CaseDriver {
    events: Arc<dyn EventStore>,
    executor: Arc<dyn TaskExecutor>,
    pipeline: Arc<dyn Pipeline>,
    permits: Arc<Semaphore>,
}

impl CaseDriver {
    pub fn new(
        events: Arc<dyn EventStore>,
        executor: Arc<dyn TaskExecutor>,
        pipeline: Arc<dyn Pipeline>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            events,
            executor,
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Runs the fold → plan → act loop until the case parks or terminates.
    pub async fn drive(&self, case_id: &CaseId) -> Result<CaseStatus, EngineError> {
        loop {
            let log = self.events.scan(case_id, 1)?;
            let state = CaseState::fold(&log);
            match self.pipeline.plan(&state)? {
                NextAction::Schedule(requests) => {
                    // Skip anything that already settled in an earlier pass.
                    let runnable: Vec<TaskRequest> = requests
                        .into_iter()
                        .filter(|r| !state.task(&r.task_id).is_terminal())
                        .collect();
                    if runnable.is_empty() {
                        return Err(EngineError::Driver(format!(
                            "pipeline for case {case_id} scheduled only settled tasks"
                        )));
                    }
                    let runs = runnable
                        .iter()
                        .map(|request| self.run_task(case_id, &state, request));
                    for outcome in join_all(runs).await {
                        outcome?;
                    }
                }
                NextAction::Await { signal } => {
                    tracing::debug!(case_id, signal, "case parked awaiting signal");
                    return Ok(CaseStatus::AwaitingSignal { signal });
                }
                NextAction::Complete(result) => {
                    self.events
                        .append(case_id, &[Event::CaseCompleted { result }])?;
                    tracing::info!(case_id, "case completed");
                    return Ok(CaseStatus::Completed);
                }
                NextAction::Fail(error) => {
                    self.events.append(case_id, &[Event::CaseFailed { error }])?;
                    tracing::warn!(case_id, "case failed");
                    return Ok(CaseStatus::Failed);
                }
                NextAction::Idle => {
                    return Ok(if state.result.is_some() {
                        CaseStatus::Completed
                    } else if state.failure.is_some() {
                        CaseStatus::Failed
                    } else if state.aborted.is_some() {
                        CaseStatus::Aborted
                    } else {
                        CaseStatus::Idle
                    });
                }
            }
        }
    }

    /// Runs one task invocation to a terminal outcome (completed or
    /// exhausted), recording every attempt. Attempt numbering continues
    /// across restarts: prior failures are counted from the log.
    async fn run_task(
        &self,
        case_id: &CaseId,
        state: &CaseState,
        request: &TaskRequest,
    ) -> Result<(), EngineError> {
        let record = state.task(&request.task_id);
        if !record.scheduled {
            self.events.append(
                case_id,
                &[Event::TaskScheduled {
                    task_id: request.task_id.clone(),
                    task: request.task.clone(),
                    input: request.input.clone(),
                }],
            )?;
        }
        let mut attempt = record.failures + 1;
        loop {
            // The pool slot covers only the executor call; it is released
            // before any backoff sleep so a waiting case never blocks an
            // active one.
            let outcome = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| EngineError::Driver(format!("executor pool closed: {e}")))?;
                match tokio::time::timeout(
                    request.timeout,
                    self.executor.invoke(case_id, request),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TaskFailure::timeout(format!(
                        "task {} exceeded {:?}",
                        request.task, request.timeout
                    ))),
                }
            };
            match outcome {
                Ok(output) => {
                    self.events.append(
                        case_id,
                        &[Event::TaskCompleted {
                            task_id: request.task_id.clone(),
                            output,
                        }],
                    )?;
                    return Ok(());
                }
                Err(failure) => {
                    tracing::warn!(
                        case_id,
                        task = %request.task,
                        attempt,
                        error = %failure,
                        "task attempt failed"
                    );
                    self.events.append(
                        case_id,
                        &[Event::TaskFailed {
                            task_id: request.task_id.clone(),
                            error: failure.to_string(),
                            attempt,
                        }],
                    )?;
                    match next_action(&request.policy, attempt, failure.kind) {
                        RetryAction::Retry(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        RetryAction::GiveUp => {
                            self.events.append(
                                case_id,
                                &[Event::TaskExhausted {
                                    task_id: request.task_id.clone(),
                                    error: failure.to_string(),
                                }],
                            )?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Derived status of a case without driving it.
    pub fn status(&self, state: &CaseState) -> CaseStatus {
        if state.result.is_some() {
            return CaseStatus::Completed;
        }
        if state.failure.is_some() {
            return CaseStatus::Failed;
        }
        if state.aborted.is_some() {
            return CaseStatus::Aborted;
        }
        match self.pipeline.plan(state) {
            Ok(NextAction::Await { signal }) => CaseStatus::AwaitingSignal { signal },
            _ => CaseStatus::Idle,
        }
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::engine::event_store::InMemoryEventStore;
    use crate::engine::retry::RetryPolicy;
    use crate::engine::stubs::{FailNTimes, ScriptedTaskExecutor, SingleTaskPipeline};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
            max_attempts,
        )
    }

    fn driver_with(
        executor: Arc<dyn TaskExecutor>,
        policy: RetryPolicy,
    ) -> (CaseDriver, Arc<InMemoryEventStore>) {
        let events = Arc::new(InMemoryEventStore::new());
        let driver = CaseDriver::new(
            events.clone(),
            executor,
            Arc::new(SingleTaskPipeline::new(policy)),
            4,
        );
        (driver, events)
    }

    fn submit(events: &InMemoryEventStore, case_id: &CaseId) {
        events
            .append(
                case_id,
                &[Event::CaseSubmitted {
                    application: serde_json::json!({}),
                }],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn retries_then_completes_with_one_terminal_event() {
        let (driver, events) = driver_with(Arc::new(FailNTimes::new(2)), fast_policy(10));
        let case = "case-retry".to_string();
        submit(&events, &case);

        let status = driver.drive(&case).await.unwrap();
        assert_eq!(status, CaseStatus::Completed);

        let log = events.scan(&case, 1).unwrap();
        let failed: Vec<u32> = log
            .iter()
            .filter_map(|se| match &se.event {
                Event::TaskFailed { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![1, 2]);
        let scheduled = log
            .iter()
            .filter(|se| matches!(se.event, Event::TaskScheduled { .. }))
            .count();
        assert_eq!(scheduled, 1);
        let completed = log
            .iter()
            .filter(|se| matches!(se.event, Event::TaskCompleted { .. }))
            .count();
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_fails_the_case() {
        let (driver, events) = driver_with(Arc::new(FailNTimes::new(10)), fast_policy(2));
        let case = "case-exhaust".to_string();
        submit(&events, &case);

        let status = driver.drive(&case).await.unwrap();
        assert_eq!(status, CaseStatus::Failed);

        let log = events.scan(&case, 1).unwrap();
        assert!(log
            .iter()
            .any(|se| matches!(se.event, Event::TaskExhausted { .. })));
        assert!(log
            .iter()
            .any(|se| matches!(se.event, Event::CaseFailed { .. })));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let executor = Arc::new(ScriptedTaskExecutor::new());
        executor.push("work", Err(TaskFailure::permanent("bad input")));
        let (driver, events) = driver_with(executor.clone(), fast_policy(10));
        let case = "case-permanent".to_string();
        submit(&events, &case);

        let status = driver.drive(&case).await.unwrap();
        assert_eq!(status, CaseStatus::Failed);
        assert_eq!(executor.count("work"), 1);
    }

    #[tokio::test]
    async fn settled_task_is_not_rerun_on_redrive() {
        let executor = Arc::new(ScriptedTaskExecutor::new());
        let (driver, events) = driver_with(executor.clone(), fast_policy(10));
        let case = "case-recover".to_string();
        submit(&events, &case);
        // Simulate a prior process that completed the task, then crashed
        // before writing the terminal case event.
        events
            .append(
                &case,
                &[
                    Event::TaskScheduled {
                        task_id: "work".into(),
                        task: "work".into(),
                        input: Value::Null,
                    },
                    Event::TaskCompleted {
                        task_id: "work".into(),
                        output: serde_json::json!({"done": true}),
                    },
                ],
            )
            .unwrap();

        let status = driver.drive(&case).await.unwrap();
        assert_eq!(status, CaseStatus::Completed);
        assert!(executor.calls().is_empty());

        let state = CaseState::fold(&events.scan(&case, 1).unwrap());
        assert_eq!(state.result, Some(serde_json::json!({"done": true})));
    }

    #[tokio::test]
    async fn timed_out_attempt_is_recorded_and_retried() {
        /// Sleeps far past the request timeout on the first call, answers
        /// instantly afterwards.
        struct SlowFirstAttempt {
            calls: std::sync::Mutex<u32>,
        }

        #[async_trait::async_trait]
        impl TaskExecutor for SlowFirstAttempt {
            async fn invoke(
                &self,
                _case_id: &CaseId,
                _request: &TaskRequest,
            ) -> Result<Value, TaskFailure> {
                let call = {
                    let mut calls = self.calls.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                if call == 1 {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok(serde_json::json!("ok"))
            }
        }

        let events = Arc::new(InMemoryEventStore::new());
        let mut pipeline = SingleTaskPipeline::new(fast_policy(5));
        pipeline.timeout = Duration::from_millis(20);
        let driver = CaseDriver::new(
            events.clone(),
            Arc::new(SlowFirstAttempt {
                calls: std::sync::Mutex::new(0),
            }),
            Arc::new(pipeline),
            4,
        );
        let case = "case-timeout".to_string();
        submit(&events, &case);

        let status = driver.drive(&case).await.unwrap();
        assert_eq!(status, CaseStatus::Completed);

        let log = events.scan(&case, 1).unwrap();
        let timeouts: Vec<(u32, String)> = log
            .iter()
            .filter_map(|se| match &se.event {
                Event::TaskFailed { attempt, error, .. } => Some((*attempt, error.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].0, 1);
        assert!(timeouts[0].1.contains("Timeout"));
        assert!(log
            .iter()
            .any(|se| matches!(se.event, Event::TaskCompleted { .. })));
    }

    #[tokio::test]
    async fn backoff_sleep_yields_the_execution_slot() {
        /// One case's task keeps failing transiently; every other case
        /// succeeds immediately.
        struct FlakyByCase {
            failures: std::sync::Mutex<u32>,
        }

        #[async_trait::async_trait]
        impl TaskExecutor for FlakyByCase {
            async fn invoke(
                &self,
                case_id: &CaseId,
                _request: &TaskRequest,
            ) -> Result<Value, TaskFailure> {
                if case_id.as_str() == "case-flaky" {
                    let mut failures = self.failures.lock().unwrap();
                    if *failures < 3 {
                        *failures += 1;
                        return Err(TaskFailure::transient("still warming up"));
                    }
                }
                Ok(serde_json::json!("ok"))
            }
        }

        let events = Arc::new(InMemoryEventStore::new());
        let policy = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(100),
            1.0,
            10,
        );
        // A single execution slot shared by both cases.
        let driver = Arc::new(CaseDriver::new(
            events.clone(),
            Arc::new(FlakyByCase {
                failures: std::sync::Mutex::new(0),
            }),
            Arc::new(SingleTaskPipeline::new(policy)),
            1,
        ));
        let flaky = "case-flaky".to_string();
        let fast = "case-fast".to_string();
        submit(&events, &flaky);
        submit(&events, &fast);

        let flaky_drive = {
            let driver = driver.clone();
            let flaky = flaky.clone();
            tokio::spawn(async move { driver.drive(&flaky).await })
        };
        // Let the flaky case fail its first attempt and enter backoff.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let status = driver.drive(&fast).await.unwrap();
        assert_eq!(status, CaseStatus::Completed);
        assert!(
            started.elapsed() < Duration::from_millis(80),
            "fast case waited {:?} behind a case sleeping in backoff",
            started.elapsed()
        );

        assert_eq!(flaky_drive.await.unwrap().unwrap(), CaseStatus::Completed);
    }

    #[tokio::test]
    async fn driving_a_terminal_case_is_a_no_op() {
        let (driver, events) = driver_with(Arc::new(FailNTimes::new(0)), fast_policy(10));
        let case = "case-idle".to_string();
        submit(&events, &case);
        events
            .append(
                &case,
                &[Event::CaseAborted {
                    reason: "operator".into(),
                }],
            )
            .unwrap();

        let head = events.head(&case).unwrap();
        let status = driver.drive(&case).await.unwrap();
        assert_eq!(status, CaseStatus::Aborted);
        assert_eq!(events.head(&case).unwrap(), head);
    }
}
