//! The fixed underwriting pipeline: Acquire -> Evaluate -> Decide -> Await.
//!
//! `plan` is pure: it looks only at derived state, so replaying a recovered
//! case walks the same branches. The credit-provider fallback is an explicit
//! branch here, not error handling in the executor: the primary provider gets
//! a fast-fail retry budget, and only its exhaustion unlocks the secondary.

use std::time::Duration;

use serde_json::{json, Value};

use crate::engine::event::EngineError;
use crate::engine::plan::{NextAction, Pipeline};
use crate::engine::retry::RetryPolicy;
use crate::engine::state::{CaseState, Phase};
use crate::engine::task::TaskRequest;

pub const TASK_BANK: &str = "fetch_bank_account";
pub const TASK_DOCUMENTS: &str = "fetch_documents";
pub const TASK_CREDIT_PRIMARY: &str = "fetch_credit_report_cibil";
pub const TASK_CREDIT_FALLBACK: &str = "fetch_credit_report_experian";
pub const TASK_INCOME: &str = "income_assessment";
pub const TASK_EXPENSE: &str = "expense_assessment";
pub const TASK_CREDIT_ASSESSMENT: &str = "credit_assessment";
pub const TASK_DECIDE: &str = "aggregate_and_decide";

/// The human-review signal every case waits for after `aggregate_and_decide`.
pub const SIGNAL_DECISION: &str = "decision";

pub struct UnderwritingPipeline {
    default_policy: RetryPolicy,
    primary_credit_policy: RetryPolicy,
    acquire_timeout: Duration,
    assess_timeout: Duration,
    decide_timeout: Duration,
}

impl UnderwritingPipeline {
    pub fn new() -> Self {
        Self {
            default_policy: RetryPolicy::standard(),
            primary_credit_policy: RetryPolicy::fast_fail(2),
            acquire_timeout: Duration::from_secs(60),
            assess_timeout: Duration::from_secs(90),
            decide_timeout: Duration::from_secs(1200),
        }
    }

    /// Same stage graph with tighter budgets, for tests that exercise real
    /// retries without real backoff.
    pub fn with_budgets(
        default_policy: RetryPolicy,
        primary_credit_policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            default_policy,
            primary_credit_policy,
            acquire_timeout: timeout,
            assess_timeout: timeout,
            decide_timeout: timeout,
        }
    }

    fn credit_report<'a>(&self, state: &'a CaseState) -> Option<&'a Value> {
        state
            .output(TASK_CREDIT_PRIMARY)
            .or_else(|| state.output(TASK_CREDIT_FALLBACK))
    }

    fn acquisition_done(&self, state: &CaseState) -> bool {
        state.output(TASK_BANK).is_some()
            && state.output(TASK_DOCUMENTS).is_some()
            && self.credit_report(state).is_some()
    }

    fn evaluation_done(&self, state: &CaseState) -> bool {
        state.output(TASK_INCOME).is_some()
            && state.output(TASK_EXPENSE).is_some()
            && state.output(TASK_CREDIT_ASSESSMENT).is_some()
    }

    fn plan_acquisition(
        &self,
        state: &CaseState,
        application: &Value,
    ) -> Result<NextAction, EngineError> {
        if let Some(error) = state.exhausted(TASK_BANK) {
            return Ok(NextAction::Fail(format!(
                "bank account acquisition exhausted: {error}"
            )));
        }
        if let Some(error) = state.exhausted(TASK_DOCUMENTS) {
            return Ok(NextAction::Fail(format!(
                "document acquisition exhausted: {error}"
            )));
        }
        if state.exhausted(TASK_CREDIT_PRIMARY).is_some() {
            if let Some(error) = state.exhausted(TASK_CREDIT_FALLBACK) {
                return Ok(NextAction::Fail(format!(
                    "credit report unavailable from both providers: {error}"
                )));
            }
        }

        let subject = json!({
            "applicant_id": application.get("applicant_id").cloned().unwrap_or(Value::Null)
        });
        let mut batch = Vec::new();
        if !state.task(TASK_BANK).is_terminal() {
            batch.push(TaskRequest::named(
                TASK_BANK,
                subject.clone(),
                self.acquire_timeout,
                self.default_policy.clone(),
            ));
        }
        if !state.task(TASK_DOCUMENTS).is_terminal() {
            batch.push(TaskRequest::named(
                TASK_DOCUMENTS,
                subject.clone(),
                self.acquire_timeout,
                self.default_policy.clone(),
            ));
        }
        if !state.task(TASK_CREDIT_PRIMARY).is_terminal() {
            batch.push(TaskRequest::named(
                TASK_CREDIT_PRIMARY,
                subject.clone(),
                self.acquire_timeout,
                self.primary_credit_policy.clone(),
            ));
        } else if self.credit_report(state).is_none()
            && !state.task(TASK_CREDIT_FALLBACK).is_terminal()
        {
            // Fallback branch: primary exhausted, secondary untried.
            batch.push(TaskRequest::named(
                TASK_CREDIT_FALLBACK,
                subject,
                self.acquire_timeout,
                self.default_policy.clone(),
            ));
        }
        if batch.is_empty() {
            return Err(EngineError::Pipeline(
                "acquisition stalled with nothing schedulable".into(),
            ));
        }
        Ok(NextAction::Schedule(batch))
    }

    fn plan_evaluation(
        &self,
        state: &CaseState,
        application: &Value,
    ) -> Result<NextAction, EngineError> {
        for task in [TASK_INCOME, TASK_EXPENSE, TASK_CREDIT_ASSESSMENT] {
            if let Some(error) = state.exhausted(task) {
                return Ok(NextAction::Fail(format!("{task} exhausted: {error}")));
            }
        }

        let bank = state.output(TASK_BANK).cloned().unwrap_or(Value::Null);
        let credit = self.credit_report(state).cloned().unwrap_or(Value::Null);
        let mut batch = Vec::new();
        if !state.task(TASK_INCOME).is_terminal() {
            batch.push(TaskRequest::named(
                TASK_INCOME,
                json!({"application": application, "bank": bank, "credit_report": credit}),
                self.assess_timeout,
                self.default_policy.clone(),
            ));
        }
        if !state.task(TASK_EXPENSE).is_terminal() {
            batch.push(TaskRequest::named(
                TASK_EXPENSE,
                json!({"application": application, "bank": bank}),
                self.assess_timeout,
                self.default_policy.clone(),
            ));
        }
        if !state.task(TASK_CREDIT_ASSESSMENT).is_terminal() {
            batch.push(TaskRequest::named(
                TASK_CREDIT_ASSESSMENT,
                json!({"application": application, "credit_report": credit}),
                self.assess_timeout,
                self.default_policy.clone(),
            ));
        }
        if batch.is_empty() {
            return Err(EngineError::Pipeline(
                "evaluation stalled with nothing schedulable".into(),
            ));
        }
        Ok(NextAction::Schedule(batch))
    }

    fn plan_decision(
        &self,
        state: &CaseState,
        application: &Value,
    ) -> Result<NextAction, EngineError> {
        if let Some(error) = state.exhausted(TASK_DECIDE) {
            return Ok(NextAction::Fail(format!(
                "decision aggregation exhausted: {error}"
            )));
        }
        let input = json!({
            "application": application,
            "bank": state.output(TASK_BANK).cloned().unwrap_or(Value::Null),
            "documents": state.output(TASK_DOCUMENTS).cloned().unwrap_or(Value::Null),
            "credit_report": self.credit_report(state).cloned().unwrap_or(Value::Null),
            "assessments": {
                "income": state.output(TASK_INCOME).cloned().unwrap_or(Value::Null),
                "expense": state.output(TASK_EXPENSE).cloned().unwrap_or(Value::Null),
                "credit": state.output(TASK_CREDIT_ASSESSMENT).cloned().unwrap_or(Value::Null),
            },
        });
        Ok(NextAction::Schedule(vec![TaskRequest::named(
            TASK_DECIDE,
            input,
            self.decide_timeout,
            self.default_policy.clone(),
        )]))
    }
}

impl Default for UnderwritingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline for UnderwritingPipeline {
    fn plan(&self, state: &CaseState) -> Result<NextAction, EngineError> {
        if state.is_terminal() {
            return Ok(NextAction::Idle);
        }
        let application = state
            .application
            .clone()
            .ok_or_else(|| EngineError::Pipeline("case has no application".into()))?;

        if !self.acquisition_done(state) {
            return self.plan_acquisition(state, &application);
        }
        if !self.evaluation_done(state) {
            return self.plan_evaluation(state, &application);
        }
        if state.output(TASK_DECIDE).is_none() {
            return self.plan_decision(state, &application);
        }
        match state.signal(SIGNAL_DECISION) {
            None => Ok(NextAction::Await {
                signal: SIGNAL_DECISION.to_string(),
            }),
            Some(payload) => {
                let mut result = self
                    .summary(state)
                    .unwrap_or_else(|| json!({"application": application}));
                if let Some(map) = result.as_object_mut() {
                    map.insert("human_decision".to_string(), payload.clone());
                }
                Ok(NextAction::Complete(result))
            }
        }
    }

    fn phase(&self, state: &CaseState) -> Phase {
        if state.result.is_some() {
            Phase::Completed
        } else if state.failure.is_some() {
            Phase::Failed
        } else if state.aborted.is_some() {
            Phase::Aborted
        } else if state.output(TASK_DECIDE).is_some() {
            Phase::AwaitingSignal
        } else if self.evaluation_done(state) {
            Phase::Deciding
        } else if self.acquisition_done(state) {
            Phase::Evaluating
        } else {
            Phase::Acquiring
        }
    }

    /// Available once `aggregate_and_decide` has run; `None` before that.
    fn summary(&self, state: &CaseState) -> Option<Value> {
        let suggested = state.output(TASK_DECIDE)?;
        Some(json!({
            "application": state.application.clone().unwrap_or(Value::Null),
            "bank": state.output(TASK_BANK).cloned().unwrap_or(Value::Null),
            "documents": state.output(TASK_DOCUMENTS).cloned().unwrap_or(Value::Null),
            "credit_report": self.credit_report(state).cloned().unwrap_or(Value::Null),
            "assessments": {
                "income": state.output(TASK_INCOME).cloned().unwrap_or(Value::Null),
                "expense": state.output(TASK_EXPENSE).cloned().unwrap_or(Value::Null),
                "credit": state.output(TASK_CREDIT_ASSESSMENT).cloned().unwrap_or(Value::Null),
            },
            "suggested_decision": suggested,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::event::Event;

    fn state_from(events: Vec<Event>) -> CaseState {
        let mut state = CaseState::default();
        for event in &events {
            state.apply(event);
        }
        state
    }

    fn submitted() -> Event {
        Event::CaseSubmitted {
            application: json!({"applicant_id": "A1", "amount": 5000.0}),
        }
    }

    fn completed(task: &str, output: Value) -> Event {
        Event::TaskCompleted {
            task_id: task.into(),
            output,
        }
    }

    fn exhausted(task: &str) -> Event {
        Event::TaskExhausted {
            task_id: task.into(),
            error: "provider down".into(),
        }
    }

    fn acquired() -> Vec<Event> {
        vec![
            submitted(),
            completed(TASK_BANK, json!({"accounts": []})),
            completed(TASK_DOCUMENTS, json!({"documents": []})),
            completed(TASK_CREDIT_PRIMARY, json!({"score": 720})),
        ]
    }

    fn evaluated() -> Vec<Event> {
        let mut events = acquired();
        events.push(completed(TASK_INCOME, json!({"income_ok": true})));
        events.push(completed(TASK_EXPENSE, json!({"affordability_ok": true})));
        events.push(completed(TASK_CREDIT_ASSESSMENT, json!({"credit_ok": true})));
        events
    }

    #[test]
    fn fresh_case_schedules_the_acquisition_batch() {
        let pipeline = UnderwritingPipeline::new();
        let state = state_from(vec![submitted()]);
        match pipeline.plan(&state).unwrap() {
            NextAction::Schedule(batch) => {
                let names: Vec<&str> = batch.iter().map(|r| r.task.as_str()).collect();
                assert_eq!(names, vec![TASK_BANK, TASK_DOCUMENTS, TASK_CREDIT_PRIMARY]);
                // Only the primary credit provider fast-fails.
                assert_eq!(batch[2].policy.max_attempts, 2);
                assert_eq!(batch[0].policy.max_attempts, 10);
            }
            other => panic!("expected Schedule, got {other:?}"),
        }
        assert_eq!(pipeline.phase(&state), Phase::Acquiring);
    }

    #[test]
    fn primary_credit_exhaustion_unlocks_the_fallback() {
        let pipeline = UnderwritingPipeline::new();
        let state = state_from(vec![
            submitted(),
            completed(TASK_BANK, json!({})),
            completed(TASK_DOCUMENTS, json!({})),
            exhausted(TASK_CREDIT_PRIMARY),
        ]);
        match pipeline.plan(&state).unwrap() {
            NextAction::Schedule(batch) => {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].task, TASK_CREDIT_FALLBACK);
                assert_eq!(batch[0].policy.max_attempts, 10);
            }
            other => panic!("expected Schedule, got {other:?}"),
        }
    }

    #[test]
    fn both_providers_exhausted_fails_the_case() {
        let pipeline = UnderwritingPipeline::new();
        let state = state_from(vec![
            submitted(),
            completed(TASK_BANK, json!({})),
            completed(TASK_DOCUMENTS, json!({})),
            exhausted(TASK_CREDIT_PRIMARY),
            exhausted(TASK_CREDIT_FALLBACK),
        ]);
        assert!(matches!(
            pipeline.plan(&state).unwrap(),
            NextAction::Fail(reason) if reason.contains("both providers")
        ));
    }

    #[test]
    fn evaluation_batch_carries_acquired_outputs() {
        let pipeline = UnderwritingPipeline::new();
        let state = state_from(acquired());
        assert_eq!(pipeline.phase(&state), Phase::Evaluating);
        match pipeline.plan(&state).unwrap() {
            NextAction::Schedule(batch) => {
                assert_eq!(batch.len(), 3);
                let income = batch.iter().find(|r| r.task == TASK_INCOME).unwrap();
                assert_eq!(income.input["credit_report"]["score"], 720);
                assert_eq!(income.input["application"]["applicant_id"], "A1");
            }
            other => panic!("expected Schedule, got {other:?}"),
        }
    }

    #[test]
    fn one_exhausted_assessment_fails_without_partial_results() {
        let pipeline = UnderwritingPipeline::new();
        let mut events = acquired();
        events.push(completed(TASK_INCOME, json!({"income_ok": true})));
        events.push(exhausted(TASK_EXPENSE));
        let state = state_from(events);
        assert!(matches!(
            pipeline.plan(&state).unwrap(),
            NextAction::Fail(reason) if reason.contains(TASK_EXPENSE)
        ));
    }

    #[test]
    fn decision_stage_aggregates_everything() {
        let pipeline = UnderwritingPipeline::new();
        let state = state_from(evaluated());
        assert_eq!(pipeline.phase(&state), Phase::Deciding);
        match pipeline.plan(&state).unwrap() {
            NextAction::Schedule(batch) => {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].task, TASK_DECIDE);
                assert_eq!(batch[0].input["assessments"]["income"]["income_ok"], true);
                assert_eq!(batch[0].timeout, Duration::from_secs(1200));
            }
            other => panic!("expected Schedule, got {other:?}"),
        }
    }

    #[test]
    fn parks_for_the_decision_signal_then_completes() {
        let pipeline = UnderwritingPipeline::new();
        let mut events = evaluated();
        events.push(completed(
            TASK_DECIDE,
            json!({"recommendation": "approve"}),
        ));
        let parked = state_from(events.clone());
        assert_eq!(pipeline.phase(&parked), Phase::AwaitingSignal);
        assert!(matches!(
            pipeline.plan(&parked).unwrap(),
            NextAction::Await { signal } if signal == SIGNAL_DECISION
        ));
        assert!(pipeline.summary(&parked).is_some());

        events.push(Event::SignalReceived {
            name: SIGNAL_DECISION.into(),
            payload: json!({"action": "approve", "note": "ok"}),
        });
        let signalled = state_from(events);
        match pipeline.plan(&signalled).unwrap() {
            NextAction::Complete(result) => {
                assert_eq!(result["human_decision"]["action"], "approve");
                assert_eq!(result["suggested_decision"]["recommendation"], "approve");
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn summary_is_none_before_the_decision_task() {
        let pipeline = UnderwritingPipeline::new();
        assert!(pipeline.summary(&state_from(acquired())).is_none());
    }

    #[test]
    fn terminal_states_plan_idle() {
        let pipeline = UnderwritingPipeline::new();
        let mut events = acquired();
        events.push(Event::CaseAborted {
            reason: "operator".into(),
        });
        let state = state_from(events);
        assert!(matches!(pipeline.plan(&state).unwrap(), NextAction::Idle));
        assert_eq!(pipeline.phase(&state), Phase::Aborted);
    }
}
