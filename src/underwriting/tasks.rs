//! Deterministic stand-ins for the external underwriting collaborators.
//!
//! Real deployments put bank APIs, bureau calls and an assessment service
//! behind `TaskExecutor`; this executor implements the same contracts with
//! fixed data and simple scoring heuristics so the pipeline runs
//! hermetically. Failures are scriptable per task, which is how the tests
//! exercise retry, fallback and exhaustion paths.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::identity::CaseId;
use crate::engine::task::{TaskExecutor, TaskFailure, TaskRequest};
use crate::underwriting::pipeline::{
    TASK_BANK, TASK_CREDIT_ASSESSMENT, TASK_CREDIT_FALLBACK, TASK_CREDIT_PRIMARY, TASK_DECIDE,
    TASK_DOCUMENTS, TASK_EXPENSE, TASK_INCOME,
};

const MIN_CREDIT_SCORE: f64 = 300.0;
const MAX_CREDIT_SCORE: f64 = 850.0;

pub struct HeuristicTaskExecutor {
    credit_score: f64,
    /// Failures consumed one per invocation, before the real behavior runs.
    induced: Mutex<HashMap<String, VecDeque<TaskFailure>>>,
    /// Tasks that fail on every invocation.
    broken: Mutex<HashMap<String, TaskFailure>>,
}

impl HeuristicTaskExecutor {
    pub fn new() -> Self {
        Self {
            credit_score: 720.0,
            induced: Mutex::new(HashMap::new()),
            broken: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_credit_score(mut self, score: f64) -> Self {
        self.credit_score = score;
        self
    }

    /// Queues one failure for the next invocation of `task`.
    pub fn fail_next(&self, task: &str, failure: TaskFailure) {
        self.induced
            .lock()
            .expect("induced lock")
            .entry(task.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Makes every invocation of `task` fail.
    pub fn break_task(&self, task: &str, failure: TaskFailure) {
        self.broken
            .lock()
            .expect("broken lock")
            .insert(task.to_string(), failure);
    }

    fn scripted_failure(&self, task: &str) -> Option<TaskFailure> {
        if let Some(failure) = self.broken.lock().expect("broken lock").get(task) {
            return Some(failure.clone());
        }
        self.induced
            .lock()
            .expect("induced lock")
            .get_mut(task)
            .and_then(|q| q.pop_front())
    }

    fn credit_report(&self, provider: &str) -> Result<Value, TaskFailure> {
        if !(MIN_CREDIT_SCORE..=MAX_CREDIT_SCORE).contains(&self.credit_score) {
            return Err(TaskFailure::permanent(format!(
                "credit score {} outside valid range {}..={}",
                self.credit_score, MIN_CREDIT_SCORE, MAX_CREDIT_SCORE
            )));
        }
        Ok(json!({
            "score": self.credit_score,
            "provider": provider,
            "data_quality": "validated",
        }))
    }
}

impl Default for HeuristicTaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn number(value: &Value, pointer: &str) -> Option<f64> {
    value.pointer(pointer).and_then(Value::as_f64)
}

fn required_number(value: &Value, pointer: &str) -> Result<f64, TaskFailure> {
    number(value, pointer)
        .ok_or_else(|| TaskFailure::permanent(format!("missing numeric field {pointer}")))
}

fn assess_income(input: &Value) -> Result<Value, TaskFailure> {
    let amount = required_number(input, "/application/amount")?;
    if amount <= 0.0 {
        return Err(TaskFailure::permanent("loan amount must be positive"));
    }
    let income = number(input, "/application/income").unwrap_or(5000.0);
    let balance = number(input, "/bank/accounts/0/balance").unwrap_or(0.0);
    let ratio = income / amount;
    Ok(json!({
        "income_ok": ratio > 2.0 || balance > 5000.0,
        "monthly_income": income,
        "income_to_amount_ratio": ratio,
        "balance": balance,
    }))
}

fn assess_expenses(input: &Value) -> Result<Value, TaskFailure> {
    let amount = required_number(input, "/application/amount")?;
    let income = number(input, "/application/income").unwrap_or(5000.0);
    let expenses = number(input, "/application/expenses").unwrap_or(1000.0);
    let disposable = income - expenses;
    Ok(json!({
        "affordability_ok": disposable > amount / 12.0,
        "disposable_income": disposable,
        "monthly_installment": amount / 12.0,
    }))
}

fn assess_credit(input: &Value) -> Result<Value, TaskFailure> {
    let score = required_number(input, "/credit_report/score")?;
    Ok(json!({
        "credit_ok": score > 620.0,
        "score": score,
    }))
}

fn decide(input: &Value) -> Result<Value, TaskFailure> {
    let score = required_number(input, "/credit_report/score")?;
    let income_ok = input
        .pointer("/assessments/income/income_ok")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let affordability_ok = input
        .pointer("/assessments/expense/affordability_ok")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let credit_ok = input
        .pointer("/assessments/credit/credit_ok")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let recommendation = if score > 650.0 && income_ok && affordability_ok && credit_ok {
        "approve"
    } else {
        "manual_review"
    };
    Ok(json!({
        "recommendation": recommendation,
        "credit_score": score,
        "checks": {
            "income_ok": income_ok,
            "affordability_ok": affordability_ok,
            "credit_ok": credit_ok,
        },
    }))
}

#[async_trait]
impl TaskExecutor for HeuristicTaskExecutor {
    async fn invoke(&self, _case_id: &CaseId, request: &TaskRequest) -> Result<Value, TaskFailure> {
        if let Some(failure) = self.scripted_failure(&request.task) {
            return Err(failure);
        }
        match request.task.as_str() {
            TASK_BANK => Ok(json!({
                "accounts": [{"account_id": "acc-1", "balance": 5200.0}],
            })),
            TASK_DOCUMENTS => Ok(json!({
                "documents": [
                    {"type": "id", "status": "verified"},
                    {"type": "payslip", "status": "verified"},
                ],
            })),
            TASK_CREDIT_PRIMARY => self.credit_report("cibil"),
            TASK_CREDIT_FALLBACK => self.credit_report("experian"),
            TASK_INCOME => assess_income(&request.input),
            TASK_EXPENSE => assess_expenses(&request.input),
            TASK_CREDIT_ASSESSMENT => assess_credit(&request.input),
            TASK_DECIDE => decide(&request.input),
            other => Err(TaskFailure::permanent(format!("unknown task: {other}"))),
        }
    }
}
