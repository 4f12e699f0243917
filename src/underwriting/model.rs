//! Loan underwriting payloads.

use serde::{Deserialize, Serialize};

fn default_income() -> f64 {
    5000.0
}

fn default_expenses() -> f64 {
    1000.0
}

/// The application that opens a case. `income`/`expenses` fall back to
/// conservative defaults when the applicant omits them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoanApplication {
    pub applicant_id: String,
    #[serde(default)]
    pub name: String,
    pub amount: f64,
    #[serde(default = "default_income")]
    pub income: f64,
    #[serde(default = "default_expenses")]
    pub expenses: f64,
}

/// Human reviewer's verdict, delivered as the `decision` signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewDecision {
    /// `approve` or `reject`; recorded verbatim in the final result.
    pub action: String,
    #[serde(default)]
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_financials_use_defaults() {
        let app: LoanApplication =
            serde_json::from_value(serde_json::json!({"applicant_id": "A1", "amount": 5000.0}))
                .unwrap();
        assert_eq!(app.income, 5000.0);
        assert_eq!(app.expenses, 1000.0);
        assert_eq!(app.name, "");
    }

    #[test]
    fn review_note_is_optional() {
        let decision: ReviewDecision =
            serde_json::from_value(serde_json::json!({"action": "approve"})).unwrap();
        assert_eq!(decision.action, "approve");
        assert_eq!(decision.note, "");
    }
}
