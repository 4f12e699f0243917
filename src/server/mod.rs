//! Axum HTTP surface over the case gateway.

pub mod errors;
pub mod models;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::middleware::{from_fn, Next};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::engine::gateway::{CaseGateway, GatewayError, StatusView};
use crate::engine::identity::CaseId;
use crate::engine::timeline::CaseTimeline;
use crate::underwriting::model::{LoanApplication, ReviewDecision};
use crate::underwriting::pipeline::SIGNAL_DECISION;

use errors::ApiError;
use models::{
    AbortCaseRequest, ApiEnvelope, ApiMeta, CaseListItem, ListCasesResponse, SubmitCaseResponse,
};

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<CaseGateway>,
}

impl ApiState {
    pub fn new(gateway: Arc<CaseGateway>) -> Self {
        Self { gateway }
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/cases", get(list_cases).post(submit_case))
        .route("/v1/cases/:case_id", get(case_status))
        .route("/v1/cases/:case_id/summary", get(case_summary))
        .route("/v1/cases/:case_id/final", get(case_final))
        .route("/v1/cases/:case_id/timeline", get(case_timeline))
        .route("/v1/cases/:case_id/review", post(review_case))
        .route("/v1/cases/:case_id/abort", post(abort_case))
        .layer(from_fn(request_log_middleware))
        .with_state(state)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

async fn request_log_middleware(
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let rid = request_id(&headers);
    tracing::info!(
        request_id = %rid,
        method = %request.method(),
        path = %request.uri().path(),
        "case_api_request"
    );
    next.run(request).await
}

fn envelope<T>(rid: String, data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope {
        meta: ApiMeta::ok(),
        request_id: rid,
        data,
    })
}

async fn submit_case(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(application): Json<LoanApplication>,
) -> Result<Json<ApiEnvelope<SubmitCaseResponse>>, ApiError> {
    let rid = request_id(&headers);
    if application.applicant_id.trim().is_empty() {
        return Err(ApiError::bad_request("applicant_id must not be empty").with_request_id(rid));
    }
    if application.amount <= 0.0 {
        return Err(ApiError::bad_request("amount must be positive").with_request_id(rid));
    }
    let payload = serde_json::to_value(&application)
        .map_err(|e| ApiError::internal(format!("serialize application: {e}")))?;
    let case_id = state
        .gateway
        .submit(payload)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, SubmitCaseResponse { case_id }))
}

async fn list_cases(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<ListCasesResponse>>, ApiError> {
    let rid = request_id(&headers);
    let mut cases = Vec::new();
    for case_id in state
        .gateway
        .cases()
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?
    {
        let status = state
            .gateway
            .status(&case_id)
            .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
        cases.push(CaseListItem {
            case_id,
            phase: status.phase,
        });
    }
    Ok(envelope(rid, ListCasesResponse { cases }))
}

async fn case_status(
    State(state): State<ApiState>,
    Path(case_id): Path<CaseId>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<StatusView>>, ApiError> {
    let rid = request_id(&headers);
    let status = state
        .gateway
        .status(&case_id)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, status))
}

async fn case_summary(
    State(state): State<ApiState>,
    Path(case_id): Path<CaseId>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<Value>>, ApiError> {
    let rid = request_id(&headers);
    match state.gateway.query(&case_id, "summary") {
        Ok(summary) => Ok(envelope(rid, summary)),
        Err(GatewayError::NotReady) => Ok(envelope(rid, json!({"status": "pending"}))),
        Err(e) => Err(ApiError::from(e).with_request_id(rid)),
    }
}

async fn case_final(
    State(state): State<ApiState>,
    Path(case_id): Path<CaseId>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<Value>>, ApiError> {
    let rid = request_id(&headers);
    match state.gateway.query(&case_id, "final_result") {
        Ok(result) => Ok(envelope(rid, result)),
        Err(GatewayError::NotReady) => Ok(envelope(rid, json!({"status": "not_ready"}))),
        Err(e) => Err(ApiError::from(e).with_request_id(rid)),
    }
}

async fn case_timeline(
    State(state): State<ApiState>,
    Path(case_id): Path<CaseId>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<CaseTimeline>>, ApiError> {
    let rid = request_id(&headers);
    let timeline = state
        .gateway
        .timeline(&case_id)
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, timeline))
}

async fn review_case(
    State(state): State<ApiState>,
    Path(case_id): Path<CaseId>,
    headers: HeaderMap,
    Json(decision): Json<ReviewDecision>,
) -> Result<Json<ApiEnvelope<StatusView>>, ApiError> {
    let rid = request_id(&headers);
    if decision.action.trim().is_empty() {
        return Err(ApiError::bad_request("action must not be empty").with_request_id(rid));
    }
    let payload = serde_json::to_value(&decision)
        .map_err(|e| ApiError::internal(format!("serialize decision: {e}")))?;
    let status = state
        .gateway
        .signal(&case_id, SIGNAL_DECISION, payload)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, status))
}

async fn abort_case(
    State(state): State<ApiState>,
    Path(case_id): Path<CaseId>,
    headers: HeaderMap,
    Json(request): Json<AbortCaseRequest>,
) -> Result<Json<ApiEnvelope<StatusView>>, ApiError> {
    let rid = request_id(&headers);
    let reason = request.reason.unwrap_or_else(|| "operator request".to_string());
    let status = state
        .gateway
        .abort(&case_id, &reason)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(rid.clone()))?;
    Ok(envelope(rid, status))
}
