//! API DTOs for the case server.

use serde::{Deserialize, Serialize};

use crate::engine::identity::CaseId;
use crate::engine::state::Phase;

#[derive(Clone, Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub meta: ApiMeta,
    pub request_id: String,
    pub data: T,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiMeta {
    pub status: &'static str,
    pub api_version: &'static str,
}

impl ApiMeta {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            api_version: "v1",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitCaseResponse {
    pub case_id: CaseId,
}

#[derive(Clone, Debug, Serialize)]
pub struct CaseListItem {
    pub case_id: CaseId,
    pub phase: Phase,
}

#[derive(Clone, Debug, Serialize)]
pub struct ListCasesResponse {
    pub cases: Vec<CaseListItem>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AbortCaseRequest {
    pub reason: Option<String>,
}
