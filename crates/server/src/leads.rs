//! Inbound lead submission.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use leadflow_agent::workflow::{WorkflowOrchestrator, WorkflowResult};
use leadflow_core::errors::InterfaceError;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone)]
pub struct LeadsState {
    orchestrator: Arc<WorkflowOrchestrator>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeadError {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

impl From<&InterfaceError> for LeadError {
    fn from(error: &InterfaceError) -> Self {
        Self {
            error: error.user_message().to_string(),
            detail: error.to_string(),
            correlation_id: error.correlation_id().to_string(),
        }
    }
}

pub fn router(orchestrator: Arc<WorkflowOrchestrator>) -> Router {
    Router::new().route("/leads", post(submit_lead)).with_state(LeadsState { orchestrator })
}

/// Runs the workflow for one lead. Error results come back as 422 with the
/// same body shape as completed ones.
async fn submit_lead(
    State(state): State<LeadsState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<WorkflowResult>), (StatusCode, Json<LeadError>)> {
    let Json(payload) = payload.map_err(|rejection| {
        let error = InterfaceError::InvalidLead {
            message: rejection.body_text(),
            correlation_id: Uuid::new_v4().to_string(),
        };
        tracing::warn!(
            event_name = "http.leads.rejected",
            correlation_id = %error.correlation_id(),
            error = %error,
            "lead submission body could not be parsed"
        );
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
        (status, Json(LeadError::from(&error)))
    })?;

    let result = state.orchestrator.process_lead_workflow(payload).await;
    let status =
        if result.is_completed() { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };
    Ok((status, Json(result)))
}
