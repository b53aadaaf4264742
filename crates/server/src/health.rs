use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use leadflow_core::config::AppConfig;
use leadflow_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    reasoning_service: String,
}

impl HealthState {
    pub fn new(db_pool: DbPool, config: &AppConfig) -> Self {
        Self {
            db_pool,
            reasoning_service: format!("{} {}", config.llm.provider.as_str(), config.llm.model),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    /// Configured provider and model; not probed, calls are made per lead.
    pub reasoning_service: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    if !ready {
        tracing::warn!(
            event_name = "system.health.degraded",
            correlation_id = "health",
            detail = %database.detail,
            "health check found the database unreachable"
        );
    }

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        reasoning_service: HealthCheck {
            status: "configured",
            detail: state.reasoning_service.clone(),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    let lead_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM lead").fetch_one(pool).await;
    match lead_count {
        Ok(count) => HealthCheck { status: "ready", detail: format!("{count} leads stored") },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
