use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use prsync_db::{queue::state_counts, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub queued: i64,
    pub processing: i64,
    pub failed: i64,
    pub abandoned: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    /// Absent when the queue table could not be read.
    pub queue: Option<QueueDepth>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let queue = if ready { queue_depth(&state.db_pool).await } else { None };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "prsync-server accepting webhooks".to_string(),
        },
        database,
        queue,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn queue_depth(pool: &DbPool) -> Option<QueueDepth> {
    let counts = state_counts(pool).await.ok()?;
    let count = |state: &str| counts.get(state).copied().unwrap_or(0);
    Some(QueueDepth {
        queued: count("queued"),
        processing: count("processing"),
        failed: count("failed"),
        abandoned: count("abandoned"),
    })
}
