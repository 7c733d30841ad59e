use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use capflow_db::DbPool;
use chrono::Utc;
use serde::Serialize;

const WORKFLOW_TABLES: [&str; 3] = ["document", "approval_step", "notification"];

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
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub schema: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let schema = if database.status == "ready" {
        schema_check(&state.db_pool).await
    } else {
        HealthCheck { status: "degraded", detail: "database unavailable".to_string() }
    };
    let ready = database.status == "ready" && schema.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "capflow-server runtime initialized".to_string(),
        },
        database,
        schema,
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

async fn schema_check(pool: &DbPool) -> HealthCheck {
    let present = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?, ?, ?)",
    )
    .bind(WORKFLOW_TABLES[0])
    .bind(WORKFLOW_TABLES[1])
    .bind(WORKFLOW_TABLES[2])
    .fetch_one(pool)
    .await;

    match present {
        Ok(count) if count == WORKFLOW_TABLES.len() as i64 => {
            HealthCheck { status: "ready", detail: "workflow tables present".to_string() }
        }
        Ok(count) => HealthCheck {
            status: "degraded",
            detail: format!(
                "{count} of {} workflow tables present; run `capflow migrate`",
                WORKFLOW_TABLES.len()
            ),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("schema query failed: {error}") }
        }
    }
}
