// src/handlers/health.rs

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;
use sqlx::PgPool;

/// Liveness probe. Always 200; reports whether the database answers.
pub async fn health(State(pool): State<PgPool>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => "up",
        Err(e) => {
            tracing::warn!("Health check could not reach the database: {}", e);
            "down"
        }
    };

    Json(json!({
        "success": true,
        "status": "ok",
        "database": database,
    }))
}
