use axum::Json;
use axum::extract::State;
use serde::Serialize;

use tutorgate_provider_core::PoolSnapshot;

use crate::chat::ChatState;

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub pool: Option<PoolSnapshot>,
}

/// Liveness plus the rotation state. Key material is never included.
pub(crate) async fn health(State(state): State<ChatState>) -> Json<HealthBody> {
    let body = match state.dispatcher.pool() {
        Some(pool) => HealthBody {
            status: "ok",
            pool: Some(pool.snapshot()),
        },
        None => HealthBody {
            status: "unconfigured",
            pool: None,
        },
    };
    Json(body)
}
