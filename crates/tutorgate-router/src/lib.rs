use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use tutorgate_core::RequestDispatcher;

mod chat;
mod health;

pub use chat::ChatState;
pub use health::HealthBody;

pub fn app_router(dispatcher: Arc<RequestDispatcher>, max_upload_bytes: usize) -> Router {
    let state = ChatState { dispatcher };

    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/health", get(health::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
