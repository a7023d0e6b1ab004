use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::telegram::TelegramRequest;
use super::users::UserRequest;
use super::ServiceError;
use crate::settings::Settings;

mod admin;
mod users;

#[derive(Clone)]
struct AppState {
    user_channel: mpsc::Sender<UserRequest>,
    telegram_channel: mpsc::Sender<TelegramRequest>,
    settings: Arc<Settings>,
}

type ApiResponse = (StatusCode, Json<Value>);

fn internal_error(details: String) -> ApiResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Internal server error",
            "details": details
        })),
    )
}

/// Sends a request to a service and waits for its answer.
async fn ask<R, T>(
    channel: &mpsc::Sender<R>,
    build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ApiResponse> {
    let (tx, rx) = oneshot::channel();

    channel
        .send(build(tx))
        .await
        .map_err(|e| internal_error(format!("Failed to process request: {}", e)))?;

    match rx.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(service_error)) => Err(internal_error(service_error.to_string())),
        Err(e) => Err(internal_error(format!("Failed to receive response: {}", e))),
    }
}

pub async fn start_http_server(
    settings: &Settings,
    user_channel: mpsc::Sender<UserRequest>,
    telegram_channel: mpsc::Sender<TelegramRequest>,
) -> Result<(), anyhow::Error> {
    let app_state = AppState {
        user_channel,
        telegram_channel,
        settings: Arc::new(settings.clone()),
    };

    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&settings.http.listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/start", post(users::start))
        .route("/join-requests", post(users::join_request))
        .route("/users/{id}", get(users::get_user_status))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/sweep", post(admin::sweep))
        .route("/admin/restore", post(admin::restore))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}
