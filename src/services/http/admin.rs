use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{ask, ApiResponse, AppState};
use crate::services::users::UserRequest;

#[derive(Deserialize)]
pub struct AdminQuery {
    admin_id: String,
}

fn authorize(state: &AppState, query: &AdminQuery) -> Result<(), ApiResponse> {
    if query.admin_id == state.settings.admin.user_id {
        return Ok(());
    }

    log::warn!("Rejected admin call from {}.", query.admin_id);
    Err((
        StatusCode::FORBIDDEN,
        Json(json!({"error": "Admin only."})),
    ))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> impl IntoResponse {
    if let Err(error) = authorize(&state, &query) {
        return error;
    }

    match ask(&state.user_channel, |response| UserRequest::Stats { response }).await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({
                "stats": stats,
                "bot": state.settings.telegram.bot_username,
            })),
        ),
        Err(error) => error,
    }
}

pub async fn sweep(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> impl IntoResponse {
    if let Err(error) = authorize(&state, &query) {
        return error;
    }

    match ask(&state.user_channel, |response| UserRequest::Sweep { response }).await {
        Ok(removed) => (StatusCode::OK, Json(json!({ "removed": removed }))),
        Err(error) => error,
    }
}

pub async fn restore(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> impl IntoResponse {
    if let Err(error) = authorize(&state, &query) {
        return error;
    }

    match ask(&state.user_channel, |response| UserRequest::RestoreBackup { response }).await {
        Ok(users) => (
            StatusCode::OK,
            Json(json!({ "restored": true, "users": users })),
        ),
        Err(error) => error,
    }
}
