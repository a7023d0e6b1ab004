use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;

use super::{ask, AppState};
use crate::services::telegram::TelegramRequest;
use crate::services::users::UserRequest;

#[derive(Deserialize)]
pub struct StartRequest {
    user_id: String,
    referral_code: Option<String>,
    first_name: Option<String>,
    username: Option<String>,
}

#[derive(Deserialize)]
pub struct JoinRequest {
    user_id: String,
}

pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::Start {
        user_id: req.user_id,
        referral_code: req.referral_code,
        display_name: req.first_name,
        handle: req.username,
        response,
    })
    .await;

    match result {
        Ok(start) => {
            let referral_link = state.settings.referral_link(&start.status.user_id);
            (
                StatusCode::OK,
                Json(json!({
                    "status": start.status,
                    "outcome": start.outcome,
                    "referral_link": referral_link,
                })),
            )
        }
        Err(error) => error,
    }
}

pub async fn join_request(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> impl IntoResponse {
    let result = ask(&state.user_channel, |response| UserRequest::JoinRequest {
        user_id: req.user_id,
        response,
    })
    .await;

    match result {
        Ok(join) => (StatusCode::OK, Json(json!(join))),
        Err(error) => error,
    }
}

pub async fn get_user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let status = match ask(&state.user_channel, |response| UserRequest::GetStatus {
        id: user_id.clone(),
        response,
    })
    .await
    {
        Ok(Some(status)) => status,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "Unknown user",
                    "details": "Use /start first."
                })),
            )
        }
        Err(error) => return error,
    };

    let (member_tx, member_rx) = oneshot::channel();
    let in_channel = match state
        .telegram_channel
        .send(TelegramRequest::IsChannelMember {
            user_id: user_id.clone(),
            response: member_tx,
        })
        .await
    {
        Ok(()) => member_rx.await.unwrap_or(false),
        Err(e) => {
            log::warn!("Could not ask channel membership of {}: {}", user_id, e);
            false
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "user_id": status.user_id,
            "points": status.points,
            "referral_count": status.referral_count,
            "required": status.required,
            "is_approved": status.is_approved,
            "eligible": status.is_complete(),
            "in_channel": in_channel,
            "referral_link": state.settings.referral_link(&user_id),
        })),
    )
}
