use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{ChatMessage, ChatRequest, ChatThread},
};

const MAX_MESSAGE_LENGTH: usize = 2000;

fn message_body(payload: ChatRequest) -> AppResult<String> {
    let body = payload.body.trim();
    let length = body.chars().count();
    if length == 0 || length > MAX_MESSAGE_LENGTH {
        return Err(AppError::BadRequest(format!(
            "message must be between 1 and {MAX_MESSAGE_LENGTH} characters"
        )));
    }
    Ok(body.to_string())
}

/// get_my_chat
///
/// [Authenticated Route] The caller's support conversation, oldest first.
#[utoipa::path(
    get,
    path = "/chat",
    responses((status = 200, description = "Conversation", body = [ChatMessage]))
)]
pub async fn get_my_chat(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    Ok(Json(state.repo.list_chat_messages(user.id).await?))
}

#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 201, description = "Sent", body = ChatMessage),
        (status = 400, description = "Empty or too long")
    )
)]
pub async fn send_chat_message(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> AppResult<(StatusCode, Json<ChatMessage>)> {
    let body = message_body(payload)?;
    let message = state
        .repo
        .add_chat_message(user.id, user.id, false, body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// --- Admin inbox ---

#[utoipa::path(
    get,
    path = "/admin/chat",
    responses((status = 200, description = "Conversations, most recent first", body = [ChatThread]))
)]
pub async fn admin_list_chat_threads(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ChatThread>>> {
    user.require_admin()?;
    Ok(Json(state.repo.list_chat_threads().await?))
}

#[utoipa::path(
    get,
    path = "/admin/chat/{user_id}",
    params(("user_id" = Uuid, Path, description = "Customer ID")),
    responses((status = 200, description = "Conversation", body = [ChatMessage]))
)]
pub async fn admin_get_chat(
    user: AuthUser,
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    user.require_admin()?;
    Ok(Json(state.repo.list_chat_messages(customer_id).await?))
}

/// admin_reply_chat
///
/// [Admin Route] Posts a staff reply into a customer's conversation.
#[utoipa::path(
    post,
    path = "/admin/chat/{user_id}",
    params(("user_id" = Uuid, Path, description = "Customer ID")),
    request_body = ChatRequest,
    responses(
        (status = 201, description = "Sent", body = ChatMessage),
        (status = 404, description = "Unknown customer")
    )
)]
pub async fn admin_reply_chat(
    user: AuthUser,
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(payload): Json<ChatRequest>,
) -> AppResult<(StatusCode, Json<ChatMessage>)> {
    user.require_admin()?;
    let body = message_body(payload)?;
    if state.repo.get_user(customer_id).await?.is_none() {
        return Err(AppError::NotFound("customer not found".into()));
    }
    let message = state
        .repo
        .add_chat_message(customer_id, user.id, true, body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
