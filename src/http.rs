//! JSON routes over the chat service.
//!
//! ```text
//! GET    /api/health
//! POST   /api/chat
//! GET    /api/chat/conversations?userId=
//! DELETE /api/chat/conversations?userId=|all=true
//! GET    /api/chat/conversations/{id}
//! PATCH  /api/chat/conversations/{id}
//! DELETE /api/chat/conversations/{id}
//! ```
//!
//! Every body uses the `{success, message, data?, error?}` envelope, including
//! request-limit and malformed-body rejections.

mod limit;

use crate::chat::{ChatRequest, ChatService};
use crate::deadline::Deadline;
use crate::error::ChatError;
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
pub use limit::RequestLimiter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<dyn ChatService>,
    pub request_timeout: Duration,
    /// Applied to `POST /api/chat` only.
    pub chat_limit: Option<Arc<RequestLimiter>>,
    /// Applied to every route.
    pub api_limit: Option<Arc<RequestLimiter>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    message: String,
    conversation_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerQuery {
    user_id: Option<String>,
    #[serde(default)]
    all: bool,
}

#[derive(Deserialize)]
struct RenameBody {
    #[serde(default)]
    title: String,
}

pub fn router(state: AppState) -> Router {
    let mut chat_route = post(chat);
    if let Some(limiter) = state.chat_limit.clone() {
        chat_route =
            chat_route.route_layer(middleware::from_fn_with_state(limiter, limit::enforce));
    }

    let mut router = Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", chat_route)
        .route(
            "/api/chat/conversations",
            get(list_conversations).delete(clear_conversations),
        )
        .route(
            "/api/chat/conversations/{id}",
            get(get_conversation)
                .patch(rename_conversation)
                .delete(delete_conversation),
        );
    if let Some(limiter) = state.api_limit.clone() {
        router = router.layer(middleware::from_fn_with_state(limiter, limit::enforce));
    }
    router.with_state(state)
}

pub async fn serve(
    bind_addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("HTTP server listening on {}", bind_addr);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

fn success(message: &str, data: impl Serialize) -> Response {
    Json(json!({ "success": true, "message": message, "data": data })).into_response()
}

/// Store routes share the chat request budget. A durable rename, delete or
/// clear that times out may still commit; repeating it is harmless.
async fn bounded<F: Future>(state: &AppState, future: F) -> Result<F::Output, ChatError> {
    Deadline::after(state.request_timeout).bound(future).await
}

fn rejected_body(rejection: JsonRejection) -> Response {
    ChatError::Validation(rejection.body_text()).into_response()
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ChatError::AuthConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
            ChatError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = json!({
            "success": false,
            "message": self.to_string(),
            "error": {
                "kind": error_kind(&self),
                "retryable": self.is_retryable(),
            },
        });
        (status, Json(body)).into_response()
    }
}

fn error_kind(error: &ChatError) -> &'static str {
    match error {
        ChatError::Validation(_) => "validation",
        ChatError::NotFound(_) => "not_found",
        ChatError::RateLimited => "rate_limited",
        ChatError::AuthConfig(_) => "configuration",
        ChatError::Provider(_) => "provider",
        ChatError::Storage(_) => "storage",
        ChatError::Timeout(_) => "timeout",
    }
}

async fn health(State(state): State<AppState>) -> Response {
    success(
        "Extrain Ai chat service is running",
        json!({
            "storage": state.chat.store().mode(),
            "keys": state.chat.key_status(),
        }),
    )
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    let request = ChatRequest {
        message: body.message,
        conversation_id: body.conversation_id,
        user_id: body.user_id,
    };
    match state.chat.send(request, state.request_timeout).await {
        Ok(reply) => success("Response generated", reply),
        Err(e) => e.into_response(),
    }
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Response {
    match bounded(&state, state.chat.store().list(query.user_id.as_deref())).await {
        Ok(Ok(summaries)) => success("Conversations retrieved", summaries),
        Ok(Err(e)) | Err(e) => e.into_response(),
    }
}

async fn get_conversation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match bounded(&state, state.chat.store().get(&id)).await {
        Ok(Ok(Some(conversation))) => success("Conversation retrieved", conversation),
        Ok(Ok(None)) => ChatError::NotFound(id).into_response(),
        Ok(Err(e)) | Err(e) => e.into_response(),
    }
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<RenameBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    match bounded(&state, state.chat.store().rename(&id, &body.title)).await {
        Ok(Ok(conversation)) => success("Conversation renamed", conversation),
        Ok(Err(e)) | Err(e) => e.into_response(),
    }
}

async fn delete_conversation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match bounded(&state, state.chat.store().delete(&id)).await {
        Ok(Ok(true)) => success("Conversation deleted", json!({ "_id": id })),
        Ok(Ok(false)) => ChatError::NotFound(id).into_response(),
        Ok(Err(e)) | Err(e) => e.into_response(),
    }
}

async fn clear_conversations(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Response {
    let owner = match (query.user_id.as_deref(), query.all) {
        (Some(owner), _) => Some(owner),
        (None, true) => None,
        (None, false) => {
            return ChatError::Validation(
                "userId is required, or pass all=true to clear every conversation".to_string(),
            )
            .into_response();
        }
    };
    match bounded(&state, state.chat.store().clear(owner)).await {
        Ok(Ok(deleted)) => success("Conversations cleared", json!({ "deleted": deleted })),
        Ok(Err(e)) | Err(e) => e.into_response(),
    }
}
