use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;
use parley_proto::{ChatMessage, SendMessageRequest, UserId, UserProfile, USER_ID_HEADER};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::chat::ChatError;
use crate::state::RelayState;
use crate::upload::UploadError;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayState>,
    pub metrics: Option<PrometheusHandle>,
}

/// Caller identity asserted by the upstream auth layer through `x-user-id`.
pub struct Caller(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok());
        UserId::parse_optional(raw)
            .map(Caller)
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Chat(ChatError),
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError::Chat(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing caller identity".to_string(),
            ),
            ApiError::Chat(err) => {
                let status = match &err {
                    ChatError::EmptyMessage | ChatError::InvalidMedia { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    ChatError::Upload(UploadError::NotConfigured) => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    ChatError::Upload(_) => StatusCode::BAD_GATEWAY,
                    ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(error = %err, "chat request failed");
                }
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    online: usize,
    connections: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        online: state.relay.registry().len(),
        connections: state.relay.connection_count(),
    })
}

/// GET /online - current presence snapshot.
pub async fn online_users(State(state): State<AppState>) -> Json<Vec<UserId>> {
    Json(state.relay.presence().to_vec())
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /api/messages/users
pub async fn list_contacts(
    State(state): State<AppState>,
    Caller(me): Caller,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    Ok(Json(state.relay.chat().contacts(&me).await?))
}

/// GET /api/messages/:id
pub async fn get_messages(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(peer): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let peer = UserId::new(peer);
    Ok(Json(state.relay.chat().conversation(&me, &peer).await?))
}

/// POST /api/messages/send/:id
pub async fn send_message(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(receiver): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let receiver = UserId::new(receiver);
    let message = state
        .relay
        .chat()
        .send_message(&me, &receiver, request)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
