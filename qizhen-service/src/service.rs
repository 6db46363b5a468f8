use axum::{
    Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::from_fn,
    response::{Html, Json},
    routing::{get, post},
};
use qizhen_core::{
    ChatError, ChatReply, ChatRequest, DialogueError, DialogueRequest, DialogueResponse, Dispatcher,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

use crate::{
    models::{EndDialogueRequest, MessageResponse, SubjectLink},
    pages,
    telemetry::correlation_id_middleware,
};

/// Base64 inflates a 16 MB image to about 21.4 MB of JSON.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn invalid_image_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn internal_error(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
}

/// One dispatcher per enabled subject, in portal order.
#[derive(Clone)]
pub struct AppState {
    pub dispatchers: Vec<Arc<Dispatcher>>,
}

pub fn create_app(state: AppState) -> Router {
    let subjects = state.dispatchers.clone();
    let mut router = Router::new()
        .route("/", get(portal))
        .route("/healthz", get(health_check))
        .route("/subjects", get(list_subjects))
        .with_state(state);

    for dispatcher in subjects {
        let prefix = format!("/{}", dispatcher.subject().slug);
        router = router.nest(&prefix, subject_router(dispatcher));
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware))
}

fn subject_router(dispatcher: Arc<Dispatcher>) -> Router {
    let mut router = Router::new()
        .route("/", get(landing))
        .route("/chat_ui", get(chat_ui))
        .route("/chat", post(chat));

    if dispatcher.has_dialogue() {
        router = router
            .route("/role", get(role_ui))
            .route("/start_dialogue", post(start_dialogue))
            .route("/continue_dialogue", post(continue_dialogue))
            .route("/end_dialogue", post(end_dialogue));
    }

    router.with_state(dispatcher)
}

async fn portal(State(state): State<AppState>) -> Html<String> {
    let subjects: Vec<_> = state.dispatchers.iter().map(|d| d.subject()).collect();
    Html(pages::portal(&subjects))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_subjects(State(state): State<AppState>) -> Json<Vec<SubjectLink>> {
    Json(
        state
            .dispatchers
            .iter()
            .map(|d| pages::link(d.subject()))
            .collect(),
    )
}

async fn landing(State(dispatcher): State<Arc<Dispatcher>>) -> Html<String> {
    Html(pages::landing(dispatcher.subject()))
}

async fn chat_ui(State(dispatcher): State<Arc<Dispatcher>>) -> Html<String> {
    Html(pages::chat(dispatcher.subject()))
}

async fn role_ui(State(dispatcher): State<Arc<Dispatcher>>) -> Html<String> {
    Html(pages::role(dispatcher.subject()))
}

/// Unreadable bodies are treated as empty so the caller gets the usual input error.
fn body_or_default<T: Default>(payload: Result<Json<T>, JsonRejection>) -> T {
    match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("unreadable request body: {}", rejection);
            T::default()
        }
    }
}

async fn chat(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<ChatReply> {
    let request = body_or_default(payload);
    dispatcher
        .handle_chat(request)
        .await
        .map(Json)
        .map_err(chat_error)
}

fn chat_error(e: ChatError) -> ApiError {
    match &e {
        ChatError::EmptyInput => bad_request_error(&e.to_string()),
        ChatError::Image(source) => invalid_image_error(&e.to_string(), &source.to_string()),
        ChatError::Session(source) => {
            error!("session store failed during chat: {}", source);
            internal_error(&e.to_string())
        }
    }
}

async fn start_dialogue(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: Result<Json<DialogueRequest>, JsonRejection>,
) -> ApiResult<DialogueResponse> {
    let request = body_or_default(payload);
    dispatcher
        .start_dialogue(request)
        .await
        .map(Json)
        .map_err(dialogue_error)
}

async fn continue_dialogue(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: Result<Json<DialogueRequest>, JsonRejection>,
) -> ApiResult<DialogueResponse> {
    let request = body_or_default(payload);
    dispatcher
        .continue_dialogue(request)
        .await
        .map(Json)
        .map_err(dialogue_error)
}

fn dialogue_error(e: DialogueError) -> ApiError {
    if let DialogueError::Image(source) = &e {
        return invalid_image_error(&e.to_string(), &source.to_string());
    }
    if e.is_client_error() {
        return bad_request_error(&e.to_string());
    }
    match &e {
        DialogueError::Generation(details) => error!("dialogue turn failed: {}", details),
        DialogueError::Session(source) => error!("session store failed during dialogue: {}", source),
        other => error!("dialogue request failed: {}", other),
    }
    internal_error(&e.to_string())
}

async fn end_dialogue(
    State(dispatcher): State<Arc<Dispatcher>>,
    payload: Result<Json<EndDialogueRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let request = body_or_default(payload);
    match dispatcher.end_dialogue(request.session_id.as_deref()).await {
        Ok(message) => Ok(Json(MessageResponse {
            message: message.to_string(),
        })),
        Err(e) => {
            error!("failed to end dialogue: {}", e);
            Err(internal_error("会话存储不可用"))
        }
    }
}
