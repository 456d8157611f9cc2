use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, TurnError};
use crate::memory::Turn;

#[derive(Clone)]
pub struct AppState {
    pub conversation: Arc<Conversation>,
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub text: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct MemoryResponse {
    pub turns: Vec<Turn>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/message", post(handle_message))
        .route("/memory", get(handle_memory).delete(handle_clear))
        .route("/health", get(handle_health))
        .with_state(state)
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.api_key else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected.as_str())
}

fn error_response(status: StatusCode, kind: &'static str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorBody { kind, message },
        }),
    )
        .into_response()
}

fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized".into())
}

async fn handle_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection.into_response(),
    };
    match state.conversation.ask_turn(&req.text).await {
        Ok(text) => (StatusCode::OK, Json(MessageResponse { text })).into_response(),
        Err(e) => {
            let status = match e {
                TurnError::MissingConfiguration => StatusCode::SERVICE_UNAVAILABLE,
                TurnError::Model { .. } => StatusCode::BAD_GATEWAY,
            };
            error_response(status, e.kind(), e.to_string())
        }
    }
}

async fn handle_memory(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    let turns = state.conversation.transcript().await;
    Json(MemoryResponse { turns }).into_response()
}

async fn handle_clear(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }
    state.conversation.clear_memory().await;
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::conversation::tests::ScriptedLlm;
    use crate::llm::{LlmClient, ModelError};
    use crate::llm::test_support::spawn_server;
    use crate::memory::{DEFAULT_KEY, MemoryStore};
    use crate::prompt::PromptSet;
    use crate::storage::MemoryKv;

    async fn serve(llm: Option<Arc<dyn LlmClient>>, api_key: Option<&str>) -> String {
        let conversation = Conversation::new(
            llm,
            MemoryStore::load(Arc::new(MemoryKv::new()), DEFAULT_KEY),
            PromptSet::new("base", "custom"),
        );
        spawn_server(router(AppState {
            conversation: Arc::new(conversation),
            api_key: api_key.map(str::to_string),
        }))
        .await
    }

    fn scripted(replies: Vec<Result<String, ModelError>>) -> Option<Arc<dyn LlmClient>> {
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(replies));
        Some(llm)
    }

    #[tokio::test]
    async fn test_message_then_memory_then_clear() {
        let base = serve(scripted(vec![Ok("Hi there".into())]), None).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/message"))
            .json(&json!({"text": "Hello"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["text"], "Hi there");

        let memory: Value = client
            .get(format!("{base}/memory"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            memory["turns"],
            json!([
                {"role": "user", "content": "Hello"},
                {"role": "model", "content": "Hi there"}
            ])
        );

        let resp = client.delete(format!("{base}/memory")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        let memory: Value = client
            .get(format!("{base}/memory"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(memory["turns"], json!([]));
    }

    #[tokio::test]
    async fn test_model_failure_is_tagged() {
        let failure = ModelError::Transport {
            message: "rate limited".into(),
        };
        let base = serve(scripted(vec![Err(failure)]), None).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/message"))
            .json(&json!({"text": "Hello"}))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["kind"], "model");
        assert_eq!(body["error"]["message"], "rate limited");
    }

    #[tokio::test]
    async fn test_missing_configuration_is_unavailable() {
        let base = serve(None, None).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/message"))
            .json(&json!({"text": "Hello"}))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["kind"], "missing_configuration");
        assert_eq!(body["error"]["message"], "Missing API key.");
    }

    #[tokio::test]
    async fn test_auth_checked_before_body() {
        let base = serve(scripted(vec![]), Some("secret")).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/message"))
            .header("Content-Type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let resp = client
            .post(format!("{base}/message"))
            .header("Authorization", "Bearer secret")
            .header("Content-Type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bearer_token_required_when_configured() {
        let base = serve(scripted(vec![Ok("ok".into())]), Some("secret")).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/memory")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let resp = client
            .get(format!("{base}/memory"))
            .header("Authorization", "Bearer wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let resp = client
            .post(format!("{base}/message"))
            .header("Authorization", "Bearer secret")
            .json(&json!({"text": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }
}
