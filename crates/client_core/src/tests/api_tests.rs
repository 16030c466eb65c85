use super::*;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::UserId;
use std::collections::HashMap;
use tokio::{net::TcpListener, sync::Mutex};
use url::Url;

#[derive(Clone, Default)]
struct ApiServerState {
    seen_tokens: Arc<Mutex<Vec<String>>>,
    read_requests: Arc<Mutex<Vec<String>>>,
}

async fn record_token(state: &ApiServerState, headers: &HeaderMap) {
    if let Some(value) = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
    {
        state.seen_tokens.lock().await.push(value.to_string());
    }
}

async fn list_chats(State(state): State<ApiServerState>, headers: HeaderMap) -> Json<Value> {
    record_token(&state, &headers).await;
    Json(json!({
        "status": "success",
        "message": "Chats fetched",
        "data": [{
            "conversationId": "c1",
            "partnerId": "u2",
            "partnerName": "Bob",
            "partnerProfilePic": null,
            "lastMessage": {
                "id": "m9",
                "content": "see you",
                "emoji": "",
                "createdAt": "2024-05-01T10:00:00Z",
                "isSentByUser": false
            },
            "unreadCount": 3
        }],
        "errors": null
    }))
}

async fn get_chat(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    if id != "c1" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": "Chat not found", "data": null, "errors": null})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": "Chat fetched",
            "data": {
                "conversationId": "c1",
                "partner": {"id": "u2", "name": "Bob", "profilePic": null},
                "messages": [{
                    "id": "m1",
                    "senderId": "u2",
                    "content": "hello",
                    "emoji": "",
                    "createdAt": "2024-05-01T09:00:00Z",
                    "isRead": false,
                    "isSentByUser": false,
                    "isPending": false
                }]
            },
            "errors": null
        })),
    )
}

async fn delete_chat(Path(_id): Path<String>) -> Json<Value> {
    Json(json!({"status": "error", "message": "Not allowed", "data": null, "errors": null}))
}

async fn mark_read(
    State(state): State<ApiServerState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    if let Some(id) = query.get("id") {
        state.read_requests.lock().await.push(id.clone());
    }
    Json(json!({"status": "success", "message": "Marked", "data": null, "errors": null}))
}

async fn spawn_api_server() -> (String, ApiServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ApiServerState::default();
    let app = Router::new()
        .route("/chats", get(list_chats))
        .route("/chats/markMessagesAsRead/", patch(mark_read))
        .route("/chats/:id", get(get_chat).delete(delete_chat))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

fn session_for(base: &str, token: &str) -> Arc<SessionContext> {
    Arc::new(SessionContext::new(
        UserId::new("u1"),
        token,
        Url::parse(base).expect("api url"),
        Url::parse("ws://127.0.0.1:1/chat").expect("ws url"),
    ))
}

#[tokio::test]
async fn fetches_conversation_list_with_bearer_token() {
    let (base, state) = spawn_api_server().await;
    let api = HttpChatApi::new(session_for(&base, "secret-token"));

    let chats = api.fetch_conversations().await.expect("chats");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].conversation_id, ConversationId::new("c1"));
    assert_eq!(chats[0].unread_count, 3);
    assert_eq!(
        state.seen_tokens.lock().await.clone(),
        vec!["Bearer secret-token".to_string()]
    );
}

#[tokio::test]
async fn fetches_conversation_detail() {
    let (base, _state) = spawn_api_server().await;
    let api = HttpChatApi::new(session_for(&base, "secret-token"));

    let detail = api
        .fetch_conversation(&ConversationId::new("c1"))
        .await
        .expect("detail");
    assert_eq!(detail.partner.name, "Bob");
    assert_eq!(detail.messages.len(), 1);
    assert_eq!(detail.messages[0].emoji, None);
}

#[tokio::test]
async fn unknown_conversation_is_a_failure() {
    let (base, _state) = spawn_api_server().await;
    let api = HttpChatApi::new(session_for(&base, "secret-token"));

    let err = api
        .fetch_conversation(&ConversationId::new("missing"))
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("Chat not found"), "{err}");
}

#[tokio::test]
async fn mark_as_read_sends_conversation_id_query() {
    let (base, state) = spawn_api_server().await;
    let api = HttpChatApi::new(session_for(&base, "secret-token"));

    api.mark_messages_as_read(&ConversationId::new("c1"))
        .await
        .expect("mark read");
    assert_eq!(state.read_requests.lock().await.clone(), vec!["c1".to_string()]);
}

#[tokio::test]
async fn non_success_status_discriminator_fails_even_with_http_200() {
    let (base, _state) = spawn_api_server().await;
    let api = HttpChatApi::new(session_for(&base, "secret-token"));

    let err = api
        .delete_conversation(&ConversationId::new("c1"))
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("Not allowed"), "{err}");
}

#[tokio::test]
async fn missing_token_fails_without_network() {
    let api = HttpChatApi::new(session_for("http://127.0.0.1:1", ""));
    let err = api.fetch_conversations().await.expect_err("must fail");
    assert!(err.to_string().contains("not authenticated"), "{err}");
}

#[tokio::test]
async fn missing_api_reports_unavailable() {
    let err = MissingChatApi
        .fetch_conversation(&ConversationId::new("c1"))
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("unavailable"), "{err}");
}
