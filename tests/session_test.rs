use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

use cloudstore_client::auth::session::UserSession;
use cloudstore_client::auth::token::{MemoryTokenStore, TokenStore};
use cloudstore_client::bootstrap::sequencer::SessionRestorer;
use cloudstore_client::{ApiClient, ClientConfig};

async fn me(headers: HeaderMap) -> Response {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer good") => Json(json!({ "id": 5, "email": "ada@example.com" })).into_response(),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid token" }))).into_response(),
    }
}

async fn client_with_token(token: &str) -> (Arc<ApiClient>, Arc<MemoryTokenStore>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/api/auth/me", get(me));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let tokens = Arc::new(MemoryTokenStore::with_token(token));
    let config = ClientConfig {
        base_url: format!("http://{}/api", addr),
        ..ClientConfig::default()
    };
    (Arc::new(ApiClient::new(&config, tokens.clone())), tokens)
}

#[tokio::test]
async fn test_restore_and_sign_out() {
    let (client, tokens) = client_with_token("good").await;
    let session = UserSession::new(client);

    session.fetch_current_user().await.unwrap();
    assert!(session.is_signed_in());
    assert_eq!(session.user().unwrap()["email"], "ada@example.com");

    session.sign_out().unwrap();
    assert!(!session.is_signed_in());
    assert_eq!(tokens.token().unwrap(), None);
}

#[tokio::test]
async fn test_rejected_token_leaves_user_empty() {
    let (client, _) = client_with_token("stale").await;
    let session = UserSession::new(client);

    let err = session.fetch_current_user().await.unwrap_err();
    assert!(err.to_string().contains("Invalid token"), "{}", err);
    assert!(!session.is_signed_in());
}
