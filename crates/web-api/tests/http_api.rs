mod support;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use support::{connect, next_json, send_json, spawn_app};

#[tokio::test]
async fn health_check() {
    let app = spawn_app(false).await;
    let response = Client::new().get(app.http("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn send_then_poll_since_returns_event() {
    let app = spawn_app(false).await;
    let client = Client::new();

    let response = client
        .post(app.http("/api/chat/send"))
        .json(&json!({
            "username": "Ann",
            "content": "hello from polling",
            "timestamp": "1999-01-01T00:00:00Z"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["type"], "CHAT");
    assert_eq!(accepted["content"], "hello from polling");
    let timestamp = accepted["timestamp"].as_str().unwrap().to_owned();
    assert!(!timestamp.starts_with("1999"));

    let polled: Vec<Value> = client
        .get(app.http("/api/messages/poll"))
        .query(&[("since", timestamp.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(polled.contains(&accepted));
}

#[tokio::test]
async fn rejects_invalid_event() {
    let app = spawn_app(false).await;

    let response = Client::new()
        .post(app.http("/api/chat/send"))
        .json(&json!({"username": "", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_EVENT");
}

#[tokio::test]
async fn rejects_join_or_leave_sent_as_chat() {
    let app = spawn_app(false).await;

    let response = Client::new()
        .post(app.http("/api/chat/send"))
        .json(&json!({"username": "Ann", "content": "Ann left the chat", "type": "LEAVE"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_EVENT");
}

#[tokio::test]
async fn recent_lists_events_in_send_order() {
    let app = spawn_app(false).await;
    let client = Client::new();

    for content in ["one", "two", "three"] {
        let response = client
            .post(app.http("/api/chat/send"))
            .json(&json!({"username": "Ann", "content": content}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let recent: Vec<Value> = client
        .get(app.http("/api/messages/recent"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let contents: Vec<_> = recent.iter().map(|e| e["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn admin_stats_reflect_presence_and_volume() {
    let app = spawn_app(false).await;
    let mut bob = connect(&app).await;

    send_json(&mut bob, json!({"action": "join", "payload": {"username": "Bob"}})).await;
    next_json(&mut bob).await;
    send_json(
        &mut bob,
        json!({"action": "send-chat", "payload": {"username": "Bob", "content": "hi"}}),
    )
    .await;
    next_json(&mut bob).await;

    let stats: Value = Client::new()
        .get(app.http("/api/admin/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(stats["instance_id"], "test-instance");
    assert_eq!(stats["online_users"], 1);
    assert_eq!(stats["active_usernames"], json!(["Bob"]));
    assert_eq!(stats["messages_in_window"], 2);
    assert_eq!(stats["chat_messages_in_window"], 1);
}
