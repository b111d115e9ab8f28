use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use application::{ChatEventDto, ChatStatsDto};
use domain::Timestamp;

use crate::{error::ApiError, state::AppState, ws_connection::LiveConnection};

#[derive(Debug, Deserialize)]
struct PollQuery {
    /// 缺省时从保留窗口起点开始
    since: Option<Timestamp>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/messages/poll", get(poll_messages))
        .route("/messages/recent", get(recent_messages))
        .route("/chat/send", post(send_chat))
        .route("/admin/stats", get(admin_stats))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| LiveConnection::new(state).run(socket))
}

async fn poll_messages(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Vec<ChatEventDto>>, ApiError> {
    let events = match query.since {
        Some(since) => state.chat_service.since(since).await?,
        None => {
            state
                .chat_service
                .recent(state.chat_service.history_window())
                .await?
        }
    };

    Ok(Json(events.iter().map(ChatEventDto::from).collect()))
}

async fn recent_messages(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatEventDto>>, ApiError> {
    let events = state
        .chat_service
        .recent(state.chat_service.history_window())
        .await?;

    Ok(Json(events.iter().map(ChatEventDto::from).collect()))
}

/// 轮询客户端的发送入口，客户端提供的时间戳会被忽略
async fn send_chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatEventDto>,
) -> Result<(StatusCode, Json<ChatEventDto>), ApiError> {
    let event = payload.into_chat_event()?;
    let accepted = state.chat_service.send(event).await?;

    Ok((StatusCode::ACCEPTED, Json(ChatEventDto::from(accepted))))
}

async fn admin_stats(State(state): State<AppState>) -> Result<Json<ChatStatsDto>, ApiError> {
    let window = state.chat_service.history_window();
    let messages_in_window = state.chat_service.count(window).await?;
    let chat_messages_in_window = state.chat_service.count_chat(window).await?;

    Ok(Json(ChatStatsDto {
        instance_id: state.instance_id.to_string(),
        online_users: state.presence.count(),
        active_usernames: state.presence.snapshot(),
        messages_in_window,
        chat_messages_in_window,
    }))
}
