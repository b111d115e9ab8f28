use std::time::Duration;

use application::{ChatEventDto, EventStream};
use axum::{
    body::Bytes,
    extract::ws::{Message as WsMessage, WebSocket},
};
use domain::NewChatEvent;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::timeout};
use uuid::Uuid;

use crate::{
    error::{ApiError, ErrorBody},
    state::AppState,
};

/// 客户端发来的帧：`{"action": "...", "payload": {...}}`
#[derive(Debug, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "kebab-case")]
enum ClientFrame {
    SendChat(ChatEventDto),
    Join(ChatEventDto),
    Leave(ChatEventDto),
}

/// 只发给当前连接的错误帧
#[derive(Debug, Serialize)]
struct ErrorFrame {
    error: ErrorBody,
}

/// 连接状态
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionPhase {
    Connected,
    Identified(String),
    Disconnected,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Bytes),
    Close,
}

/// 单个实时连接
///
/// 读循环在当前任务里运行并持有连接状态；所有写操作（广播事件、错误帧、pong）
/// 由独立的发送任务串行完成，每次写都有超时，写失败只会断开这一个连接。
pub struct LiveConnection {
    id: Uuid,
    state: AppState,
    phase: ConnectionPhase,
}

impl LiveConnection {
    pub fn new(state: AppState) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            phase: ConnectionPhase::Connected,
        }
    }

    pub async fn run(mut self, socket: WebSocket) {
        tracing::info!(connection_id = %self.id, "WebSocket 连接已建立");

        // 连接建立后立刻订阅，只接收之后分发的事件
        let events = self.state.hub.subscribe();
        let (sender, mut incoming) = socket.split();
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(32);

        let mut send_task = tokio::spawn(send_loop(
            self.id,
            sender,
            cmd_rx,
            events,
            self.state.gateway.send_timeout,
        ));
        let mut writer_finished = false;

        loop {
            tokio::select! {
                _ = &mut send_task => {
                    writer_finished = true;
                    break;
                }
                message = incoming.next() => match message {
                    Some(Ok(message)) => {
                        if self.handle_message(message, &cmd_tx).await == Flow::Close {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %self.id, error = %err, "WebSocket 读取失败");
                        break;
                    }
                    None => break,
                },
            }
        }

        self.teardown().await;

        drop(cmd_tx);
        if !writer_finished {
            let _ = send_task.await;
        }

        tracing::info!(connection_id = %self.id, "WebSocket 连接已断开");
    }

    async fn handle_message(&mut self, message: WsMessage, cmd_tx: &mpsc::Sender<WsCommand>) -> Flow {
        match message {
            WsMessage::Close(_) => {
                tracing::debug!(connection_id = %self.id, "WebSocket 收到关闭消息");
                Flow::Close
            }
            WsMessage::Ping(data) => {
                if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                    return Flow::Close;
                }
                Flow::Continue
            }
            WsMessage::Pong(_) => Flow::Continue,
            WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(frame) => self.handle_frame(frame, cmd_tx).await,
                Err(err) => {
                    reply_error(cmd_tx, ApiError::invalid_frame(err.to_string())).await;
                    Flow::Continue
                }
            },
            WsMessage::Binary(_) => {
                reply_error(cmd_tx, ApiError::invalid_frame("binary frames are not supported"))
                    .await;
                Flow::Continue
            }
        }
    }

    async fn handle_frame(&mut self, frame: ClientFrame, cmd_tx: &mpsc::Sender<WsCommand>) -> Flow {
        let result = match frame {
            ClientFrame::SendChat(payload) => self.send_chat(payload).await,
            ClientFrame::Join(payload) => self.join(payload).await,
            ClientFrame::Leave(payload) => {
                let result = self.leave(payload).await;
                if let Err(err) = result {
                    reply_error(cmd_tx, err).await;
                }
                let _ = cmd_tx.send(WsCommand::Close).await;
                return Flow::Close;
            }
        };

        if let Err(err) = result {
            reply_error(cmd_tx, err).await;
        }
        Flow::Continue
    }

    /// 不回显：发送者只通过 broker 回传收到自己的消息
    async fn send_chat(&self, payload: ChatEventDto) -> Result<(), ApiError> {
        let event = payload.into_chat_event()?;
        self.state.chat_service.send(event).await?;
        Ok(())
    }

    async fn join(&mut self, payload: ChatEventDto) -> Result<(), ApiError> {
        if let ConnectionPhase::Identified(current) = &self.phase {
            return Err(ApiError::already_joined(current));
        }

        let event = NewChatEvent::join(payload.username)?;
        let username = event.username.as_str().to_owned();

        self.state.presence.add(&username);
        self.phase = ConnectionPhase::Identified(username.clone());
        tracing::info!(connection_id = %self.id, username = %username, "连接已标识用户");

        self.state.chat_service.send(event).await?;
        Ok(())
    }

    async fn leave(&mut self, payload: ChatEventDto) -> Result<(), ApiError> {
        let username = match std::mem::replace(&mut self.phase, ConnectionPhase::Disconnected) {
            ConnectionPhase::Identified(username) => username,
            _ => payload.username,
        };
        self.leave_as(username).await
    }

    async fn leave_as(&self, username: String) -> Result<(), ApiError> {
        let event = NewChatEvent::leave(username)?;
        self.state.presence.remove(event.username.as_str());
        self.state.chat_service.send(event).await?;
        Ok(())
    }

    /// 未显式 LEAVE 就断开时，按配置决定是否补发 LEAVE
    async fn teardown(&mut self) {
        let phase = std::mem::replace(&mut self.phase, ConnectionPhase::Disconnected);
        let ConnectionPhase::Identified(username) = phase else {
            return;
        };

        if !self.state.gateway.leave_on_disconnect {
            tracing::debug!(
                connection_id = %self.id,
                username = %username,
                "连接断开但未发送 LEAVE，在线状态保持不变"
            );
            return;
        }

        if let Err(err) = self.leave_as(username.clone()).await {
            let body = err.into_body();
            tracing::warn!(
                connection_id = %self.id,
                username = %username,
                code = body.code,
                error = %body.message,
                "断开连接时补发 LEAVE 失败"
            );
        }
    }
}

async fn reply_error(cmd_tx: &mpsc::Sender<WsCommand>, error: ApiError) {
    let frame = ErrorFrame {
        error: error.into_body(),
    };
    tracing::debug!(code = frame.error.code, message = %frame.error.message, "向客户端返回错误");
    match serde_json::to_string(&frame) {
        Ok(text) => {
            let _ = cmd_tx.send(WsCommand::SendText(text)).await;
        }
        Err(err) => tracing::warn!(error = %err, "错误帧序列化失败"),
    }
}

async fn send_loop(
    connection_id: Uuid,
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut cmd_rx: mpsc::Receiver<WsCommand>,
    mut events: EventStream,
    send_timeout: Duration,
) {
    loop {
        let message = tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(WsCommand::SendText(text)) => WsMessage::Text(text.into()),
                Some(WsCommand::SendPong(data)) => WsMessage::Pong(data),
                Some(WsCommand::Close) | None => {
                    let _ = timeout(send_timeout, sender.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            event = events.recv() => match event {
                Some(event) => match serde_json::to_string(&ChatEventDto::from(event.as_ref())) {
                    Ok(text) => WsMessage::Text(text.into()),
                    Err(err) => {
                        tracing::warn!(connection_id = %connection_id, error = %err, "事件序列化失败");
                        continue;
                    }
                },
                None => break,
            },
        };

        match timeout(send_timeout, sender.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(connection_id = %connection_id, error = %err, "写入客户端失败，断开连接");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    timeout_ms = send_timeout.as_millis() as u64,
                    "写入客户端超时，断开连接"
                );
                break;
            }
        }
    }

    tracing::debug!(connection_id = %connection_id, "WebSocket 发送任务结束");
}
