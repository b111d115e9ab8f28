#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ChatService, ChatServiceDependencies, EventBroker, InMemoryChatEventRepository,
    InProcessEventBroker, LiveEventHub, PresenceTracker, SystemClock,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    time::timeout,
};
use tokio_tungstenite::{
    client_async, connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream,
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use web_api::{router, AppState, GatewaySettings};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// 使用进程内存储和 broker 的完整服务
pub struct TestApp {
    pub addr: SocketAddr,
    pub presence: Arc<PresenceTracker>,
    pub repository: Arc<InMemoryChatEventRepository>,
    shutdown: CancellationToken,
}

impl TestApp {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn spawn_app(leave_on_disconnect: bool) -> TestApp {
    spawn_app_with(GatewaySettings {
        send_timeout: Duration::from_secs(2),
        leave_on_disconnect,
    })
    .await
}

pub async fn spawn_app_with(gateway: GatewaySettings) -> TestApp {
    let repository = Arc::new(InMemoryChatEventRepository::new());
    let broker = Arc::new(InProcessEventBroker::new(256));
    let hub = LiveEventHub::new(256);
    let presence = Arc::new(PresenceTracker::new());
    let shutdown = CancellationToken::new();

    broker.on_receive(Arc::new(hub.clone()), shutdown.clone());

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        repository: repository.clone(),
        broker,
        clock: Arc::new(SystemClock),
        history_window: chrono::Duration::hours(24),
    }));

    let state = AppState::new(
        chat_service,
        presence.clone(),
        hub,
        gateway,
        "test-instance",
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, router(state).into_make_service())
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
            .ok();
    });

    TestApp {
        addr,
        presence,
        repository,
        shutdown,
    }
}

/// 连接并等待服务端完成订阅
pub async fn connect(app: &TestApp) -> WsClient {
    let (ws, _) = connect_async(app.ws_url()).await.expect("connect websocket");
    wait_ready(ws).await
}

/// 使用很小的接收缓冲区连接，停止读取后服务端的写操作很快就会阻塞
pub async fn connect_with_small_buffer(app: &TestApp) -> WsClient {
    let socket = TcpSocket::new_v4().expect("socket");
    socket.set_recv_buffer_size(4096).expect("recv buffer size");
    let stream = socket.connect(app.addr).await.expect("tcp connect");
    let (ws, _) = client_async(app.ws_url(), MaybeTlsStream::Plain(stream))
        .await
        .expect("websocket handshake");
    wait_ready(ws).await
}

/// pong 由发送任务写出，而发送任务在订阅之后才启动
async fn wait_ready(mut ws: WsClient) -> WsClient {
    ws.send(TungsteniteMessage::Ping(b"ready".to_vec().into()))
        .await
        .expect("send ping");

    loop {
        let message = timeout(RECEIVE_TIMEOUT, ws.next())
            .await
            .expect("waiting for pong")
            .expect("stream ended")
            .expect("websocket error");
        if let TungsteniteMessage::Pong(_) = message {
            return ws;
        }
    }
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(TungsteniteMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

pub async fn send_raw(ws: &mut WsClient, text: &str) {
    ws.send(TungsteniteMessage::Text(text.to_owned().into()))
        .await
        .expect("send frame");
}

/// 下一个 JSON 文本帧，跳过控制帧
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(RECEIVE_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("json frame")
            }
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// 连接是否在超时内被服务端关闭
pub async fn closed_by_server(ws: &mut WsClient) -> bool {
    loop {
        match timeout(RECEIVE_TIMEOUT, ws.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(TungsteniteMessage::Close(_)))) => {
                return true
            }
            Ok(Some(Ok(_))) => continue,
        }
    }
}

/// 条件在超时内成立
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
