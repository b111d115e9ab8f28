//! 主应用程序入口
//!
//! 加载配置、按配置组装存储和 broker，启动保留期清理、broker 消费和 Web 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    ChatService, ChatServiceDependencies, Clock, EventBroker, LiveEventHub, PresenceTracker,
    RetentionSweeper, SystemClock,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use web_api::{router, AppState, GatewaySettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    let instance_id = Uuid::new_v4().to_string();
    tracing::info!(
        instance_id = %instance_id,
        address = %config.server.address(),
        broker = ?config.broker.backend,
        in_memory_store = config.database.is_in_memory(),
        "聊天中继启动中"
    );

    let infrastructure = Infrastructure::connect(
        &config.database,
        &config.broker,
        config.gateway.broadcast_capacity,
        &instance_id,
    )
    .await
    .context("初始化存储或 broker 失败")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let retention = chrono::Duration::hours(i64::from(config.chat.retention_hours));

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        repository: infrastructure.repository.clone(),
        broker: infrastructure.broker.clone(),
        clock: clock.clone(),
        history_window: retention,
    }));
    let presence = Arc::new(PresenceTracker::new());
    let hub = LiveEventHub::new(config.gateway.broadcast_capacity);

    let shutdown = CancellationToken::new();

    let sweeper = RetentionSweeper::new(
        infrastructure.repository.clone(),
        clock,
        retention,
        config.chat.sweep_interval(),
    )
    .spawn(shutdown.clone());
    let consumer = infrastructure
        .broker
        .on_receive(Arc::new(hub.clone()), shutdown.clone());

    let state = AppState::new(
        chat_service,
        presence,
        hub,
        GatewaySettings::from(&config.gateway),
        instance_id,
    );

    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .with_context(|| format!("监听 {} 失败", config.server.address()))?;
    tracing::info!("聊天中继已启动在 http://{}", config.server.address());

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!(error = %err, "保留期清理任务异常退出");
    }
    if let Err(err) = consumer.await {
        tracing::warn!(error = %err, "broker 消费任务异常退出");
    }

    tracing::info!("聊天中继已停止");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "无法监听 Ctrl+C 信号");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig_term) => {
                sig_term.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "无法监听终止信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("接收到 Ctrl+C 信号，开始优雅停机..."),
        _ = terminate => tracing::info!("接收到终止信号，开始优雅停机..."),
    }
}
