//! Broker 抽象
//!
//! 把“产生事件”和“把事件送到连接上”解耦：`publish` 只等待 broker 接收，
//! 每个实例通过 `on_receive` 消费同一条事件流再交给本地连接。

use std::sync::Arc;

use async_trait::async_trait;
use domain::ChatEvent;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl BrokerError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// 每条投递到本实例的事件调用一次。
///
/// 投递语义是至少一次，连接中断后 broker 可能重复投递。
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: ChatEvent);
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// 发布到配置的 exchange / routing key，不等待订阅者投递
    async fn publish(&self, event: &ChatEvent) -> Result<(), BrokerError>;

    /// 启动消费任务，直到 `shutdown` 被取消
    fn on_receive(
        &self,
        handler: Arc<dyn EventHandler>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>;
}
