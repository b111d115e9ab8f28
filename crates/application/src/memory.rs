//! 进程内的存储与 broker 实现
//!
//! 单实例部署和测试使用：没有数据库时事件保存在内存里，
//! broker 退化为一个广播通道，发布即投递给本进程的消费者。

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use async_trait::async_trait;
use domain::{ChatEvent, EventId, EventKind, RepositoryError, StoredChatEvent, Timestamp};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        RwLock,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{BrokerError, EventBroker, EventHandler},
    repository::ChatEventRepository,
};

#[derive(Debug, Default)]
pub struct InMemoryChatEventRepository {
    events: RwLock<Vec<StoredChatEvent>>,
    next_id: AtomicI64,
}

impl InMemoryChatEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatEventRepository for InMemoryChatEventRepository {
    async fn append(&self, event: ChatEvent) -> Result<StoredChatEvent, RepositoryError> {
        let id = EventId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let stored = StoredChatEvent { id, event };

        let mut events = self.events.write().await;
        // 保持 (timestamp, id) 有序，查询时无需再排序
        let position = events.partition_point(|existing| {
            (existing.event.timestamp, existing.id) <= (stored.event.timestamp, stored.id)
        });
        events.insert(position, stored.clone());
        Ok(stored)
    }

    async fn query_since(&self, since: Timestamp) -> Result<Vec<StoredChatEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|stored| stored.event.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn count_since(&self, since: Timestamp) -> Result<u64, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|stored| stored.event.timestamp >= since)
            .count() as u64)
    }

    async fn count_kind_since(
        &self,
        since: Timestamp,
        kind: EventKind,
    ) -> Result<u64, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|stored| stored.event.timestamp >= since && stored.event.kind == kind)
            .count() as u64)
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> Result<u64, RepositoryError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|stored| stored.event.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

/// 单进程 broker
#[derive(Clone)]
pub struct InProcessEventBroker {
    sender: broadcast::Sender<ChatEvent>,
}

impl InProcessEventBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

#[async_trait]
impl EventBroker for InProcessEventBroker {
    async fn publish(&self, event: &ChatEvent) -> Result<(), BrokerError> {
        // 还没有消费者时事件直接丢弃，与无人订阅的 topic 一致
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn on_receive(
        &self,
        handler: Arc<dyn EventHandler>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        // 在 spawn 之前订阅，返回之后发布的事件都不会漏掉
        let mut receiver = self.sender.subscribe();

        tokio::spawn(async move {
            tracing::info!("进程内事件消费已启动");
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => handler.handle(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "事件消费过慢，跳过了部分事件");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::info!("进程内事件消费已停止");
        })
    }
}
