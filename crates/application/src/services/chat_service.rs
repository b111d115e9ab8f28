use std::sync::Arc;

use chrono::Duration;
use domain::{ChatEvent, EventKind, NewChatEvent, Timestamp};

use crate::{
    broker::EventBroker, clock::Clock, error::ApplicationError,
    repository::ChatEventRepository, sequencer::TimestampSequencer,
};

pub struct ChatServiceDependencies {
    pub repository: Arc<dyn ChatEventRepository>,
    pub broker: Arc<dyn EventBroker>,
    pub clock: Arc<dyn Clock>,
    /// 最近历史的时间窗口
    pub history_window: Duration,
}

/// 事件分发服务
///
/// 唯一决定持久化和发布的地方。发送顺序是先持久化再发布，两步之间没有事务：
/// 持久化成功而发布失败时，事件留在历史中但不会实时广播。
pub struct ChatService {
    deps: ChatServiceDependencies,
    sequencer: TimestampSequencer,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        let sequencer = TimestampSequencer::new(deps.clock.clone());
        Self { deps, sequencer }
    }

    pub fn history_window(&self) -> Duration {
        self.deps.history_window
    }

    pub async fn send(&self, event: NewChatEvent) -> Result<ChatEvent, ApplicationError> {
        let accepted = event.accept(self.sequencer.next());

        let stored = self.deps.repository.append(accepted).await?;
        tracing::info!(
            event_id = %stored.id,
            username = %stored.event.username,
            kind = %stored.event.kind,
            "事件已持久化"
        );

        if let Err(err) = self.deps.broker.publish(&stored.event).await {
            tracing::warn!(
                event_id = %stored.id,
                error = %err,
                "事件已持久化但发布失败，实时连接不会收到"
            );
            return Err(err.into());
        }

        Ok(stored.into_event())
    }

    /// 时间窗口内的事件，按时间升序
    pub async fn recent(&self, window: Duration) -> Result<Vec<ChatEvent>, ApplicationError> {
        self.since(self.window_start(window)?).await
    }

    /// 时间戳 >= since 的所有事件，没有上界
    pub async fn since(&self, since: Timestamp) -> Result<Vec<ChatEvent>, ApplicationError> {
        let events = self.deps.repository.query_since(since).await?;
        Ok(events.into_iter().map(|stored| stored.into_event()).collect())
    }

    pub async fn count(&self, window: Duration) -> Result<u64, ApplicationError> {
        let count = self
            .deps
            .repository
            .count_since(self.window_start(window)?)
            .await?;
        Ok(count)
    }

    pub async fn count_chat(&self, window: Duration) -> Result<u64, ApplicationError> {
        let count = self
            .deps
            .repository
            .count_kind_since(self.window_start(window)?, EventKind::Chat)
            .await?;
        Ok(count)
    }

    fn window_start(&self, window: Duration) -> Result<Timestamp, ApplicationError> {
        self.deps
            .clock
            .window_start(window)
            .ok_or(ApplicationError::WindowOutOfRange(window))
    }
}
