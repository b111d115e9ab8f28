// 本实例的事件分发中心：broker 投递的事件在这里扇出到所有本地连接
use std::sync::Arc;

use async_trait::async_trait;
use domain::ChatEvent;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::broker::EventHandler;

#[derive(Clone)]
pub struct LiveEventHub {
    sender: broadcast::Sender<Arc<ChatEvent>>,
}

impl LiveEventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 每个连接调用一次，只会收到订阅之后分发的事件
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.sender.subscribe())
    }

    /// 返回收到事件的连接数
    pub fn dispatch(&self, event: ChatEvent) -> usize {
        // 没有订阅者时 send 返回 Err，这不是错误
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }
}

#[async_trait]
impl EventHandler for LiveEventHub {
    async fn handle(&self, event: ChatEvent) {
        let username = event.username.clone();
        let kind = event.kind;
        let delivered = self.dispatch(event);
        tracing::debug!(username = %username, kind = %kind, delivered, "事件已分发到本地连接");
    }
}

/// 单个连接的事件流
pub struct EventStream {
    receiver: broadcast::Receiver<Arc<ChatEvent>>,
}

impl EventStream {
    pub fn new(receiver: broadcast::Receiver<Arc<ChatEvent>>) -> Self {
        Self { receiver }
    }

    /// 落后太多时跳过丢失的事件继续接收；分发中心关闭时返回 None
    pub async fn recv(&mut self) -> Option<Arc<ChatEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "连接消费过慢，跳过了部分事件");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::NewChatEvent;

    fn event(content: &str) -> ChatEvent {
        NewChatEvent::chat("Ann", content).unwrap().accept(Utc::now())
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_event() {
        let hub = LiveEventHub::new(16);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.handle(event("hi")).await;

        assert_eq!(first.recv().await.unwrap().content.as_str(), "hi");
        assert_eq!(second.recv().await.unwrap().content.as_str(), "hi");
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_dropped() {
        let hub = LiveEventHub::new(4);
        assert_eq!(hub.dispatch(event("nobody")), 0);
    }

    #[tokio::test]
    async fn lagging_stream_skips_to_retained_events() {
        let hub = LiveEventHub::new(2);
        let mut stream = hub.subscribe();

        for i in 0..5 {
            hub.dispatch(event(&format!("m{i}")));
        }

        // 容量为 2，只保留最后两条
        assert_eq!(stream.recv().await.unwrap().content.as_str(), "m3");
        assert_eq!(stream.recv().await.unwrap().content.as_str(), "m4");
    }
}
