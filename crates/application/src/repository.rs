use async_trait::async_trait;
use domain::{ChatEvent, EventKind, RepositoryError, StoredChatEvent, Timestamp};

/// 聊天事件的持久化日志。
///
/// 只追加：不提供单条事件的修改或删除，唯一的删除入口是保留期清理。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatEventRepository: Send + Sync {
    // 返回前必须已经落盘，序号由存储分配
    async fn append(&self, event: ChatEvent) -> Result<StoredChatEvent, RepositoryError>;

    // 时间戳 >= since 的事件，按时间戳、序号升序
    async fn query_since(&self, since: Timestamp) -> Result<Vec<StoredChatEvent>, RepositoryError>;

    async fn count_since(&self, since: Timestamp) -> Result<u64, RepositoryError>;

    async fn count_kind_since(
        &self,
        since: Timestamp,
        kind: EventKind,
    ) -> Result<u64, RepositoryError>;

    // 删除时间戳严格早于 cutoff 的事件，重复调用是幂等的
    async fn delete_older_than(&self, cutoff: Timestamp) -> Result<u64, RepositoryError>;
}
