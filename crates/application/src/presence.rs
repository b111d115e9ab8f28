use std::collections::BTreeSet;

use dashmap::DashSet;

/// 在线用户集合
///
/// 从 JOIN 到 LEAVE 之间用户在线。内部是分片的并发集合，
/// 多个连接任务可以同时读写，不需要外部加锁。
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: DashSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回用户此前是否不在线；重复添加不改变集合
    pub fn add(&self, username: &str) -> bool {
        let inserted = self.users.insert(username.to_owned());
        if inserted {
            tracing::info!(username, online = self.users.len(), "用户上线");
        }
        inserted
    }

    /// 返回用户此前是否在线；重复移除不改变集合
    pub fn remove(&self, username: &str) -> bool {
        let removed = self.users.remove(username).is_some();
        if removed {
            tracing::info!(username, online = self.users.len(), "用户下线");
        }
        removed
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.users.contains(username)
    }

    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// 某一时刻的拷贝，之后的修改不会影响返回值
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.users.iter().map(|user| user.key().clone()).collect()
    }
}
