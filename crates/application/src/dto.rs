use std::collections::BTreeSet;

use domain::{ChatEvent, DomainError, EventKind, NewChatEvent, Timestamp};
use serde::{Deserialize, Serialize};

/// 客户端可见的事件格式
///
/// 入站时 `timestamp` 即使被客户端填写也会被忽略，由服务端分配。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatEventDto {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl ChatEventDto {
    /// 转换为聊天事件并校验
    ///
    /// `type` 可以省略；JOIN 和 LEAVE 只能由加入、离开操作生成，客户端直接提交会被拒绝。
    pub fn into_chat_event(self) -> Result<NewChatEvent, DomainError> {
        if let Some(tag) = self.kind.as_deref() {
            let kind: EventKind = tag.parse()?;
            if kind != EventKind::Chat {
                return Err(DomainError::invalid_argument(
                    "type",
                    format!("{kind} events cannot be sent directly"),
                ));
            }
        }
        NewChatEvent::chat(self.username, self.content)
    }
}

impl From<&ChatEvent> for ChatEventDto {
    fn from(event: &ChatEvent) -> Self {
        Self {
            username: event.username.as_str().to_owned(),
            content: event.content.as_str().to_owned(),
            kind: Some(event.kind.as_str().to_owned()),
            timestamp: Some(event.timestamp),
        }
    }
}

impl From<ChatEvent> for ChatEventDto {
    fn from(event: ChatEvent) -> Self {
        Self::from(&event)
    }
}

/// 管理端只读统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStatsDto {
    pub instance_id: String,
    pub online_users: usize,
    pub active_usernames: BTreeSet<String>,
    pub messages_in_window: u64,
    pub chat_messages_in_window: u64,
}
