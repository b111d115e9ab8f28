//! 聊天事件
//!
//! `NewChatEvent` 是尚未被接受的事件（没有时间戳），`ChatEvent` 是服务端
//! 接受后盖上时间戳、可以发布和广播的事件，`StoredChatEvent` 额外带有存储
//! 分配的序号。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{EventId, MessageContent, Timestamp, Username};

/// 事件类型，运行时不会扩展。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Chat,
    Join,
    Leave,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "CHAT",
            EventKind::Join => "JOIN",
            EventKind::Leave => "LEAVE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CHAT" => Ok(EventKind::Chat),
            "JOIN" => Ok(EventKind::Join),
            "LEAVE" => Ok(EventKind::Leave),
            _ => Err(DomainError::UnknownEventKind(s.to_owned())),
        }
    }
}

/// 等待被接受的事件：已校验，但还没有时间戳和序号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatEvent {
    pub username: Username,
    pub content: MessageContent,
    pub kind: EventKind,
}

impl NewChatEvent {
    pub fn new(
        username: impl Into<String>,
        content: impl Into<String>,
        kind: EventKind,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            username: Username::parse(username)?,
            content: MessageContent::new(content)?,
            kind,
        })
    }

    pub fn chat(username: impl Into<String>, content: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(username, content, EventKind::Chat)
    }

    /// 用户加入时的系统通知，正文由服务端生成。
    pub fn join(username: impl Into<String>) -> Result<Self, DomainError> {
        let username = Username::parse(username)?;
        let content = MessageContent::new(format!("{username} joined the chat"))?;
        Ok(Self {
            username,
            content,
            kind: EventKind::Join,
        })
    }

    /// 用户离开时的系统通知，正文由服务端生成。
    pub fn leave(username: impl Into<String>) -> Result<Self, DomainError> {
        let username = Username::parse(username)?;
        let content = MessageContent::new(format!("{username} left the chat"))?;
        Ok(Self {
            username,
            content,
            kind: EventKind::Leave,
        })
    }

    pub fn accept(self, timestamp: Timestamp) -> ChatEvent {
        ChatEvent {
            username: self.username,
            content: self.content,
            kind: self.kind,
            timestamp,
        }
    }
}

/// 已被接受的事件，也是经由 broker 传输的载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub username: Username,
    pub content: MessageContent,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: Timestamp,
}

impl ChatEvent {
    /// 去重用的自然键。基础设计不做去重，只在需要严格一次显示时使用。
    pub fn natural_key(&self) -> (&str, Timestamp, EventKind) {
        (self.username.as_str(), self.timestamp, self.kind)
    }
}

/// 已持久化的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChatEvent {
    pub id: EventId,
    pub event: ChatEvent,
}

impl StoredChatEvent {
    pub fn into_event(self) -> ChatEvent {
        self.event
    }
}
