//! 应用层实现。
//!
//! 这里提供围绕聊天事件的用例服务：持久化、经 broker 发布、在线状态、
//! 本地广播以及历史保留清理，并定义对外部适配器（存储、broker）的抽象。

pub mod broadcaster;
pub mod broker;
pub mod clock;
pub mod dto;
pub mod error;
pub mod memory;
pub mod presence;
pub mod repository;
pub mod retention;
pub mod sequencer;
pub mod services;

pub use broadcaster::{EventStream, LiveEventHub};
pub use broker::{BrokerError, EventBroker, EventHandler};
pub use clock::{Clock, SystemClock};
pub use dto::{ChatEventDto, ChatStatsDto};
pub use error::ApplicationError;
pub use memory::{InMemoryChatEventRepository, InProcessEventBroker};
pub use presence::PresenceTracker;
pub use repository::ChatEventRepository;
pub use retention::RetentionSweeper;
pub use sequencer::TimestampSequencer;
pub use services::{ChatService, ChatServiceDependencies};
