//! 基础设施层实现。
//!
//! 提供 PostgreSQL 事件存储、Redis broker 以及按配置组装后端的入口，
//! 实现应用层定义的接口。

pub mod broker;
pub mod builder;
pub mod migrations;
pub mod repository;

pub use broker::{RedisBrokerSettings, RedisEventBroker};
pub use builder::{connect_broker, connect_repository, Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgChatEventRepository};
