use std::sync::Arc;

use application::{
    BrokerError, ChatEventRepository, EventBroker, InMemoryChatEventRepository,
    InProcessEventBroker,
};
use config::{redact_url, BrokerBackend, BrokerConfig, DatabaseConfig};
use thiserror::Error;

use crate::{
    broker::{RedisBrokerSettings, RedisEventBroker},
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgChatEventRepository},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// 按配置选择的存储和 broker 后端
#[derive(Clone)]
pub struct Infrastructure {
    pub repository: Arc<dyn ChatEventRepository>,
    pub broker: Arc<dyn EventBroker>,
}

impl Infrastructure {
    pub async fn connect(
        database: &DatabaseConfig,
        broker: &BrokerConfig,
        in_process_capacity: usize,
        instance_id: &str,
    ) -> Result<Self, InfrastructureError> {
        let repository = connect_repository(database).await?;
        let broker = connect_broker(broker, in_process_capacity, instance_id).await?;
        Ok(Self { repository, broker })
    }
}

pub async fn connect_repository(
    config: &DatabaseConfig,
) -> Result<Arc<dyn ChatEventRepository>, InfrastructureError> {
    if config.is_in_memory() {
        tracing::warn!("未配置数据库，使用进程内存储，重启后历史会丢失");
        return Ok(Arc::new(InMemoryChatEventRepository::new()));
    }

    let pool = create_pg_pool(&config.url, config.max_connections).await?;
    if config.run_migrations {
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库迁移已完成");
    }
    tracing::info!(url = %redact_url(&config.url), "已连接 PostgreSQL");

    Ok(Arc::new(PgChatEventRepository::new(pool)))
}

pub async fn connect_broker(
    config: &BrokerConfig,
    in_process_capacity: usize,
    instance_id: &str,
) -> Result<Arc<dyn EventBroker>, InfrastructureError> {
    match config.backend {
        BrokerBackend::Memory => {
            tracing::info!("使用进程内 broker，仅适用于单实例部署");
            Ok(Arc::new(InProcessEventBroker::new(in_process_capacity)))
        }
        BrokerBackend::Redis => {
            let broker = RedisEventBroker::connect(RedisBrokerSettings::from_config(config, instance_id))
                .await?;
            Ok(Arc::new(broker))
        }
    }
}
