//! 统一配置中心
//!
//! 加载顺序（后者覆盖前者）：
//! - 内置默认值
//! - `CHAT_CONFIG_FILE` 指向的 YAML / TOML 文件（可选）
//! - `DATABASE_URL`、`REDIS_URL` 这两个约定俗成的环境变量
//! - `CHAT_` 前缀的环境变量，`__` 表示嵌套，例如 `CHAT_BROKER__URL`

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const CONFIG_FILE_ENV: &str = "CHAT_CONFIG_FILE";
pub const ENV_PREFIX: &str = "CHAT_";
/// 保留期上限：十年，与 `ChatConfig::retention_hours` 的校验一致
pub const MAX_RETENTION_HOURS: u32 = 24 * 365 * 10;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub broker: BrokerConfig,
    #[validate(nested)]
    pub chat: ChatConfig,
    #[validate(nested)]
    pub gateway: GatewayConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 数据库配置
///
/// `url` 为空时使用进程内存储，重启后历史丢失。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    /// 启动时执行内置的建表迁移
    #[serde(default)]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    Redis,
    Memory,
}

/// 消息 broker 配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    #[serde(default)]
    pub url: String,
    #[validate(length(min = 1))]
    pub exchange: String,
    #[validate(length(min = 1))]
    pub queue: String,
    #[validate(length(min = 1))]
    pub routing_key: String,
    /// 本实例的消费者名，为空时使用启动时生成的实例 id；
    /// 固定名字可以让重启后的实例接着消费未确认的事件
    #[serde(default)]
    pub consumer_name: String,
    /// stream 近似保留的最大条数
    #[validate(range(min = 1))]
    pub stream_max_len: usize,
    #[validate(range(min = 1))]
    pub publish_timeout_ms: u64,
    /// 重连退避的初始间隔
    #[validate(range(min = 1))]
    pub reconnect_interval_ms: u64,
}

impl BrokerConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// 历史保留配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatConfig {
    #[validate(range(min = 1, max = 87_600))]
    pub retention_hours: u32,
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,
}

impl ChatConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// 实时连接配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    #[validate(range(min = 1))]
    pub send_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub broadcast_capacity: usize,
    /// 连接未发送 LEAVE 就断开时，是否按 LEAVE 处理
    #[serde(default)]
    pub leave_on_disconnect: bool,
}

impl GatewayConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                run_migrations: false,
            },
            broker: BrokerConfig {
                backend: BrokerBackend::Redis,
                url: "redis://127.0.0.1:6379".into(),
                exchange: "chat.exchange".into(),
                queue: "chat.queue".into(),
                routing_key: "chat.message".into(),
                consumer_name: String::new(),
                stream_max_len: 10_000,
                publish_timeout_ms: 3000,
                reconnect_interval_ms: 500,
            },
            chat: ChatConfig {
                retention_hours: 24,
                sweep_interval_secs: 3600,
            },
            gateway: GatewayConfig {
                send_timeout_ms: 5000,
                broadcast_capacity: 1024,
                leave_on_disconnect: false,
            },
        }
    }
}

impl AppConfig {
    /// 从默认值、配置文件和环境变量加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// 组装各层配置源，尚未解析
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }

        fig.merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "broker.url".into()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.check()?;
        Ok(cfg)
    }

    /// 字段校验之外的组合约束
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.broker.backend == BrokerBackend::Redis && self.broker.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "broker.url is required when broker.backend is redis".into(),
            ));
        }
        if self.database.run_migrations && self.database.is_in_memory() {
            return Err(ConfigError::Invalid(
                "database.run_migrations requires database.url".into(),
            ));
        }
        Ok(())
    }
}

/// 去掉 URL 中的用户名和密码，用于日志输出
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://[REDACTED]@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_owned(),
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
