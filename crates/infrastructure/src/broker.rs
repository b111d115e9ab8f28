//! 基于 Redis Stream 的事件 broker
//!
//! exchange 和 routing key 组成 stream 名 `<exchange>.<routing_key>`，事件用 `XADD` 追加。
//! 每个实例在该 stream 上拥有自己的消费者组 `<queue>.<consumer>`，因此所有实例都会收到每条事件；
//! 事件处理完才 `XACK`，断线重连后先补投递本消费者未确认的事件，再读取新事件。

use std::{collections::HashMap, sync::Arc, time::Duration};

use application::{BrokerError, EventBroker, EventHandler};
use async_trait::async_trait;
use config::BrokerConfig;
use domain::ChatEvent;
use redis::{
    aio::{ConnectionManager, MultiplexedConnection},
    streams::{StreamId, StreamReadReply},
    Client,
};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const PAYLOAD_FIELD: &str = "payload";
const READ_BATCH_SIZE: usize = 64;
/// 单次 `XREADGROUP` 的阻塞时间（毫秒）
const READ_BLOCK_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct RedisBrokerSettings {
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    /// 本实例在消费者组里的名字，同时区分各实例的消费者组
    pub consumer: String,
    /// stream 近似保留的最大条数
    pub stream_max_len: usize,
    pub publish_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl RedisBrokerSettings {
    /// 未配置 `consumer_name` 时使用实例 id
    pub fn from_config(config: &BrokerConfig, instance_id: &str) -> Self {
        let consumer = match config.consumer_name.trim() {
            "" => instance_id.to_owned(),
            name => name.to_owned(),
        };
        Self {
            url: config.url.clone(),
            exchange: config.exchange.clone(),
            queue: config.queue.clone(),
            routing_key: config.routing_key.clone(),
            consumer,
            stream_max_len: config.stream_max_len,
            publish_timeout: config.publish_timeout(),
            reconnect_interval: config.reconnect_interval(),
        }
    }

    pub fn stream(&self) -> String {
        format!("{}.{}", self.exchange, self.routing_key)
    }

    pub fn group(&self) -> String {
        format!("{}.{}", self.queue, self.consumer)
    }
}

pub struct RedisEventBroker {
    client: Client,
    connection: ConnectionManager,
    settings: RedisBrokerSettings,
}

impl RedisEventBroker {
    pub async fn connect(settings: RedisBrokerSettings) -> Result<Self, BrokerError> {
        let client = Client::open(settings.url.as_str())
            .map_err(|err| BrokerError::unavailable(format!("invalid redis url: {err}")))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|err| BrokerError::unavailable(err.to_string()))?;

        tracing::info!(
            stream = %settings.stream(),
            group = %settings.group(),
            "Redis broker 已连接"
        );

        Ok(Self {
            client,
            connection,
            settings,
        })
    }
}

#[async_trait]
impl EventBroker for RedisEventBroker {
    async fn publish(&self, event: &ChatEvent) -> Result<(), BrokerError> {
        let payload =
            serde_json::to_string(event).map_err(|err| BrokerError::Encode(err.to_string()))?;
        let stream = self.settings.stream();
        let mut connection = self.connection.clone();

        let publish = async {
            let id: redis::RedisResult<String> = redis::cmd("XADD")
                .arg(&stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.settings.stream_max_len)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&payload)
                .query_async(&mut connection)
                .await;
            id
        };

        let id = tokio::time::timeout(self.settings.publish_timeout, publish)
            .await
            .map_err(|_| BrokerError::unavailable("publish timed out"))?
            .map_err(|err| BrokerError::unavailable(err.to_string()))?;

        tracing::debug!(stream = %stream, message_id = %id, "事件已发布");
        Ok(())
    }

    fn on_receive(
        &self,
        handler: Arc<dyn EventHandler>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let consumer = Consumer {
            client: self.client.clone(),
            stream: self.settings.stream(),
            group: self.settings.group(),
            name: self.settings.consumer.clone(),
            reconnect_interval: self.settings.reconnect_interval,
            handler,
        };
        tokio::spawn(consumer.run(shutdown))
    }
}

/// 读取位置：先补投递未确认的事件，补完后只读新事件
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadCursor {
    Pending(String),
    New,
}

impl ReadCursor {
    fn id(&self) -> &str {
        match self {
            ReadCursor::Pending(id) => id,
            ReadCursor::New => ">",
        }
    }

    /// 根据本批最后一条的 id 推进位置
    fn advance(self, last_id: Option<&str>) -> Self {
        match self {
            ReadCursor::Pending(_) => match last_id {
                Some(id) => ReadCursor::Pending(id.to_owned()),
                None => ReadCursor::New,
            },
            ReadCursor::New => ReadCursor::New,
        }
    }
}

struct Consumer {
    client: Client,
    stream: String,
    group: String,
    name: String,
    reconnect_interval: Duration,
    handler: Arc<dyn EventHandler>,
}

impl Consumer {
    /// 只有 shutdown 被取消时才退出
    async fn run(self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            match self.listen(&shutdown, &mut attempt).await {
                Ok(()) => break,
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let delay = reconnect_delay(self.reconnect_interval, attempt);
                    tracing::warn!(
                        group = %self.group,
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "broker 消费中断，稍后重连"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!(group = %self.group, "broker 消费已停止");
    }

    async fn listen(
        &self,
        shutdown: &CancellationToken,
        attempt: &mut u32,
    ) -> Result<(), BrokerError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| BrokerError::unavailable(err.to_string()))?;
        self.ensure_group(&mut conn).await?;

        *attempt = 0;
        tracing::info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.name,
            "broker 消费已启动"
        );

        let mut cursor = ReadCursor::Pending("0".into());
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                batch = self.read(&mut conn, &cursor) => batch?,
            };

            for entry in &batch {
                self.deliver(entry).await;
                self.ack(&mut conn, &entry.id).await?;
            }
            cursor = cursor.advance(batch.last().map(|entry| entry.id.as_str()));
        }
    }

    /// 创建本实例的消费者组；组已存在时沿用其读取进度
    async fn ensure_group(&self, conn: &mut MultiplexedConnection) -> Result<(), BrokerError> {
        // 新组从当前末尾开始，不回放创建之前的历史
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match result {
            Ok(_) => {
                tracing::info!(stream = %self.stream, group = %self.group, "消费者组已创建");
                Ok(())
            }
            Err(err) if err.to_string().contains("BUSYGROUP") => {
                tracing::debug!(stream = %self.stream, group = %self.group, "消费者组已存在");
                Ok(())
            }
            Err(err) => Err(BrokerError::unavailable(err.to_string())),
        }
    }

    async fn read(
        &self,
        conn: &mut MultiplexedConnection,
        cursor: &ReadCursor,
    ) -> Result<Vec<StreamId>, BrokerError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.name)
            .arg("COUNT")
            .arg(READ_BATCH_SIZE);
        if *cursor == ReadCursor::New {
            cmd.arg("BLOCK").arg(READ_BLOCK_MS);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(cursor.id());

        // 阻塞超时返回 nil
        let reply: Option<StreamReadReply> = cmd
            .query_async(conn)
            .await
            .map_err(|err| BrokerError::unavailable(err.to_string()))?;

        Ok(reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default())
    }

    /// 格式错误的事件只记录日志，随后照常确认
    async fn deliver(&self, entry: &StreamId) {
        let Some(payload) = payload_of(&entry.map) else {
            tracing::warn!(group = %self.group, message_id = %entry.id, "消息缺少事件内容，已跳过");
            return;
        };
        match serde_json::from_str::<ChatEvent>(&payload) {
            Ok(event) => self.handler.handle(event).await,
            Err(err) => {
                tracing::warn!(
                    group = %self.group,
                    message_id = %entry.id,
                    error = %err,
                    "格式错误的事件，已跳过"
                );
            }
        }
    }

    async fn ack(&self, conn: &mut MultiplexedConnection, id: &str) -> Result<(), BrokerError> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .query_async(conn)
            .await
            .map_err(|err| BrokerError::unavailable(err.to_string()))?;
        Ok(())
    }
}

fn payload_of(fields: &HashMap<String, redis::Value>) -> Option<String> {
    match fields.get(PAYLOAD_FIELD) {
        Some(redis::Value::BulkString(bytes)) => String::from_utf8(bytes.clone()).ok(),
        Some(redis::Value::SimpleString(text)) => Some(text.clone()),
        _ => None,
    }
}

/// 指数退避，上限 30 秒
fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(MAX_RECONNECT_DELAY)
}
