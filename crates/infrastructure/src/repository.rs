use application::ChatEventRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatEvent, EventId, EventKind, MessageContent, RepositoryError, StoredChatEvent, Timestamp,
    Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[derive(Debug, FromRow)]
struct ChatMessageRecord {
    id: i64,
    username: String,
    content: String,
    timestamp: DateTime<Utc>,
    kind: String,
}

impl TryFrom<ChatMessageRecord> for StoredChatEvent {
    type Error = RepositoryError;

    fn try_from(value: ChatMessageRecord) -> Result<Self, Self::Error> {
        let username = Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let kind: EventKind = value
            .kind
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;

        Ok(StoredChatEvent {
            id: EventId::from(value.id),
            event: ChatEvent {
                username,
                content,
                kind,
                timestamp: value.timestamp,
            },
        })
    }
}

/// `chat_messages` 表上的事件存储
#[derive(Clone)]
pub struct PgChatEventRepository {
    pool: PgPool,
}

impl PgChatEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ChatEventRepository for PgChatEventRepository {
    async fn append(&self, event: ChatEvent) -> Result<StoredChatEvent, RepositoryError> {
        let record = sqlx::query_as::<_, ChatMessageRecord>(
            r#"
            INSERT INTO chat_messages (username, content, "timestamp", "type")
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, content, "timestamp", "type" AS kind
            "#,
        )
        .bind(event.username.as_str())
        .bind(event.content.as_str())
        .bind(event.timestamp)
        .bind(event.kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        StoredChatEvent::try_from(record)
    }

    async fn query_since(&self, since: Timestamp) -> Result<Vec<StoredChatEvent>, RepositoryError> {
        let records = sqlx::query_as::<_, ChatMessageRecord>(
            r#"
            SELECT id, username, content, "timestamp", "type" AS kind
            FROM chat_messages
            WHERE "timestamp" >= $1
            ORDER BY "timestamp" ASC, id ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(StoredChatEvent::try_from).collect()
    }

    async fn count_since(&self, since: Timestamp) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM chat_messages WHERE "timestamp" >= $1"#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(to_count(count))
    }

    async fn count_kind_since(
        &self,
        since: Timestamp,
        kind: EventKind,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM chat_messages WHERE "timestamp" >= $1 AND "type" = $2"#,
        )
        .bind(since)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(to_count(count))
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> Result<u64, RepositoryError> {
        let result = sqlx::query(r#"DELETE FROM chat_messages WHERE "timestamp" < $1"#)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
