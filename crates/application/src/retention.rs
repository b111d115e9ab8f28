use std::{sync::Arc, time::Duration as StdDuration};

use chrono::Duration;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{clock::Clock, error::ApplicationError, repository::ChatEventRepository};

/// 保留期清理任务
///
/// 周期性删除早于 `now - retention` 的事件。单次失败只记录日志，不会让任务退出。
pub struct RetentionSweeper {
    repository: Arc<dyn ChatEventRepository>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    period: StdDuration,
}

impl RetentionSweeper {
    pub fn new(
        repository: Arc<dyn ChatEventRepository>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        period: StdDuration,
    ) -> Self {
        Self {
            repository,
            clock,
            retention,
            period,
        }
    }

    pub async fn sweep_once(&self) -> Result<u64, ApplicationError> {
        let cutoff = self
            .clock
            .window_start(self.retention)
            .ok_or(ApplicationError::WindowOutOfRange(self.retention))?;
        let deleted = self.repository.delete_older_than(cutoff).await?;
        tracing::info!(%cutoff, deleted, "保留期清理完成");
        Ok(deleted)
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            retention_hours = self.retention.num_hours(),
            period_secs = self.period.as_secs(),
            "保留期清理任务已启动"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("保留期清理任务已停止");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = %err, "保留期清理失败，等待下一周期");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, memory::InMemoryChatEventRepository, repository::MockChatEventRepository};
    use chrono::Utc;
    use domain::{NewChatEvent, RepositoryError};

    fn sweeper(repository: Arc<dyn ChatEventRepository>, period: StdDuration) -> RetentionSweeper {
        RetentionSweeper::new(repository, Arc::new(SystemClock), Duration::hours(24), period)
    }

    #[tokio::test]
    async fn expired_events_are_removed_once() {
        let repository = Arc::new(InMemoryChatEventRepository::new());
        let now = Utc::now();
        repository
            .append(NewChatEvent::chat("Ann", "old").unwrap().accept(now - Duration::hours(25)))
            .await
            .unwrap();
        repository
            .append(NewChatEvent::chat("Ann", "fresh").unwrap().accept(now - Duration::hours(1)))
            .await
            .unwrap();

        let sweeper = sweeper(repository.clone(), StdDuration::from_secs(3600));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        // 第二次清理没有可删除的事件
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        let remaining = repository.query_since(now - Duration::hours(48)).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event.content.as_str(), "fresh");
        assert_eq!(repository.count_since(now - Duration::hours(48)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_loop() {
        let mut repository = MockChatEventRepository::new();
        let mut calls = 0;
        repository
            .expect_delete_older_than()
            .times(2..)
            .returning(move |_| {
                calls += 1;
                if calls == 1 {
                    Err(RepositoryError::storage("connection reset"))
                } else {
                    Ok(0)
                }
            });

        let shutdown = CancellationToken::new();
        let handle = sweeper(Arc::new(repository), StdDuration::from_millis(10))
            .spawn(shutdown.clone());

        tokio::time::sleep(StdDuration::from_millis(80)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_retention_fails_without_panicking() {
        let mut repository = MockChatEventRepository::new();
        repository.expect_delete_older_than().times(0);
        let sweeper = RetentionSweeper::new(
            Arc::new(repository),
            Arc::new(SystemClock),
            Duration::hours(3_000_000_000),
            StdDuration::from_millis(10),
        );

        assert!(matches!(
            sweeper.sweep_once().await,
            Err(ApplicationError::WindowOutOfRange(_))
        ));

        let shutdown = CancellationToken::new();
        let handle = sweeper.spawn(shutdown.clone());
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!handle.is_finished());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_task() {
        let repository = Arc::new(InMemoryChatEventRepository::new());
        let shutdown = CancellationToken::new();
        let handle = sweeper(repository, StdDuration::from_secs(3600)).spawn(shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("sweeper should stop after cancellation")
            .unwrap();
    }
}
