use chrono::Duration;
use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::broker::BrokerError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 事件校验失败，不会被持久化
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] DomainError),
    /// 持久化或查询失败，不会自动重试
    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
    /// 发布失败；之前成功的持久化不会回滚
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),
    /// 时间窗口超出可表示的时间范围
    #[error("time window {0} is out of range")]
    WindowOutOfRange(Duration),
}
