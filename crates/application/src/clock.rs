use chrono::Duration;
use domain::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// `now - window`，超出可表示的时间范围时返回 `None`
    fn window_start(&self, window: Duration) -> Option<Timestamp> {
        self.now().checked_sub_signed(window)
    }
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}
