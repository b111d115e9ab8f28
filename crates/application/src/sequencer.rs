use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use chrono::DateTime;
use domain::Timestamp;

use crate::clock::Clock;

/// 事件时间戳分配器
///
/// 以微秒精度分配时间戳，同一实例内单调不减；时钟不回拨时不会超过时钟读数。
/// 同一微秒内的多次发送得到相同的时间戳，先后由存储的自增 id 决定；
/// 时钟回拨期间保持上一次的值，直到时钟追上。
pub struct TimestampSequencer {
    clock: Arc<dyn Clock>,
    last_micros: AtomicI64,
}

impl TimestampSequencer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_micros: AtomicI64::new(i64::MIN),
        }
    }

    pub fn next(&self) -> Timestamp {
        let now = self.clock.now();
        let now_micros = now.timestamp_micros();

        let previous = self.last_micros.fetch_max(now_micros, Ordering::AcqRel);
        let assigned = now_micros.max(previous);

        DateTime::from_timestamp_micros(assigned).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    struct ManualClock(Mutex<Timestamp>);

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn truncates_to_microseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let sequencer = TimestampSequencer::new(Arc::new(ManualClock(Mutex::new(at))));

        let ts = sequencer.next();
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn burst_never_runs_ahead_of_clock() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let sequencer = TimestampSequencer::new(Arc::new(ManualClock(Mutex::new(at))));

        for _ in 0..100 {
            assert_eq!(sequencer.next(), at);
        }
    }

    #[test]
    fn advancing_clock_is_followed() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock(Mutex::new(at)));
        let sequencer = TimestampSequencer::new(clock.clone());

        let first = sequencer.next();
        *clock.0.lock().unwrap() = at + Duration::microseconds(3);
        let second = sequencer.next();
        assert_eq!(second - first, Duration::microseconds(3));
    }

    #[test]
    fn clock_going_backwards_holds_last_value() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock(Mutex::new(at)));
        let sequencer = TimestampSequencer::new(clock.clone());

        let first = sequencer.next();
        *clock.0.lock().unwrap() = at - Duration::seconds(5);
        let second = sequencer.next();
        assert_eq!(second, first);
    }
}
