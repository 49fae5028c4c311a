//! 进度统计与节流

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// 默认进度事件最小间隔
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(25);

/// 进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub file_name: String,
    /// 对端名称（发送时为目标设备名，接收时为发送者名）
    pub counterparty_name: String,
    /// 0–100，四舍五入
    pub percentage: u8,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// 平均速度（字节/秒）
    pub speed: f64,
}

impl ProgressEvent {
    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }
}

/// 计算百分比，空文件视为 100%
pub fn percentage(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (transferred as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// 单个会话的进度跟踪器
///
/// 每 `interval` 至多产生一个事件，传输完成时必定产生且只产生一次最终事件。
#[derive(Debug)]
pub struct ProgressTracker {
    file_name: String,
    counterparty_name: String,
    total: u64,
    transferred: u64,
    interval: Duration,
    started_at: Instant,
    last_emit: Option<Instant>,
    finished: bool,
}

impl ProgressTracker {
    pub fn new(
        file_name: impl Into<String>,
        counterparty_name: impl Into<String>,
        total: u64,
        interval: Duration,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            counterparty_name: counterparty_name.into(),
            total,
            transferred: 0,
            interval,
            started_at: Instant::now(),
            last_emit: None,
            finished: false,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// 记录新传输的字节，必要时返回一个进度事件
    pub fn advance(&mut self, bytes: u64) -> Option<ProgressEvent> {
        self.transferred += bytes;
        self.poll(Instant::now())
    }

    /// 传输结束时调用：如果最终事件尚未发出则补发
    ///
    /// 用于空文件（没有任何数据块）。
    pub fn finish(&mut self) -> Option<ProgressEvent> {
        if self.finished || self.transferred < self.total {
            return None;
        }
        self.emit(Instant::now())
    }

    fn poll(&mut self, now: Instant) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        let complete = self.transferred >= self.total;
        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.interval);

        if complete || due {
            self.emit(now)
        } else {
            None
        }
    }

    fn emit(&mut self, now: Instant) -> Option<ProgressEvent> {
        if self.transferred >= self.total {
            self.finished = true;
        }
        self.last_emit = Some(now);

        let elapsed = now.duration_since(self.started_at).as_secs_f64();
        let speed = if elapsed > 0.0 {
            self.transferred as f64 / elapsed
        } else {
            0.0
        };

        Some(ProgressEvent {
            file_name: self.file_name.clone(),
            counterparty_name: self.counterparty_name.clone(),
            percentage: percentage(self.transferred, self.total),
            bytes_transferred: self.transferred,
            total_bytes: self.total,
            speed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 200), 0);
        assert_eq!(percentage(1, 200), 1); // 0.5 -> 1
        assert_eq!(percentage(199, 200), 100); // 99.5 -> 100
        assert_eq!(percentage(50, 200), 25);
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(300, 200), 100);
    }

    #[test]
    fn test_first_chunk_emits() {
        let mut tracker = ProgressTracker::new("a", "b", 100, Duration::from_secs(3600));
        let event = tracker.advance(10).unwrap();
        assert_eq!(event.bytes_transferred, 10);
        assert_eq!(event.percentage, 10);
    }

    #[test]
    fn test_throttled_between_emits() {
        let mut tracker = ProgressTracker::new("a", "b", 100, Duration::from_secs(3600));
        assert!(tracker.advance(10).is_some());
        assert!(tracker.advance(10).is_none());
        assert!(tracker.advance(10).is_none());
        assert_eq!(tracker.transferred(), 30);
    }

    #[test]
    fn test_final_event_always_emitted_once() {
        let mut tracker = ProgressTracker::new("a", "b", 100, Duration::from_secs(3600));
        assert!(tracker.advance(40).is_some());
        let last = tracker.advance(60).unwrap();
        assert_eq!(last.percentage, 100);
        assert!(last.is_complete());
        assert!(tracker.finish().is_none());
        assert!(tracker.advance(0).is_none());
    }

    #[test]
    fn test_zero_interval_emits_every_chunk() {
        let mut tracker = ProgressTracker::new("a", "b", 30, Duration::ZERO);
        let events: Vec<_> = (0..3).filter_map(|_| tracker.advance(10)).collect();
        assert_eq!(events.len(), 3);
        assert!(
            events
                .windows(2)
                .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred)
        );
        assert_eq!(events.last().unwrap().percentage, 100);
    }

    #[test]
    fn test_empty_file_finish() {
        let mut tracker = ProgressTracker::new("empty", "peer", 0, DEFAULT_PROGRESS_INTERVAL);
        let event = tracker.finish().unwrap();
        assert_eq!(event.percentage, 100);
        assert_eq!(event.total_bytes, 0);
        assert!(tracker.finish().is_none());
    }

    #[test]
    fn test_incomplete_finish_is_silent() {
        let mut tracker = ProgressTracker::new("a", "b", 100, Duration::from_secs(3600));
        tracker.advance(10);
        assert!(tracker.finish().is_none());
    }
}
