//! 会话性能指标
//!
//! 零开销的原子计数器，用于监控接收链路健康状态。
//! 所有计数器都可以在任何线程安全地读取，不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 会话实时指标
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// 传输层交付的总帧数（包括畸形帧）
    pub rx_frames_total: AtomicU64,
    /// 成功解码并写入缓存的状态广播数
    pub rx_telemetry: AtomicU64,
    /// 分发的事件数
    pub rx_events: AtomicU64,
    /// 收到的指令应答数
    pub rx_responses: AtomicU64,
    /// 丢弃的畸形帧数（解码失败，错误码 -3）
    pub rx_malformed: AtomicU64,
    /// 被推送配置过滤掉的残留广播数
    pub rx_ignored: AtomicU64,
    /// 接收超时次数（正常现象，无数据时会超时）
    pub rx_timeouts: AtomicU64,
    /// 发送的总帧数
    pub tx_frames_total: AtomicU64,
    /// 未在时限内收到应答的请求数
    pub requests_timed_out: AtomicU64,
    /// 非致命传输错误次数
    pub transport_errors: AtomicU64,
    /// 链路丢失次数
    pub link_losses: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取指标快照
    ///
    /// 各计数器分别原子读取，计数器之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames_total: self.rx_frames_total.load(Ordering::Relaxed),
            rx_telemetry: self.rx_telemetry.load(Ordering::Relaxed),
            rx_events: self.rx_events.load(Ordering::Relaxed),
            rx_responses: self.rx_responses.load(Ordering::Relaxed),
            rx_malformed: self.rx_malformed.load(Ordering::Relaxed),
            rx_ignored: self.rx_ignored.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            tx_frames_total: self.tx_frames_total.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            link_losses: self.link_losses.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.rx_frames_total,
            &self.rx_telemetry,
            &self.rx_events,
            &self.rx_responses,
            &self.rx_malformed,
            &self.rx_ignored,
            &self.rx_timeouts,
            &self.tx_frames_total,
            &self.requests_timed_out,
            &self.transport_errors,
            &self.link_losses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_frames_total: u64,
    pub rx_telemetry: u64,
    pub rx_events: u64,
    pub rx_responses: u64,
    pub rx_malformed: u64,
    pub rx_ignored: u64,
    pub rx_timeouts: u64,
    pub tx_frames_total: u64,
    pub requests_timed_out: u64,
    pub transport_errors: u64,
    pub link_losses: u64,
}

impl MetricsSnapshot {
    /// 畸形帧比例（百分比），`rx_frames_total` 为 0 时返回 0.0
    pub fn malformed_rate(&self) -> f64 {
        if self.rx_frames_total == 0 {
            return 0.0;
        }
        (self.rx_malformed as f64 / self.rx_frames_total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = SessionMetrics::new();
        SessionMetrics::bump(&metrics.rx_frames_total);
        SessionMetrics::bump(&metrics.rx_frames_total);
        SessionMetrics::bump(&metrics.rx_malformed);

        let snap = metrics.snapshot();
        assert_eq!(snap.rx_frames_total, 2);
        assert_eq!(snap.rx_malformed, 1);
        assert!((snap.malformed_rate() - 50.0).abs() < f64::EPSILON);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_malformed_rate_empty() {
        assert_eq!(MetricsSnapshot::default().malformed_rate(), 0.0);
    }
}
