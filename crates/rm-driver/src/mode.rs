//! 线程模式与链路状态定义
//!
//! 线程模式在会话创建时确定，运行期间不可切换；
//! 链路状态由接收线程 / 监控线程写入，任意线程读取。

use std::sync::atomic::{AtomicU8, Ordering};

/// 会话线程模式
///
/// 三种模式是严格的包含关系：
///
/// - **Single**: 无后台线程，调用方通过 `poll()` 或阻塞式请求驱动接收
/// - **Dual**: 增加一个接收线程，持续把广播与事件写入缓存/分发器
/// - **Triple**: 再增加一个链路监控线程，独立于解码错误报告链路存活状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum ThreadMode {
    Single = 0,
    #[default]
    Dual = 1,
    Triple = 2,
}

impl ThreadMode {
    /// 该模式启动的后台线程数
    pub fn background_threads(self) -> usize {
        match self {
            ThreadMode::Single => 0,
            ThreadMode::Dual => 1,
            ThreadMode::Triple => 2,
        }
    }

    pub fn has_receiver_thread(self) -> bool {
        self != ThreadMode::Single
    }

    pub fn has_link_monitor(self) -> bool {
        self == ThreadMode::Triple
    }
}

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LinkState {
    /// 链路正常
    #[default]
    Up = 0,
    /// 链路丢失（传输层致命错误或超时未收到任何数据）
    Lost = 1,
    /// 会话已关闭
    Closed = 2,
}

impl LinkState {
    /// 从 u8 转换，无效值视为 Lost
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Up,
            2 => Self::Closed,
            _ => Self::Lost,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_up(self) -> bool {
        self == Self::Up
    }
}

/// 链路状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicLinkState {
    inner: AtomicU8,
}

impl AtomicLinkState {
    pub fn new(state: LinkState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> LinkState {
        LinkState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: LinkState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// 仅当当前状态为 `current` 时切换到 `new`，返回是否切换成功
    pub fn transition(&self, current: LinkState, new: LinkState) -> bool {
        self.inner
            .compare_exchange(
                current.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for AtomicLinkState {
    fn default() -> Self {
        Self::new(LinkState::Up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_mode_superset() {
        assert_eq!(ThreadMode::Single.background_threads(), 0);
        assert_eq!(ThreadMode::Dual.background_threads(), 1);
        assert_eq!(ThreadMode::Triple.background_threads(), 2);
        assert!(!ThreadMode::Single.has_receiver_thread());
        assert!(ThreadMode::Dual.has_receiver_thread() && !ThreadMode::Dual.has_link_monitor());
        assert!(ThreadMode::Triple.has_receiver_thread() && ThreadMode::Triple.has_link_monitor());
    }

    #[test]
    fn test_link_state_from_u8() {
        assert_eq!(LinkState::from_u8(0), LinkState::Up);
        assert_eq!(LinkState::from_u8(1), LinkState::Lost);
        assert_eq!(LinkState::from_u8(2), LinkState::Closed);
        assert_eq!(LinkState::from_u8(99), LinkState::Lost);
    }

    #[test]
    fn test_atomic_link_state_transition() {
        let state = AtomicLinkState::default();
        assert!(state.transition(LinkState::Up, LinkState::Lost));
        assert!(!state.transition(LinkState::Up, LinkState::Lost));
        assert_eq!(state.get(Ordering::Acquire), LinkState::Lost);
        state.set(LinkState::Closed, Ordering::Release);
        assert_eq!(state.get(Ordering::Acquire), LinkState::Closed);
    }
}
