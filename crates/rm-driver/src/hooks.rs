//! 回调注册表
//!
//! 每个会话持有一个 [`HandlerRegistry`]，每类回调只有一个槽位，后注册者覆盖先注册者。
//!
//! # 执行约束
//!
//! - 回调在接收线程（Dual/Triple）或调用方的 `poll()` 内（Single）同步执行，
//!   慢回调会阻塞后续帧的接收，回调内不得阻塞
//! - 回调执行期间持有注册表读锁，回调内**不得**注册/清除回调或关闭会话，否则死锁
//! - [`HandlerRegistry::close`] 获取写锁，会等待正在执行的回调返回；
//!   `close` 返回之后不会再有任何回调被调用

use std::sync::Arc;

use parking_lot::RwLock;
use rm_protocol::{DecodeError, EventPush};
use tracing::debug;

use crate::session::ArmHandle;
use crate::state::TelemetrySnapshot;

/// 事件回调（轨迹到位 / 在线程序运行结束）
pub trait EventHandler: Send + Sync {
    fn on_event(&self, handle: ArmHandle, event: &EventPush);
}

/// 遥测回调，每帧被接受的广播调用一次
pub trait TelemetryHandler: Send + Sync {
    fn on_telemetry(&self, handle: ArmHandle, snapshot: &TelemetrySnapshot);
}

/// 诊断回调，每个被丢弃的畸形帧调用一次
pub trait DiagnosticHandler: Send + Sync {
    fn on_malformed(&self, handle: ArmHandle, error: &DecodeError, frame_len: usize);
}

/// 链路丢失原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLossReason {
    /// 传输层报告致命错误
    TransportClosed,
    /// 超时未收到任何帧
    Silence { elapsed_ms: u64 },
}

/// 链路事件（Triple 模式由监控线程产生）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Lost { reason: LinkLossReason },
    Restored,
}

/// 链路事件回调
pub trait LinkHandler: Send + Sync {
    fn on_link_event(&self, handle: ArmHandle, event: &LinkEvent);
}

impl<F> EventHandler for F
where
    F: Fn(ArmHandle, &EventPush) + Send + Sync,
{
    fn on_event(&self, handle: ArmHandle, event: &EventPush) {
        self(handle, event)
    }
}

impl<F> TelemetryHandler for F
where
    F: Fn(ArmHandle, &TelemetrySnapshot) + Send + Sync,
{
    fn on_telemetry(&self, handle: ArmHandle, snapshot: &TelemetrySnapshot) {
        self(handle, snapshot)
    }
}

impl<F> DiagnosticHandler for F
where
    F: Fn(ArmHandle, &DecodeError, usize) + Send + Sync,
{
    fn on_malformed(&self, handle: ArmHandle, error: &DecodeError, frame_len: usize) {
        self(handle, error, frame_len)
    }
}

impl<F> LinkHandler for F
where
    F: Fn(ArmHandle, &LinkEvent) + Send + Sync,
{
    fn on_link_event(&self, handle: ArmHandle, event: &LinkEvent) {
        self(handle, event)
    }
}

#[derive(Default)]
struct Slots {
    closed: bool,
    event: Option<Arc<dyn EventHandler>>,
    telemetry: Option<Arc<dyn TelemetryHandler>>,
    diagnostic: Option<Arc<dyn DiagnosticHandler>>,
    link: Option<Arc<dyn LinkHandler>>,
}

/// 会话级回调注册表
#[derive(Default)]
pub struct HandlerRegistry {
    slots: RwLock<Slots>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册事件回调，返回被替换的旧回调
    ///
    /// 注册表关闭后注册无效，返回 `None`。
    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) -> Option<Arc<dyn EventHandler>> {
        let mut slots = self.slots.write();
        if slots.closed {
            debug!("Ignoring event handler registration on closed session");
            return None;
        }
        slots.event.replace(handler)
    }

    pub fn set_telemetry_handler(
        &self,
        handler: Arc<dyn TelemetryHandler>,
    ) -> Option<Arc<dyn TelemetryHandler>> {
        let mut slots = self.slots.write();
        if slots.closed {
            return None;
        }
        slots.telemetry.replace(handler)
    }

    pub fn set_diagnostic_handler(
        &self,
        handler: Arc<dyn DiagnosticHandler>,
    ) -> Option<Arc<dyn DiagnosticHandler>> {
        let mut slots = self.slots.write();
        if slots.closed {
            return None;
        }
        slots.diagnostic.replace(handler)
    }

    pub fn set_link_handler(&self, handler: Arc<dyn LinkHandler>) -> Option<Arc<dyn LinkHandler>> {
        let mut slots = self.slots.write();
        if slots.closed {
            return None;
        }
        slots.link.replace(handler)
    }

    /// 清除所有回调（注册表仍可继续注册）
    pub fn clear(&self) {
        let mut slots = self.slots.write();
        slots.event = None;
        slots.telemetry = None;
        slots.diagnostic = None;
        slots.link = None;
    }

    /// 关闭注册表：清除所有回调并拒绝后续注册与分发
    ///
    /// 阻塞直到正在执行的回调返回。
    pub fn close(&self) {
        let mut slots = self.slots.write();
        slots.closed = true;
        slots.event = None;
        slots.telemetry = None;
        slots.diagnostic = None;
        slots.link = None;
    }

    pub fn is_closed(&self) -> bool {
        self.slots.read().closed
    }

    /// 分发事件，返回是否调用了回调
    pub fn dispatch_event(&self, handle: ArmHandle, event: &EventPush) -> bool {
        let slots = self.slots.read();
        match &slots.event {
            Some(handler) if !slots.closed => {
                handler.on_event(handle, event);
                true
            },
            _ => false,
        }
    }

    pub fn dispatch_telemetry(&self, handle: ArmHandle, snapshot: &TelemetrySnapshot) -> bool {
        let slots = self.slots.read();
        match &slots.telemetry {
            Some(handler) if !slots.closed => {
                handler.on_telemetry(handle, snapshot);
                true
            },
            _ => false,
        }
    }

    pub fn dispatch_malformed(&self, handle: ArmHandle, error: &DecodeError, frame_len: usize) -> bool {
        let slots = self.slots.read();
        match &slots.diagnostic {
            Some(handler) if !slots.closed => {
                handler.on_malformed(handle, error, frame_len);
                true
            },
            _ => false,
        }
    }

    pub fn dispatch_link(&self, handle: ArmHandle, event: &LinkEvent) -> bool {
        let slots = self.slots.read();
        match &slots.link {
            Some(handler) if !slots.closed => {
                handler.on_link_event(handle, event);
                true
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_handler() -> (Arc<AtomicU32>, Arc<dyn EventHandler>) {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handler: Arc<dyn EventHandler> = Arc::new(move |_: ArmHandle, _: &EventPush| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        let (first, h1) = counting_handler();
        let (second, h2) = counting_handler();

        assert!(registry.set_event_handler(h1).is_none());
        assert!(registry.set_event_handler(h2).is_some());

        let event = EventPush::ProgramFinished { program_id: 3 };
        assert!(registry.dispatch_event(ArmHandle::INVALID, &event));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let registry = HandlerRegistry::new();
        assert!(!registry.dispatch_event(ArmHandle::INVALID, &EventPush::None));
        assert!(!registry.dispatch_link(ArmHandle::INVALID, &LinkEvent::Restored));
    }

    #[test]
    fn test_close_rejects_dispatch_and_registration() {
        let registry = HandlerRegistry::new();
        let (count, handler) = counting_handler();
        registry.set_event_handler(handler.clone());

        registry.close();
        assert!(registry.is_closed());
        assert!(!registry.dispatch_event(ArmHandle::INVALID, &EventPush::None));
        assert!(registry.set_event_handler(handler).is_none());
        assert!(!registry.dispatch_event(ArmHandle::INVALID, &EventPush::None));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_keeps_registry_open() {
        let registry = HandlerRegistry::new();
        let (count, handler) = counting_handler();
        registry.set_event_handler(handler.clone());
        registry.clear();
        assert!(!registry.dispatch_event(ArmHandle::INVALID, &EventPush::None));

        registry.set_event_handler(handler);
        assert!(registry.dispatch_event(ArmHandle::INVALID, &EventPush::None));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_waits_for_running_callback() {
        use std::thread;
        use std::time::{Duration, Instant};

        let registry = Arc::new(HandlerRegistry::new());
        let finished = Arc::new(AtomicU32::new(0));
        let f = finished.clone();
        registry.set_event_handler(Arc::new(move |_: ArmHandle, _: &EventPush| {
            thread::sleep(Duration::from_millis(50));
            f.store(1, Ordering::SeqCst);
        }));

        let r = registry.clone();
        let dispatcher = thread::spawn(move || r.dispatch_event(ArmHandle::INVALID, &EventPush::None));

        // 等待回调开始执行
        thread::sleep(Duration::from_millis(10));
        let start = Instant::now();
        registry.close();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(dispatcher.join().unwrap());
    }
}
