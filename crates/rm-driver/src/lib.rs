//! 驱动层模块
//!
//! 本模块提供 RM 机械臂控制器的会话管理功能，包括：
//! - 会话生命周期与线程模式（单线程 / 双线程 / 三线程）
//! - 状态同步（ArcSwap 无锁读取，整帧替换）
//! - 畸形帧隔离（计数 + 诊断回调，不中断接收）
//! - 指令/应答关联（按 `seq` 投递）
//! - 回调注册表：事件、遥测、诊断、链路
//!
//! # 使用场景
//!
//! 适用于需要直接收发控制器报文、需要高性能状态读取的场景。
//! 在线程序跟踪与点位目录由 `rm-client` 提供。

mod builder;
pub mod command;
mod error;
pub mod heartbeat;
pub mod hooks;
pub mod metrics;
pub mod mode;
pub mod pipeline;
mod session;
pub mod state;

pub use builder::{DEFAULT_CONTROLLER_PORT, SessionBuilder};
pub use command::{PendingRequests, Response};
pub use error::DriverError;
pub use heartbeat::ConnectionMonitor;
pub use hooks::{
    DiagnosticHandler, EventHandler, HandlerRegistry, LinkEvent, LinkHandler, LinkLossReason,
    TelemetryHandler,
};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use mode::{AtomicLinkState, LinkState, ThreadMode};
pub use pipeline::{FrameOutcome, PipelineConfig, monitor_loop, process_frame, rx_loop};
pub use session::{ArmHandle, Session, SessionConfig};
pub use state::*;
