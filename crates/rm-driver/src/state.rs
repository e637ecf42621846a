//! 状态缓存模块
//!
//! 接收线程是遥测字段的唯一写者：每帧合法广播整体替换一次快照
//! （last-writer-wins，不做字段合并），读者通过 `ArcSwap::load`
//! 无锁读取，返回值拷贝，永远看不到撕裂的半帧。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use rm_protocol::{ARM_DOF, ForceSample, JointState, Pose, RealtimeArmState, RealtimePushConfig};

use crate::command::PendingRequests;
use crate::heartbeat::ConnectionMonitor;
use crate::hooks::HandlerRegistry;
use crate::metrics::SessionMetrics;
use crate::mode::{AtomicLinkState, LinkState};
use crate::session::ArmHandle;

/// 机械臂状态快照
///
/// `sequence` 从 1 开始单调递增（会话内），0 表示尚未收到任何广播。
/// 调用方需要"不漏帧"语义时应比较 `sequence`，而不是假设每帧都能被观察到。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArmState {
    pub sequence: u64,
    /// 接收时的单调时间戳（微秒，相对进程启动）
    pub system_timestamp_us: u64,
    pub arm_ip: String,
    pub arm_err: u16,
    pub sys_err: u16,
    pub joints: [JointState; ARM_DOF],
    pub pose: Pose,
}

impl ArmState {
    /// 是否已收到至少一帧广播
    pub fn is_valid(&self) -> bool {
        self.sequence > 0
    }

    pub fn joint_positions(&self) -> [f32; ARM_DOF] {
        self.joints.map(|j| j.position)
    }

    pub fn all_enabled(&self) -> bool {
        self.joints.iter().all(|j| j.enabled)
    }
}

/// 力传感器快照
///
/// 与 [`ArmState`] 来自同一帧，`sequence` 相同。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForceState {
    pub sequence: u64,
    pub system_timestamp_us: u64,
    /// 末端无力传感器时为 `None`
    pub sample: Option<ForceSample>,
}

/// 一帧广播对应的完整快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub arm: ArmState,
    pub force: ForceState,
}

impl TelemetrySnapshot {
    pub(crate) fn from_frame(frame: RealtimeArmState, sequence: u64, timestamp_us: u64) -> Self {
        let RealtimeArmState {
            arm_ip,
            arm_err,
            sys_err,
            joints,
            force,
            pose,
        } = frame;
        Self {
            arm: ArmState {
                sequence,
                system_timestamp_us: timestamp_us,
                arm_ip,
                arm_err,
                sys_err,
                joints,
                pose,
            },
            force: ForceState {
                sequence,
                system_timestamp_us: timestamp_us,
                sample: force,
            },
        }
    }

    pub fn sequence(&self) -> u64 {
        self.arm.sequence
    }
}

/// 会话上下文：接收线程、监控线程与调用方线程共享的全部状态
pub struct SessionContext {
    pub(crate) handle: ArmHandle,
    /// 最新遥测快照（整帧原子替换）
    pub(crate) telemetry: ArcSwap<TelemetrySnapshot>,
    /// 已被控制器接受的实时推送配置
    pub(crate) push_config: ArcSwapOption<RealtimePushConfig>,
    pub(crate) hooks: HandlerRegistry,
    pub(crate) pending: PendingRequests,
    pub(crate) connection_monitor: ConnectionMonitor,
    pub(crate) link_state: AtomicLinkState,
    /// 传输层已报告致命错误
    pub(crate) transport_closed: AtomicBool,
    pub(crate) metrics: SessionMetrics,
    sequence: AtomicU64,
}

impl SessionContext {
    pub(crate) fn new(handle: ArmHandle, link_timeout: Duration) -> Self {
        Self {
            handle,
            telemetry: ArcSwap::from_pointee(TelemetrySnapshot::default()),
            push_config: ArcSwapOption::empty(),
            hooks: HandlerRegistry::new(),
            pending: PendingRequests::new(),
            connection_monitor: ConnectionMonitor::new(link_timeout),
            link_state: AtomicLinkState::default(),
            transport_closed: AtomicBool::new(false),
            metrics: SessionMetrics::new(),
            sequence: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 整帧替换遥测快照，返回新快照
    pub(crate) fn store_telemetry(&self, snapshot: TelemetrySnapshot) -> Arc<TelemetrySnapshot> {
        let snapshot = Arc::new(snapshot);
        self.telemetry.store(snapshot.clone());
        snapshot
    }

    /// 传输层致命错误：标记链路丢失，唤醒所有等待应答的请求
    /// `Up → Lost`，每次中断只计数一次；链路已不是 `Up` 时返回 false
    pub(crate) fn mark_link_lost(&self) -> bool {
        let changed = self.link_state.transition(LinkState::Up, LinkState::Lost);
        if changed {
            SessionMetrics::bump(&self.metrics.link_losses);
        }
        changed
    }

    pub(crate) fn mark_transport_closed(&self) {
        self.transport_closed.store(true, Ordering::Release);
        self.mark_link_lost();
        self.pending.fail_all();
    }

    pub(crate) fn is_transport_closed(&self) -> bool {
        self.transport_closed.load(Ordering::Acquire)
    }

    /// 会话关闭：丢弃缓存状态
    pub(crate) fn invalidate(&self) {
        self.telemetry.store(Arc::new(TelemetrySnapshot::default()));
        self.push_config.store(None);
        self.pending.fail_all();
        self.link_state.set(LinkState::Closed, Ordering::Release);
    }

    pub(crate) fn push_config(&self) -> Option<Arc<RealtimePushConfig>> {
        self.push_config.load_full()
    }
}
