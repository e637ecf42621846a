//! Pipeline IO 循环模块
//!
//! 负责帧解码、状态更新与回调分发（[`process_frame`]），以及
//! 后台接收线程（[`rx_loop`]）和链路监控线程（[`monitor_loop`]）。
//!
//! 单线程模式下 `process_frame` 在调用方的 `poll()` / 请求等待中同步执行，
//! 与后台线程走的是同一条路径。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rm_protocol::{DecodeError, Message, RealtimeArmState, decode};
use rm_transport::{RxTransport, TransportError};
use tracing::{debug, error, trace, warn};

use crate::command::Response;
use crate::heartbeat::monotonic_micros;
use crate::hooks::{LinkEvent, LinkLossReason};
use crate::metrics::SessionMetrics;
use crate::mode::LinkState;
use crate::state::{SessionContext, TelemetrySnapshot};

/// 畸形帧 hex 日志最多打印的字节数
const HEX_DUMP_LIMIT: usize = 32;

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use rm_driver::PipelineConfig;
///
/// // 默认：2ms 接收超时，500ms 无数据判定链路丢失，10ms 监控周期
/// let config = PipelineConfig::default();
///
/// let config = PipelineConfig {
///     receive_timeout_ms: 5,
///     link_timeout_ms: 1000,
///     monitor_interval_ms: 20,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 接收超时（毫秒）
    pub receive_timeout_ms: u64,
    /// 超过此时间未收到任何帧（包括畸形帧）则判定链路丢失（毫秒）
    ///
    /// 关闭实时推送时控制器不会主动发送数据，此时应调大该值。
    pub link_timeout_ms: u64,
    /// 链路监控线程检查周期（毫秒）
    pub monitor_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 2,
            link_timeout_ms: 500,
            monitor_interval_ms: 10,
        }
    }
}

impl PipelineConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// 单帧处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// 遥测已写入缓存
    Telemetry { sequence: u64 },
    /// 事件已分发
    Event,
    /// 指令应答（由调用方按 `seq` 投递）
    Response { seq: u16, response: Response },
    /// 被推送配置过滤，或是不应出现在上行方向的报文
    Ignored,
    /// 解码失败，帧已丢弃
    Malformed,
}

/// 处理一帧原始数据
///
/// 解码失败永远不会向上传播：计数、记录日志、通知诊断回调，然后返回
/// [`FrameOutcome::Malformed`]。缓存只在整帧校验通过后整体替换。
pub fn process_frame(raw: &[u8], ctx: &SessionContext) -> FrameOutcome {
    let metrics = &ctx.metrics;
    SessionMetrics::bump(&metrics.rx_frames_total);
    // 链路活性只看传输层是否交付数据，与解码结果无关
    ctx.connection_monitor.register_activity();

    let envelope = match decode(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            on_malformed(raw, &e, ctx);
            return FrameOutcome::Malformed;
        },
    };

    match envelope.message {
        Message::Telemetry(state) => on_telemetry(*state, ctx),
        Message::Event(event) => {
            SessionMetrics::bump(&metrics.rx_events);
            trace!("Event received: {:?}", event);
            ctx.hooks.dispatch_event(ctx.handle, &event);
            FrameOutcome::Event
        },
        message @ (Message::Ack(_) | Message::ProgramState(_)) => {
            SessionMetrics::bump(&metrics.rx_responses);
            match Response::from_message(message) {
                Some(response) => FrameOutcome::Response {
                    seq: envelope.seq,
                    response,
                },
                None => FrameOutcome::Ignored,
            }
        },
        Message::Command(command) => {
            // 下行指令被回环到上行方向，只记录
            debug!("Ignoring command frame on receive path: {:?}", command.kind());
            SessionMetrics::bump(&metrics.rx_ignored);
            FrameOutcome::Ignored
        },
    }
}

fn on_malformed(raw: &[u8], error: &DecodeError, ctx: &SessionContext) {
    SessionMetrics::bump(&ctx.metrics.rx_malformed);
    warn!("Dropping malformed frame ({} bytes): {}", raw.len(), error);
    trace!(
        "Malformed frame prefix: {}",
        hex::encode(&raw[..raw.len().min(HEX_DUMP_LIMIT)])
    );
    ctx.hooks.dispatch_malformed(ctx.handle, error, raw.len());
}

fn on_telemetry(state: RealtimeArmState, ctx: &SessionContext) -> FrameOutcome {
    if let Some(config) = ctx.push_config() {
        if !config.enable {
            trace!("Realtime push disabled, ignoring telemetry");
            SessionMetrics::bump(&ctx.metrics.rx_ignored);
            return FrameOutcome::Ignored;
        }
        if let Some(force) = &state.force
            && force.frame != config.force_frame
        {
            debug!(
                "Ignoring stray telemetry: force frame {:?}, configured {:?}",
                force.frame, config.force_frame
            );
            SessionMetrics::bump(&ctx.metrics.rx_ignored);
            return FrameOutcome::Ignored;
        }
    }

    let sequence = ctx.next_sequence();
    let snapshot = ctx.store_telemetry(TelemetrySnapshot::from_frame(
        state,
        sequence,
        monotonic_micros(),
    ));
    SessionMetrics::bump(&ctx.metrics.rx_telemetry);
    ctx.hooks.dispatch_telemetry(ctx.handle, &snapshot);
    FrameOutcome::Telemetry { sequence }
}

/// 接收线程主循环
///
/// 持续接收帧并交给 [`process_frame`]；应答按 `seq` 投递给等待中的请求。
///
/// # 参数
/// - `rx`: 接收半边（只读）
/// - `ctx`: 共享会话上下文
/// - `is_running`: 运行标志（用于生命周期联动）
pub fn rx_loop(mut rx: impl RxTransport, ctx: Arc<SessionContext>, is_running: Arc<AtomicBool>) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;
        use tracing::info;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("RX thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set RX thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        let raw = match rx.receive() {
            Ok(raw) => raw,
            Err(TransportError::Timeout) => {
                SessionMetrics::bump(&ctx.metrics.rx_timeouts);
                continue;
            },
            Err(e) if e.is_fatal() => {
                error!("RX thread: fatal transport error: {}", e);
                ctx.mark_transport_closed();
                break;
            },
            Err(e) => {
                warn!("RX thread: transport error: {}", e);
                SessionMetrics::bump(&ctx.metrics.transport_errors);
                continue;
            },
        };

        if let FrameOutcome::Response { seq, response } = process_frame(&raw, &ctx) {
            ctx.pending.complete(seq, response);
        }
    }

    trace!("RX thread: loop exited");
}

/// 链路监控线程主循环（Triple 模式）
///
/// 周期性检查传输层活性与接收线程的致命错误标志，每次状态切换只上报一次
/// [`LinkEvent`]。监控的是"是否收到数据"，畸形帧同样算作链路存活。
pub fn monitor_loop(ctx: Arc<SessionContext>, config: PipelineConfig, is_running: Arc<AtomicBool>) {
    let interval = config.monitor_interval();
    let mut reported = LinkState::Up;

    while is_running.load(Ordering::Acquire) {
        spin_sleep::sleep(interval);

        let observed = if ctx.is_transport_closed() {
            Some(LinkLossReason::TransportClosed)
        } else if !ctx.connection_monitor.check_connection() {
            Some(LinkLossReason::Silence {
                elapsed_ms: ctx.connection_monitor.time_since_last_activity().as_millis() as u64,
            })
        } else {
            None
        };

        // 关闭过程中不再上报
        if !is_running.load(Ordering::Acquire) {
            break;
        }

        match (reported, observed) {
            (LinkState::Up, Some(reason)) => {
                warn!("Link lost on session {}: {:?}", ctx.handle, reason);
                ctx.mark_link_lost();
                reported = LinkState::Lost;
                ctx.hooks.dispatch_link(ctx.handle, &LinkEvent::Lost { reason });
            },
            (LinkState::Lost, None) => {
                debug!("Link restored on session {}", ctx.handle);
                ctx.link_state.transition(LinkState::Lost, LinkState::Up);
                reported = LinkState::Up;
                ctx.hooks.dispatch_link(ctx.handle, &LinkEvent::Restored);
            },
            _ => {},
        }
    }

    trace!("Monitor thread: loop exited");
}
