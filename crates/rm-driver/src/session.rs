//! 会话：一条到控制器的逻辑连接
//!
//! 线程模式在构造时确定（策略），运行期间不可切换：
//!
//! - `Single`: 无后台线程。请求在调用方线程上阻塞收发，广播通过 [`Session::poll`] 驱动
//! - `Dual`: 接收线程持续解码广播、分发事件、按 `seq` 投递应答
//! - `Triple`: 在 Dual 基础上增加链路监控线程，通过 [`LinkHandler`] 上报链路丢失/恢复
//!
//! [`Session::disconnect`] 先关闭回调注册表（等待进行中的回调返回），再 join 后台线程，
//! 最后清空缓存状态。返回之后不会再有任何回调被调用。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rm_protocol::{Command, ProgramRunReport, RealtimePushConfig, encode_command};
use rm_transport::{RxTransport, SplittableTransport, Transport, TransportError, TxTransport};
use tracing::{debug, error, info, trace, warn};

use crate::command::Response;
use crate::error::DriverError;
use crate::hooks::{DiagnosticHandler, EventHandler, LinkHandler, TelemetryHandler};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::mode::{LinkState, ThreadMode};
use crate::pipeline::{FrameOutcome, PipelineConfig, monitor_loop, process_frame, rx_loop};
use crate::state::{ArmState, ForceState, SessionContext, TelemetrySnapshot};

/// 单次 `poll()` 最多处理的帧数，避免持续到达的广播让调用方无法返回
const POLL_DRAIN_LIMIT: usize = 256;

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责真正的 join
        thread::spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

// ============================================================================
// ArmHandle
// ============================================================================

static NEXT_HANDLE: AtomicI32 = AtomicI32::new(1);

/// 会话标识
///
/// 连接成功时为正数，进程内唯一；[`ArmHandle::INVALID`]（-1）表示无效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArmHandle(i32);

impl ArmHandle {
    pub const INVALID: ArmHandle = ArmHandle(-1);

    pub(crate) fn allocate() -> Self {
        let id = NEXT_HANDLE
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id == i32::MAX { 1 } else { id + 1 })
            })
            .unwrap_or(1);
        ArmHandle(id)
    }

    pub fn id(self) -> i32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for ArmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Session
// ============================================================================

/// 会话配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub pipeline: PipelineConfig,
    /// 请求默认应答超时
    pub request_timeout: Duration,
    /// `disconnect()` 等待后台线程退出的时限
    pub join_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            request_timeout: Duration::from_secs(1),
            join_timeout: Duration::from_secs(2),
        }
    }
}

enum Link {
    /// 单线程模式：调用方线程独占完整传输
    Single(Mutex<Box<dyn Transport + Send>>),
    /// 多线程模式：接收半边已移交后台线程
    Threaded(Mutex<Box<dyn TxTransport + Send>>),
}

/// 控制器会话
pub struct Session {
    ctx: Arc<SessionContext>,
    mode: ThreadMode,
    config: SessionConfig,
    link: Link,
    /// 会话是否处于打开状态（后台线程据此退出）
    is_running: Arc<AtomicBool>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
    monitor_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// 在已建立的传输上创建会话
    ///
    /// # 参数
    /// - `transport`: 可拆分的传输（Dual/Triple 模式会把接收半边移交后台线程）
    /// - `mode`: 线程模式
    /// - `config`: 会话配置
    ///
    /// # 错误
    /// - `DriverError::Transport`: 传输拆分失败
    /// - `DriverError::Thread`: 后台线程创建失败
    pub fn new<T>(transport: T, mode: ThreadMode, config: SessionConfig) -> Result<Self, DriverError>
    where
        T: SplittableTransport + Send + 'static,
        T::Rx: Send + 'static,
        T::Tx: Send + 'static,
    {
        match mode {
            ThreadMode::Single => Ok(Self::new_single(transport, config)),
            ThreadMode::Dual | ThreadMode::Triple => {
                let (rx, tx) = transport.split()?;
                Self::spawn_threaded(rx, tx, mode, config)
            },
        }
    }

    /// 创建单线程会话（传输无需可拆分）
    pub fn new_single<T>(mut transport: T, config: SessionConfig) -> Self
    where
        T: Transport + Send + 'static,
    {
        transport.set_receive_timeout(config.pipeline.receive_timeout());
        let ctx = Arc::new(SessionContext::new(
            ArmHandle::allocate(),
            config.pipeline.link_timeout(),
        ));
        info!("Session {} opened (single-thread mode)", ctx.handle);

        Self {
            ctx,
            mode: ThreadMode::Single,
            config,
            link: Link::Single(Mutex::new(Box::new(transport))),
            is_running: Arc::new(AtomicBool::new(true)),
            rx_thread: Mutex::new(None),
            monitor_thread: Mutex::new(None),
        }
    }

    fn spawn_threaded<R, W>(
        rx: R,
        tx: W,
        mode: ThreadMode,
        config: SessionConfig,
    ) -> Result<Self, DriverError>
    where
        R: RxTransport + Send + 'static,
        W: TxTransport + Send + 'static,
    {
        let ctx = Arc::new(SessionContext::new(
            ArmHandle::allocate(),
            config.pipeline.link_timeout(),
        ));
        let is_running = Arc::new(AtomicBool::new(true));

        let ctx_clone = ctx.clone();
        let is_running_clone = is_running.clone();
        let rx_thread = thread::Builder::new()
            .name(format!("rm-rx-{}", ctx.handle.id()))
            .spawn(move || rx_loop(rx, ctx_clone, is_running_clone))
            .map_err(|e| DriverError::Thread(format!("Failed to spawn RX thread: {}", e)))?;

        let monitor_thread = if mode.has_link_monitor() {
            let ctx_clone = ctx.clone();
            let is_running_clone = is_running.clone();
            let pipeline = config.pipeline.clone();
            let spawned = thread::Builder::new()
                .name(format!("rm-monitor-{}", ctx.handle.id()))
                .spawn(move || monitor_loop(ctx_clone, pipeline, is_running_clone));
            match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    // RX 线程看到 false 后自行退出
                    is_running.store(false, Ordering::Release);
                    return Err(DriverError::Thread(format!(
                        "Failed to spawn monitor thread: {}",
                        e
                    )));
                },
            }
        } else {
            None
        };

        info!("Session {} opened ({:?} mode)", ctx.handle, mode);

        Ok(Self {
            ctx,
            mode,
            config,
            link: Link::Threaded(Mutex::new(Box::new(tx))),
            is_running,
            rx_thread: Mutex::new(Some(rx_thread)),
            monitor_thread: Mutex::new(monitor_thread),
        })
    }

    // ========================================================================
    // 基本信息
    // ========================================================================

    pub fn handle(&self) -> ArmHandle {
        self.ctx.handle
    }

    pub fn mode(&self) -> ThreadMode {
        self.mode
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 会话是否已关闭
    pub fn is_closed(&self) -> bool {
        !self.is_running.load(Ordering::Acquire)
    }

    /// 链路状态（任意模式可读）
    ///
    /// Single/Dual 模式只在传输层致命错误时变为 `Lost`；
    /// Triple 模式还会在超时未收到数据时变为 `Lost`，恢复后回到 `Up`。
    pub fn link_status(&self) -> LinkState {
        self.ctx.link_state.get(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed() && !self.ctx.is_transport_closed() && self.link_status().is_up()
    }

    // ========================================================================
    // 状态读取（无锁，返回值拷贝）
    // ========================================================================

    /// 最新遥测快照（机械臂状态与力数据来自同一帧）
    pub fn telemetry(&self) -> TelemetrySnapshot {
        TelemetrySnapshot::clone(&self.ctx.telemetry.load())
    }

    pub fn arm_state(&self) -> ArmState {
        self.ctx.telemetry.load().arm.clone()
    }

    pub fn force_state(&self) -> ForceState {
        self.ctx.telemetry.load().force
    }

    /// 已被控制器接受的实时推送配置
    pub fn realtime_push(&self) -> Option<RealtimePushConfig> {
        self.ctx.push_config().map(|c| RealtimePushConfig::clone(&c))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.ctx.metrics.reset();
    }

    /// 等待接收到第一帧有效广播
    ///
    /// Single 模式下在等待期间驱动接收。
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 超时未收到广播
    pub fn wait_for_telemetry(&self, timeout: Duration) -> Result<ArmState, DriverError> {
        let start = Instant::now();

        loop {
            let state = self.arm_state();
            if state.is_valid() {
                return Ok(state);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(DriverError::Timeout);
            }

            match self.mode {
                ThreadMode::Single => {
                    let remaining = timeout - elapsed;
                    self.poll(remaining.min(self.config.pipeline.receive_timeout()))?;
                },
                _ => {
                    self.ensure_open()?;
                    thread::sleep(Duration::from_millis(1));
                },
            }
        }
    }

    // ========================================================================
    // 回调注册（每类一个槽位，后注册者覆盖）
    // ========================================================================

    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.ctx.hooks.set_event_handler(handler);
    }

    pub fn set_telemetry_handler(&self, handler: Arc<dyn TelemetryHandler>) {
        self.ctx.hooks.set_telemetry_handler(handler);
    }

    pub fn set_diagnostic_handler(&self, handler: Arc<dyn DiagnosticHandler>) {
        self.ctx.hooks.set_diagnostic_handler(handler);
    }

    /// 链路事件只在 Triple 模式下产生
    pub fn set_link_handler(&self, handler: Arc<dyn LinkHandler>) {
        if !self.mode.has_link_monitor() {
            debug!(
                "Link handler registered on {:?} session {}; no link events will be emitted",
                self.mode, self.ctx.handle
            );
        }
        self.ctx.hooks.set_link_handler(handler);
    }

    pub fn clear_handlers(&self) {
        self.ctx.hooks.clear();
    }

    // ========================================================================
    // 单线程模式接收
    // ========================================================================

    /// 驱动一次接收（仅 Single 模式）
    ///
    /// 最多等待 `timeout` 直到第一帧到达，随后处理所有已到达的帧而不再等待。
    /// 事件与遥测回调在本调用内同步执行。
    ///
    /// # 返回值
    /// 本次处理的帧数（包括畸形帧）
    ///
    /// # 错误
    /// - `DriverError::NotSingleThread`: 非 Single 模式
    /// - `DriverError::LinkLost`: 传输层致命错误
    pub fn poll(&self, timeout: Duration) -> Result<usize, DriverError> {
        let Link::Single(transport) = &self.link else {
            return Err(DriverError::NotSingleThread);
        };
        self.ensure_open()?;

        let mut transport = transport.lock();
        let mut wait = timeout;
        let mut processed = 0;

        while processed < POLL_DRAIN_LIMIT {
            match transport.receive_timeout(wait) {
                Ok(raw) => {
                    processed += 1;
                    wait = Duration::ZERO;
                    if let FrameOutcome::Response { seq, .. } = process_frame(&raw, &self.ctx) {
                        debug!("Dropping response with no pending request (seq {})", seq);
                    }
                },
                Err(TransportError::Timeout) => {
                    SessionMetrics::bump(&self.ctx.metrics.rx_timeouts);
                    break;
                },
                Err(e) => return Err(self.on_transport_error(e)),
            }
        }

        trace!("poll processed {} frames", processed);
        Ok(processed)
    }

    // ========================================================================
    // 指令
    // ========================================================================

    /// 发送指令并等待应答
    ///
    /// Single 模式下在调用方线程上阻塞接收，期间到达的广播与事件照常处理；
    /// 其他模式由接收线程按 `seq` 投递应答。
    ///
    /// # 错误
    /// - `DriverError::Timeout`: `timeout` 内未收到应答
    /// - `DriverError::LinkLost`: 链路已断开
    /// - `DriverError::SessionClosed`: 会话已关闭
    pub fn request(&self, command: &Command, timeout: Duration) -> Result<Response, DriverError> {
        self.ensure_open()?;
        trace!("Session {} request: {:?}", self.ctx.handle, command.kind());

        match &self.link {
            Link::Single(transport) => self.request_inline(transport, command, timeout),
            Link::Threaded(tx) => self.request_threaded(tx, command, timeout),
        }
    }

    fn request_inline(
        &self,
        transport: &Mutex<Box<dyn Transport + Send>>,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response, DriverError> {
        let mut transport = transport.lock();
        let seq = self.ctx.pending.next_seq();
        let frame = encode_command(seq, command);

        transport.send(&frame).map_err(|e| self.on_transport_error(e))?;
        SessionMetrics::bump(&self.ctx.metrics.tx_frames_total);

        let deadline = Instant::now() + timeout;
        let step = self.config.pipeline.receive_timeout();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                SessionMetrics::bump(&self.ctx.metrics.requests_timed_out);
                warn!("Request {:?} (seq {}) timed out", command.kind(), seq);
                return Err(DriverError::Timeout);
            }

            match transport.receive_timeout(remaining.min(step)) {
                Ok(raw) => match process_frame(&raw, &self.ctx) {
                    FrameOutcome::Response {
                        seq: got,
                        response,
                    } if got == seq => return Ok(response),
                    FrameOutcome::Response { seq: got, .. } => {
                        debug!("Dropping stale response (seq {}, waiting for {})", got, seq);
                    },
                    _ => {},
                },
                Err(TransportError::Timeout) => {
                    SessionMetrics::bump(&self.ctx.metrics.rx_timeouts);
                },
                Err(e) if e.is_fatal() => return Err(self.on_transport_error(e)),
                Err(e) => {
                    warn!("Transport error while waiting for response: {}", e);
                    SessionMetrics::bump(&self.ctx.metrics.transport_errors);
                },
            }
        }
    }

    fn request_threaded(
        &self,
        tx: &Mutex<Box<dyn TxTransport + Send>>,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response, DriverError> {
        let seq = self.ctx.pending.next_seq();
        let waiter = self.ctx.pending.register(seq);
        // 注册前断链时 fail_all 已执行，不会再唤醒该等待者
        if self.ctx.is_transport_closed() {
            self.ctx.pending.cancel(seq);
            return Err(DriverError::LinkLost);
        }
        let frame = encode_command(seq, command);

        let sent = tx.lock().send(&frame);
        if let Err(e) = sent {
            self.ctx.pending.cancel(seq);
            return Err(self.on_transport_error(e));
        }
        SessionMetrics::bump(&self.ctx.metrics.tx_frames_total);

        match waiter.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                self.ctx.pending.cancel(seq);
                SessionMetrics::bump(&self.ctx.metrics.requests_timed_out);
                warn!("Request {:?} (seq {}) timed out", command.kind(), seq);
                Err(DriverError::Timeout)
            },
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                if self.is_closed() {
                    Err(DriverError::SessionClosed)
                } else {
                    Err(DriverError::LinkLost)
                }
            },
        }
    }

    /// 发送指令，要求控制器以成功应答确认
    ///
    /// # 错误
    /// - `DriverError::Rejected`: 控制器返回非零码
    /// - `DriverError::UnexpectedResponse`: 控制器返回了非确认类应答
    pub fn execute(&self, command: &Command, timeout: Duration) -> Result<(), DriverError> {
        match self.request(command, timeout)? {
            Response::Ack(ack) if ack.is_accepted() => Ok(()),
            Response::Ack(ack) => {
                warn!("Command {:?} rejected with code {}", command.kind(), ack.code);
                Err(DriverError::Rejected { code: ack.code })
            },
            other => Err(DriverError::UnexpectedResponse { kind: other.kind() }),
        }
    }

    /// 查询在线程序运行状态
    pub fn query_program_state(&self, timeout: Duration) -> Result<ProgramRunReport, DriverError> {
        match self.request(&Command::QueryProgramState, timeout)? {
            Response::ProgramState(report) => Ok(report),
            Response::Ack(ack) if !ack.is_accepted() => Err(DriverError::Rejected { code: ack.code }),
            other => Err(DriverError::UnexpectedResponse { kind: other.kind() }),
        }
    }

    /// 配置实时推送
    ///
    /// 校验后下发；控制器接受后，接收端按该配置过滤残留广播
    /// （推送关闭时忽略全部广播，力数据坐标系不匹配的广播视为残留）。
    pub fn set_realtime_push(
        &self,
        config: RealtimePushConfig,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        config.validate()?;
        self.execute(&Command::SetRealtimePush(config.clone()), timeout)?;
        info!(
            "Session {} realtime push: enable={}, cycle={}ms, frame={:?}",
            self.ctx.handle, config.enable, config.cycle_ms, config.force_frame
        );
        self.ctx.push_config.store(Some(Arc::new(config)));
        Ok(())
    }

    // ========================================================================
    // 关闭
    // ========================================================================

    /// 关闭会话，使用配置中的 join 时限
    pub fn disconnect(&self) -> Result<(), DriverError> {
        self.disconnect_timeout(self.config.join_timeout)
    }

    /// 关闭会话
    ///
    /// 可重复调用，可与后台线程的工作并发执行。返回后不再调用任何回调，
    /// 缓存状态被清空。
    ///
    /// 不得在回调内调用（回调执行期间持有注册表读锁）。
    ///
    /// # 错误
    /// - `DriverError::Thread`: 后台线程未能在 `join_timeout` 内退出或已 panic
    pub fn disconnect_timeout(&self, join_timeout: Duration) -> Result<(), DriverError> {
        // Release: 之前的写入对看到 false 的线程可见
        let was_running = self.is_running.swap(false, Ordering::AcqRel);

        // 等待进行中的回调返回，此后不再分发
        self.ctx.hooks.close();

        let mut result = Ok(());

        if let Some(handle) = self.rx_thread.lock().take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "RX thread panicked or failed to shut down within {:?}",
                join_timeout
            );
            result = Err(DriverError::Thread("RX thread did not shut down cleanly".into()));
        }

        if let Some(handle) = self.monitor_thread.lock().take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Monitor thread panicked or failed to shut down within {:?}",
                join_timeout
            );
            result = Err(DriverError::Thread("Monitor thread did not shut down cleanly".into()));
        }

        self.ctx.invalidate();
        if was_running {
            info!("Session {} disconnected", self.ctx.handle);
        }
        result
    }

    // ========================================================================
    // 内部工具
    // ========================================================================

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::SessionClosed);
        }
        if self.ctx.is_transport_closed() {
            return Err(DriverError::LinkLost);
        }
        Ok(())
    }

    fn on_transport_error(&self, e: TransportError) -> DriverError {
        if e.is_fatal() {
            error!("Session {} transport failed: {}", self.ctx.handle, e);
            self.ctx.mark_transport_closed();
            DriverError::LinkLost
        } else {
            SessionMetrics::bump(&self.ctx.metrics.transport_errors);
            DriverError::Transport(e)
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            error!("Session {} shutdown error: {}", self.ctx.handle, e);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.ctx.handle)
            .field("mode", &self.mode)
            .field("link", &self.link_status())
            .finish()
    }
}
