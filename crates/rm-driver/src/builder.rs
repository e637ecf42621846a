//! Builder 模式实现
//!
//! 提供链式构造 [`Session`] 的便捷方式。

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use rm_protocol::RealtimePushConfig;
use rm_transport::{NetConfig, NetTransport, SplittableTransport};
use tracing::{info, warn};

use crate::error::DriverError;
use crate::mode::ThreadMode;
use crate::pipeline::PipelineConfig;
use crate::session::{Session, SessionConfig};

/// 控制器默认 TCP 端口
pub const DEFAULT_CONTROLLER_PORT: u16 = 8080;

/// Session Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use rm_driver::{SessionBuilder, ThreadMode};
/// use std::time::Duration;
///
/// let session = SessionBuilder::new()
///     .controller("192.168.1.18:8080")
///     .udp_bind("0.0.0.0:8089")
///     .thread_mode(ThreadMode::Triple)
///     .request_timeout(Duration::from_millis(500))
///     .connect()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    /// 控制器地址（`host:port`，省略端口时使用 8080）
    controller: Option<String>,
    /// 本地 UDP 广播接收地址
    udp_bind: Option<String>,
    thread_mode: ThreadMode,
    connect_timeout: Duration,
    config: SessionConfig,
    /// 连接成功后立即下发的实时推送配置
    realtime_push: Option<RealtimePushConfig>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            controller: None,
            udp_bind: None,
            thread_mode: ThreadMode::default(),
            connect_timeout: Duration::from_secs(3),
            config: SessionConfig::default(),
            realtime_push: None,
        }
    }

    pub fn controller(mut self, addr: impl Into<String>) -> Self {
        self.controller = Some(addr.into());
        self
    }

    pub fn udp_bind(mut self, addr: impl Into<String>) -> Self {
        self.udp_bind = Some(addr.into());
        self
    }

    pub fn thread_mode(mut self, mode: ThreadMode) -> Self {
        self.thread_mode = mode;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = timeout;
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.config.pipeline = config;
        self
    }

    pub fn realtime_push(mut self, config: RealtimePushConfig) -> Self {
        self.realtime_push = Some(config);
        self
    }

    /// 当前累积的会话配置
    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn get_thread_mode(&self) -> ThreadMode {
        self.thread_mode
    }

    /// 连接控制器并创建会话
    ///
    /// # 错误
    /// - `DriverError::InvalidInput`: 未设置地址或地址无法解析
    /// - `DriverError::Connect`: TCP 连接失败或超时
    /// - 设置了实时推送时，下发失败的错误原样返回（会话随之关闭）
    pub fn connect(self) -> Result<Session, DriverError> {
        let addr_str = self
            .controller
            .clone()
            .ok_or_else(|| DriverError::InvalidInput("controller address not set".into()))?;
        let addr = resolve(&addr_str)?;

        let mut net = NetConfig::new(addr);
        net.connect_timeout = self.connect_timeout;
        net.receive_timeout = self.config.pipeline.receive_timeout();
        net.udp_bind = match &self.udp_bind {
            Some(bind) => Some(resolve(bind)?),
            None => None,
        };

        let transport = NetTransport::connect(&net).map_err(|source| DriverError::Connect {
            addr: addr_str.clone(),
            source,
        })?;
        info!("Controller link established: {}", addr_str);

        self.connect_with(transport)
    }

    /// 在给定的传输上创建会话（测试或自定义传输）
    pub fn connect_with<T>(self, transport: T) -> Result<Session, DriverError>
    where
        T: SplittableTransport + Send + 'static,
        T::Rx: Send + 'static,
        T::Tx: Send + 'static,
    {
        let request_timeout = self.config.request_timeout;
        let session = Session::new(transport, self.thread_mode, self.config)?;

        if let Some(push) = self.realtime_push
            && let Err(e) = session.set_realtime_push(push, request_timeout)
        {
            warn!("Failed to apply realtime push config: {}", e);
            let _ = session.disconnect();
            return Err(e);
        }

        Ok(session)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析控制器地址，未带端口时使用 [`DEFAULT_CONTROLLER_PORT`]
///
/// 裸 IP（含 IPv6 字面量）直接补端口；其余形式中的 `:` 视为端口分隔符。
fn resolve(addr: &str) -> Result<SocketAddr, DriverError> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_CONTROLLER_PORT));
    }
    let with_port = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_CONTROLLER_PORT)
    };
    with_port
        .to_socket_addrs()
        .map_err(|e| DriverError::InvalidInput(format!("invalid address {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| DriverError::InvalidInput(format!("address {} resolved to nothing", addr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rm_protocol::{CommandAck, Envelope, Message, decode};
    use rm_transport::mock_pair;
    use std::net::Ipv6Addr;
    use std::thread;

    #[test]
    fn test_builder_defaults() {
        let builder = SessionBuilder::new();
        assert_eq!(builder.get_thread_mode(), ThreadMode::Dual);
        assert_eq!(builder.session_config(), &SessionConfig::default());
    }

    #[test]
    fn test_builder_chain() {
        let builder = SessionBuilder::new()
            .thread_mode(ThreadMode::Single)
            .request_timeout(Duration::from_millis(50))
            .join_timeout(Duration::from_millis(500));
        assert_eq!(builder.get_thread_mode(), ThreadMode::Single);
        assert_eq!(builder.session_config().request_timeout, Duration::from_millis(50));
        assert_eq!(builder.session_config().join_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_resolve_default_port() {
        assert_eq!(
            resolve("127.0.0.1").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve("127.0.0.1:9000").unwrap().port(),
            9000
        );
    }

    #[test]
    fn test_resolve_ipv6_literal() {
        let bare = resolve("::1").unwrap();
        assert_eq!(bare.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(bare.port(), DEFAULT_CONTROLLER_PORT);

        let bare = resolve("fe80::1").unwrap();
        assert_eq!(bare.port(), DEFAULT_CONTROLLER_PORT);

        assert_eq!(resolve("[::1]:9000").unwrap().port(), 9000);
    }

    #[test]
    fn test_connect_without_address() {
        let err = SessionBuilder::new().connect().unwrap_err();
        assert!(matches!(err, DriverError::InvalidInput(_)));
    }

    #[test]
    fn test_connect_refused() {
        // 绑定后立即释放，得到一个大概率无人监听的端口
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = SessionBuilder::new()
            .controller(format!("127.0.0.1:{}", port))
            .connect_timeout(Duration::from_millis(200))
            .connect()
            .unwrap_err();
        assert!(matches!(err, DriverError::Connect { .. }));
        assert!(err.is_link_error());
    }

    #[test]
    fn test_connect_with_applies_push_config() {
        let (transport, controller) = mock_pair();
        let acker = thread::spawn(move || {
            let frame = controller.recv_sent(Duration::from_secs(1)).unwrap();
            let envelope = decode(&frame).unwrap();
            controller.push(&Envelope::new(envelope.seq, Message::Ack(CommandAck::ACCEPTED)));
            controller
        });

        let session = SessionBuilder::new()
            .realtime_push(RealtimePushConfig::default())
            .connect_with(transport)
            .unwrap();
        assert_eq!(session.realtime_push(), Some(RealtimePushConfig::default()));

        let _controller = acker.join().unwrap();
        session.disconnect().unwrap();
    }
}
