//! 基于 `std::net` 的传输实现
//!
//! - 指令/应答/事件：TCP 长连接（流式，需要按帧头重组）
//! - 实时状态广播：可选的 UDP socket（一个数据报即一帧）
//!
//! 接收顺序：先取 TCP 缓冲区中已完整的帧，再非阻塞地检查 UDP，
//! 最后带超时读取 TCP。

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rm_protocol::{MAX_FRAME_LEN, find_magic, frame_len};
use tracing::{debug, info, warn};

use crate::{RxTransport, SplittableTransport, Transport, TransportError, TxTransport};

/// 读缓冲区大小（足够容纳一个最大帧的 UDP 数据报）
const SCRATCH_LEN: usize = 4096;

/// 网络传输配置
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// 控制器 TCP 地址（默认端口 8080）
    pub controller: SocketAddr,
    /// 本地 UDP 广播接收地址（`None` 表示不接收广播）
    pub udp_bind: Option<SocketAddr>,
    pub connect_timeout: Duration,
    pub receive_timeout: Duration,
}

impl NetConfig {
    pub fn new(controller: SocketAddr) -> Self {
        Self {
            controller,
            udp_bind: None,
            connect_timeout: Duration::from_secs(3),
            receive_timeout: Duration::from_millis(2),
        }
    }
}

/// TCP 字节流的帧重组器
///
/// 失步（魔数错误或长度越界）时，把到下一个魔数之前的字节作为一帧
/// 交给上层，由解码器判为畸形并计数，然后从魔数处继续。
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// 缓冲区中尚未成帧的字节数
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// 取出下一个完整帧（或一段失步的垃圾字节）
    pub fn next_frame(&mut self) -> Option<Bytes> {
        match frame_len(&self.buf) {
            Ok(None) => None,
            Ok(Some(len)) if self.buf.len() >= len => Some(self.buf.split_to(len).freeze()),
            Ok(Some(_)) => None,
            Err(e) => {
                // 保留最后一个字节，它可能是下一个魔数的前半
                let skip = find_magic(&self.buf[1..])
                    .map(|pos| pos + 1)
                    .unwrap_or(self.buf.len() - 1);
                warn!("TCP stream out of sync ({}), skipping {} bytes", e, skip);
                Some(self.buf.split_to(skip).freeze())
            },
        }
    }
}

fn map_read_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
        _ => TransportError::Io(e),
    }
}

/// 接收半边
pub struct NetRx {
    tcp: TcpStream,
    udp: Option<UdpSocket>,
    assembler: FrameAssembler,
    scratch: Box<[u8]>,
}

impl NetRx {
    fn set_timeout(&mut self, timeout: Duration) {
        // read_timeout 不接受 0
        let timeout = timeout.max(Duration::from_millis(1));
        if let Err(e) = self.tcp.set_read_timeout(Some(timeout)) {
            warn!("Failed to set TCP read timeout: {}", e);
        }
    }

    fn receive_frame(&mut self) -> Result<Bytes, TransportError> {
        if let Some(frame) = self.assembler.next_frame() {
            return Ok(frame);
        }

        if let Some(udp) = &self.udp {
            match udp.recv(&mut self.scratch) {
                Ok(n) if n > MAX_FRAME_LEN => return Err(TransportError::FrameTooLarge { len: n }),
                Ok(n) => return Ok(Bytes::copy_from_slice(&self.scratch[..n])),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }

        match self.tcp.read(&mut self.scratch) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                self.assembler.push(&self.scratch[..n]);
                self.assembler.next_frame().ok_or(TransportError::Timeout)
            },
            Err(e) => Err(map_read_error(e)),
        }
    }
}

impl RxTransport for NetRx {
    fn receive(&mut self) -> Result<Bytes, TransportError> {
        self.receive_frame()
    }
}

/// 发送半边
pub struct NetTx {
    tcp: TcpStream,
}

impl TxTransport for NetTx {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge { len: frame.len() });
        }
        self.tcp.write_all(frame).map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                TransportError::Disconnected
            },
            _ => TransportError::Io(e),
        })
    }
}

/// 控制器网络传输
pub struct NetTransport {
    rx: NetRx,
    tx: NetTx,
}

impl NetTransport {
    /// 建立 TCP 连接并（可选）绑定 UDP 广播端口
    ///
    /// # 错误
    /// - `TransportError::Timeout`: 连接超时
    /// - `TransportError::Io`: 地址不可达或端口被占用
    pub fn connect(config: &NetConfig) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect_timeout(&config.controller, config.connect_timeout).map_err(
            |e| match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
                _ => TransportError::Io(e),
            },
        )?;
        tcp.set_nodelay(true)?;

        let udp = match config.udp_bind {
            Some(addr) => {
                let socket = UdpSocket::bind(addr)?;
                socket.set_nonblocking(true)?;
                debug!("UDP broadcast receiver bound to {}", addr);
                Some(socket)
            },
            None => None,
        };

        let tx = NetTx {
            tcp: tcp.try_clone()?,
        };
        let mut rx = NetRx {
            tcp,
            udp,
            assembler: FrameAssembler::new(),
            scratch: vec![0u8; SCRATCH_LEN].into_boxed_slice(),
        };
        rx.set_timeout(config.receive_timeout);

        info!("Connected to controller at {}", config.controller);
        Ok(Self { rx, tx })
    }
}

impl Transport for NetTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx.send(frame)
    }

    fn receive(&mut self) -> Result<Bytes, TransportError> {
        self.rx.receive_frame()
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.rx.set_timeout(timeout);
    }
}

impl SplittableTransport for NetTransport {
    type Rx = NetRx;
    type Tx = NetTx;

    fn split(self) -> Result<(Self::Rx, Self::Tx), TransportError> {
        Ok((self.rx, self.tx))
    }
}
