//! # RM Transport Layer
//!
//! 控制器通信抽象层，提供统一的收发接口。
//!
//! - `net`: 基于 `std::net` 的实现（TCP 指令链路 + 可选 UDP 广播接收）
//! - `mock`: 内存通道实现，供测试注入任意帧（需启用 `mock` feature）
//!
//! 传输层只搬运完整的原始帧（`Bytes`），不做协议解析。

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod net;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use net::{FrameAssembler, NetConfig, NetRx, NetTransport, NetTx};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockController, MockRx, MockTransport, MockTx, mock_pair};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Link disconnected")]
    Disconnected,
    #[error("Frame too large: {len} bytes")]
    FrameTooLarge { len: usize },
    #[error("Transport not started")]
    NotStarted,
}

impl TransportError {
    /// 是否意味着链路已不可用（需要重建会话）
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Disconnected | TransportError::NotStarted => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TransportError::Timeout | TransportError::FrameTooLarge { .. } => false,
        }
    }
}

/// 完整的双向传输（单线程模式直接使用）
pub trait Transport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// 接收一帧，超时返回 `TransportError::Timeout`
    fn receive(&mut self) -> Result<Bytes, TransportError>;

    fn set_receive_timeout(&mut self, _timeout: Duration) {}

    fn receive_timeout(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }

    fn try_receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(TransportError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 只读半边（移交给接收线程）
pub trait RxTransport {
    fn receive(&mut self) -> Result<Bytes, TransportError>;
}

/// 只写半边（留在调用方线程）
pub trait TxTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// 可拆分为独立收发两半的传输
pub trait SplittableTransport: Transport {
    type Rx: RxTransport;
    type Tx: TxTransport;

    fn split(self) -> Result<(Self::Rx, Self::Tx), TransportError>;
}
