//! 内存 Mock 传输
//!
//! `mock_pair()` 返回一对互连的端点：
//! - [`MockTransport`]: 交给会话使用，可拆分为收发两半
//! - [`MockController`]: 测试代码扮演控制器，注入任意帧、观察发出的指令、模拟断链

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use rm_protocol::{Envelope, encode};

use crate::{RxTransport, SplittableTransport, Transport, TransportError, TxTransport};

const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(2);

/// 创建一对互连的 Mock 端点
pub fn mock_pair() -> (MockTransport, MockController) {
    let (inbound_tx, inbound_rx) = unbounded();
    let (outbound_tx, outbound_rx) = unbounded();
    let link_up = Arc::new(AtomicBool::new(true));

    let transport = MockTransport {
        rx: MockRx {
            inbound: inbound_rx,
            timeout: DEFAULT_RECEIVE_TIMEOUT,
            link_up: link_up.clone(),
        },
        tx: MockTx {
            outbound: outbound_tx,
            link_up: link_up.clone(),
        },
    };
    let controller = MockController {
        inbound: inbound_tx,
        outbound: outbound_rx,
        link_up,
    };
    (transport, controller)
}

/// 测试侧的"控制器"
#[derive(Clone)]
pub struct MockController {
    inbound: Sender<Bytes>,
    outbound: Receiver<Bytes>,
    link_up: Arc<AtomicBool>,
}

impl MockController {
    /// 注入一段原始字节（可以是畸形帧）
    pub fn push_raw(&self, frame: impl Into<Bytes>) {
        let _ = self.inbound.send(frame.into());
    }

    /// 注入一帧报文
    pub fn push(&self, envelope: &Envelope) {
        self.push_raw(encode(envelope));
    }

    /// 等待会话发出的下一帧
    pub fn recv_sent(&self, timeout: Duration) -> Option<Bytes> {
        self.outbound.recv_timeout(timeout).ok()
    }

    pub fn try_recv_sent(&self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// 模拟链路断开：此后双方收发均返回 `Disconnected`
    pub fn sever(&self) {
        self.link_up.store(false, Ordering::Release);
    }

    pub fn restore(&self) {
        self.link_up.store(true, Ordering::Release);
    }
}

/// Mock 接收半边
pub struct MockRx {
    inbound: Receiver<Bytes>,
    timeout: Duration,
    link_up: Arc<AtomicBool>,
}

impl MockRx {
    fn receive_frame(&mut self) -> Result<Bytes, TransportError> {
        if !self.link_up.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        if self.timeout.is_zero() {
            return match self.inbound.try_recv() {
                Ok(frame) => Ok(frame),
                Err(TryRecvError::Empty) => Err(TransportError::Timeout),
                Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
            };
        }
        match self.inbound.recv_timeout(self.timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

impl RxTransport for MockRx {
    fn receive(&mut self) -> Result<Bytes, TransportError> {
        self.receive_frame()
    }
}

/// Mock 发送半边
pub struct MockTx {
    outbound: Sender<Bytes>,
    link_up: Arc<AtomicBool>,
}

impl TxTransport for MockTx {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.link_up.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        self.outbound
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Mock 传输（完整双向）
pub struct MockTransport {
    rx: MockRx,
    tx: MockTx,
}

impl Transport for MockTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx.send(frame)
    }

    fn receive(&mut self) -> Result<Bytes, TransportError> {
        self.rx.receive_frame()
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.rx.timeout = timeout;
    }
}

impl SplittableTransport for MockTransport {
    type Rx = MockRx;
    type Tx = MockTx;

    fn split(self) -> Result<(Self::Rx, Self::Tx), TransportError> {
        Ok((self.rx, self.tx))
    }
}
