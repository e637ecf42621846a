//! 指令/应答关联
//!
//! 每条指令分配一个非零 `seq`，控制器应答时原样回填；接收线程按 `seq`
//! 把应答投递给等待中的请求。`seq == 0` 保留给主动推送。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use rm_protocol::{CommandAck, Message, MessageKind, ProgramRunReport};
use tracing::debug;

/// 控制器应答
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ack(CommandAck),
    ProgramState(ProgramRunReport),
}

impl Response {
    /// 从报文中提取应答，非应答报文返回 `None`
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Ack(ack) => Some(Response::Ack(ack)),
            Message::ProgramState(report) => Some(Response::ProgramState(report)),
            _ => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Response::Ack(_) => MessageKind::CommandAck,
            Response::ProgramState(_) => MessageKind::ProgramState,
        }
    }
}

/// 等待应答的请求表
pub struct PendingRequests {
    next_seq: AtomicU16,
    waiters: Mutex<HashMap<u16, Sender<Response>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU16::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// 分配下一个序号（回绕时跳过 0）
    pub fn next_seq(&self) -> u16 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }

    /// 登记一个等待者
    pub fn register(&self, seq: u16) -> Receiver<Response> {
        let (tx, rx) = bounded(1);
        self.waiters.lock().insert(seq, tx);
        rx
    }

    /// 投递应答，返回是否有等待者
    pub fn complete(&self, seq: u16, response: Response) -> bool {
        let waiter = self.waiters.lock().remove(&seq);
        match waiter {
            Some(tx) => tx.try_send(response).is_ok(),
            None => {
                debug!("Dropping late or unsolicited response (seq {})", seq);
                false
            },
        }
    }

    /// 放弃等待（超时或发送失败）
    pub fn cancel(&self, seq: u16) {
        self.waiters.lock().remove(&seq);
    }

    /// 丢弃所有等待者，等待方会收到 `Disconnected`
    pub fn fail_all(&self) {
        self.waiters.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;
    use std::time::Duration;

    #[test]
    fn test_seq_skips_zero() {
        let pending = PendingRequests::new();
        pending.next_seq.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(pending.next_seq(), u16::MAX);
        assert_eq!(pending.next_seq(), 1);
    }

    #[test]
    fn test_complete_routes_by_seq() {
        let pending = PendingRequests::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        assert!(pending.complete(2, Response::Ack(CommandAck { code: 5 })));
        assert_eq!(
            rx2.recv_timeout(Duration::from_millis(10)).unwrap(),
            Response::Ack(CommandAck { code: 5 })
        );
        assert!(rx1.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_late_response_dropped() {
        let pending = PendingRequests::new();
        let _rx = pending.register(9);
        pending.cancel(9);
        assert!(!pending.complete(9, Response::Ack(CommandAck::ACCEPTED)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fail_all_disconnects_waiters() {
        let pending = PendingRequests::new();
        let rx = pending.register(4);
        pending.fail_all();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_response_from_message() {
        assert_eq!(
            Response::from_message(Message::Ack(CommandAck::ACCEPTED)).map(|r| r.kind()),
            Some(MessageKind::CommandAck)
        );
        assert!(Response::from_message(Message::Event(rm_protocol::EventPush::None)).is_none());
    }
}
