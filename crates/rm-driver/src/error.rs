//! 驱动层错误类型定义

use rm_protocol::{MessageKind, ProtocolError};
use rm_transport::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议错误（如实时推送配置越界）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 建立连接失败
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: TransportError,
    },

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 链路已断开（需要重建会话）
    #[error("Link lost")]
    LinkLost,

    /// 会话已关闭
    #[error("Session closed")]
    SessionClosed,

    /// 控制器拒绝执行
    #[error("Command rejected by controller (code {code})")]
    Rejected { code: i32 },

    /// 应答类型与指令不匹配
    #[error("Unexpected response: {kind:?}")]
    UnexpectedResponse { kind: MessageKind },

    /// 未使用单线程模式
    ///
    /// `poll()` 只能在单线程模式下使用，其他模式由后台线程接收。
    #[error("Not in single-thread mode. Background threads own the receive path")]
    NotSingleThread,

    /// 后台线程错误
    #[error("Thread error: {0}")]
    Thread(String),

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DriverError {
    /// 是否属于链路层问题（应用应考虑重连）
    pub fn is_link_error(&self) -> bool {
        match self {
            DriverError::LinkLost | DriverError::Connect { .. } => true,
            DriverError::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Transport(TransportError::Timeout);
        assert!(err.to_string().contains("Read timeout"));

        let err = DriverError::Protocol(ProtocolError::InvalidLength {
            expected: 8,
            actual: 4,
        });
        assert!(err.to_string().contains("Invalid frame length"));

        assert_eq!(DriverError::Timeout.to_string(), "Operation timeout");
        assert_eq!(DriverError::LinkLost.to_string(), "Link lost");
        assert_eq!(
            DriverError::Rejected { code: 2 }.to_string(),
            "Command rejected by controller (code 2)"
        );

        let err = DriverError::Connect {
            addr: "10.0.0.1:8080".to_string(),
            source: TransportError::Timeout,
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.1:8080") && msg.contains("Read timeout"));
    }

    #[test]
    fn test_from_transport_error() {
        let err: DriverError = TransportError::Disconnected.into();
        assert!(matches!(
            err,
            DriverError::Transport(TransportError::Disconnected)
        ));
        assert!(err.is_link_error());
    }

    #[test]
    fn test_link_error_classification() {
        assert!(DriverError::LinkLost.is_link_error());
        assert!(!DriverError::Timeout.is_link_error());
        assert!(!DriverError::Rejected { code: 1 }.is_link_error());
        assert!(!DriverError::Transport(TransportError::Timeout).is_link_error());
    }
}
