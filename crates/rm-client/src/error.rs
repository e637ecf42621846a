//! 客户端层错误类型

use rm_driver::DriverError;
use rm_protocol::RunState;
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// 当前运行状态不允许该操作（不会自动重试）
    #[error("Operation '{operation}' not allowed while program is {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    /// 有界容器已满
    #[error("{what} capacity exceeded: {current}/{limit}")]
    CapacityExceeded {
        what: &'static str,
        current: usize,
        limit: usize,
    },

    /// 参数越界或格式错误
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("{what} already exists: {key}")]
    Duplicate { what: &'static str, key: String },

    /// 驱动层错误（超时、链路丢失、控制器拒绝等）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

impl ClientError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Driver(DriverError::Timeout))
    }

    /// 链路层问题，应用应考虑重连
    pub fn is_link_error(&self) -> bool {
        matches!(self, ClientError::Driver(e) if e.is_link_error())
    }
}
