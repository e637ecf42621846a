//! RM SDK - 睿尔曼机械臂 Rust SDK
//!
//! 面向控制器 TCP 指令链路与 UDP 实时推送的会话核心。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 定长报文编码/解码，整帧校验
//! - **传输层** (`transport`): TCP/UDP 链路与内存 Mock
//! - **驱动层** (`driver`): 会话生命周期、接收线程、状态快照、回调分发
//! - **客户端层** (`client`): 在线程序跟踪、轨迹/路点目录、[`RobotArm`]
//!
//! # 快速开始
//!
//! ```no_run
//! use rm_sdk::prelude::*;
//!
//! init_logger(DEFAULT_LOG_FILTER).ok();
//! let config = SdkConfig::load("rm-arm.toml")?;
//! let arm = RobotArm::connect(config.session_builder())?;
//! arm.start_program(1, 50)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod logging;
pub mod prelude;

pub use rm_client as client;
pub use rm_driver as driver;
pub use rm_protocol as protocol;
pub use rm_transport as transport;

// --- 常用入口 ---
pub use config::{ConfigError, SdkConfig};
pub use logging::{DEFAULT_LOG_FILTER, LoggerError, init_logger};

pub use rm_client::{ClientError, RobotArm};
pub use rm_driver::{DriverError, Session, SessionBuilder, ThreadMode};
pub use rm_protocol::{DecodeError, ProtocolError};
pub use rm_transport::TransportError;
