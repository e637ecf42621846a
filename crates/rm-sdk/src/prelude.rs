//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use rm_sdk::prelude::*;
//! ```

// 客户端层（推荐使用）
pub use rm_client::{
    Catalog, ClientError, EnvelopeBall, Page, ProgramRunSnapshot, RobotArm, ToolEnvelope,
    TrajectoryRecord, Waypoint,
};

// 驱动层
pub use rm_driver::{
    ArmHandle, ArmState, DriverError, EventHandler, ForceState, LinkEvent, LinkHandler, LinkState,
    Session, SessionBuilder, TelemetryHandler, ThreadMode,
};

// 协议层数据类型
pub use rm_protocol::{EventPush, ForceFrame, Pose, RealtimePushConfig, RunState};

// 配置与日志
pub use crate::config::SdkConfig;
pub use crate::logging::{DEFAULT_LOG_FILTER, init_logger};
