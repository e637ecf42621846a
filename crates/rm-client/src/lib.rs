//! 客户端接口模块
//!
//! 本模块在驱动层会话之上提供面向用户的接口，包括：
//! - 在线程序运行状态跟踪（事件优先于并发的本地操作）
//! - 轨迹/路点目录（分页、名称过滤）
//! - 工具包络球列表
//! - [`RobotArm`]：组合以上部分的高层句柄
//!
//! 控制器侧的定长表在这里统一用 [`BoundedVec`] 表示，超出容量一律返回错误。

pub mod arm;
pub mod bounded;
pub mod catalog;
pub mod envelope;
mod error;
pub mod tracker;

pub use arm::RobotArm;
pub use bounded::BoundedVec;
pub use catalog::{Catalog, CatalogRecord, Page, TrajectoryRecord, Waypoint};
pub use envelope::{EnvelopeBall, ToolEnvelope};
pub use error::ClientError;
pub use tracker::{
    LoopCounters, ProgramRunSnapshot, ProgramRunTracker, Transition, TransitionTicket,
};
