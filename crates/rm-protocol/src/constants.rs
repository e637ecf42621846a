//! 协议常量定义
//!
//! 集中定义容量与长度上限，避免在代码中散落"魔法数"。

/// 机械臂自由度（关节数）
pub const ARM_DOF: usize = 7;

/// 在线程序循环指令计数表容量（行号 → 次数）
pub const MAX_LOOP_PAIRS: usize = 100;

/// 轨迹/路点列表单页容量
pub const CATALOG_PAGE_CAPACITY: usize = 100;

/// 轨迹/路点目录各自可存储的条目上限
pub const CATALOG_CAPACITY: usize = 1000;

/// 工具包络球最大数量
pub const MAX_ENVELOPE_BALLS: usize = 5;

/// 在线编程文件名最大长度（字节，不含结尾 NUL）
pub const TRAJECTORY_NAME_MAX: usize = 31;

/// 全局路点名最大长度
pub const WAYPOINT_NAME_MAX: usize = 19;

/// 坐标系名最大长度
pub const FRAME_NAME_MAX: usize = 11;

/// 模糊搜索关键字最大长度
pub const SEARCH_FILTER_MAX: usize = 31;

/// 广播帧中机械臂 IP 最大长度
pub const ARM_IP_MAX: usize = 15;

/// 实时推送目标 IP 最大长度
pub const PUSH_IP_MAX: usize = 27;

/// 实时推送周期基准（ms），周期必须为其整数倍
pub const PUSH_TICK_MS: u16 = 5;

/// 实时推送周期上限（ms）
pub const PUSH_CYCLE_MAX_MS: u16 = 5000;

/// 全局速度比例上限
pub const PLAN_SPEED_MAX: u8 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_cycle_bound_is_tick_aligned() {
        assert_eq!(PUSH_CYCLE_MAX_MS % PUSH_TICK_MS, 0);
    }

    #[test]
    fn test_page_and_loop_capacity() {
        assert_eq!(MAX_LOOP_PAIRS, 100);
        assert_eq!(CATALOG_PAGE_CAPACITY, 100);
        assert_eq!(CATALOG_CAPACITY % CATALOG_PAGE_CAPACITY, 0);
        assert!(WAYPOINT_NAME_MAX < TRAJECTORY_NAME_MAX);
    }
}
