//! 实时推送配置
//!
//! 控制器按此配置周期性推送 [`RealtimeArmState`](crate::RealtimeArmState)。
//! 接收端同时用它过滤不符合当前配置的残留广播。

use bytes::{Buf, BufMut};

use crate::constants::{PUSH_CYCLE_MAX_MS, PUSH_IP_MAX, PUSH_TICK_MS};
use crate::feedback::ForceFrame;
use crate::{ProtocolError, get_fixed_str, get_flag, put_fixed_str};

/// UDP 机械臂状态主动上报配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RealtimePushConfig {
    /// 广播周期（ms），必须是 5ms 的整数倍
    pub cycle_ms: u16,
    /// 是否使能主动上报
    pub enable: bool,
    /// 广播目标端口
    pub port: u16,
    /// 系统外受力数据的参考坐标系
    pub force_frame: ForceFrame,
    /// 自定义的上报目标 IP 地址
    pub ip: String,
}

impl Default for RealtimePushConfig {
    fn default() -> Self {
        Self {
            cycle_ms: PUSH_TICK_MS,
            enable: true,
            port: 8089,
            force_frame: ForceFrame::Sensor,
            ip: "192.168.1.100".to_string(),
        }
    }
}

impl RealtimePushConfig {
    /// 校验字段范围
    ///
    /// # 错误
    /// - 周期为 0、不是 5ms 的整数倍或超过 5000ms
    /// - 使能时端口为 0
    /// - IP 为空或超过 27 字节
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.cycle_ms == 0
            || self.cycle_ms % PUSH_TICK_MS != 0
            || self.cycle_ms > PUSH_CYCLE_MAX_MS
        {
            return Err(ProtocolError::InvalidValue {
                field: "cycle_ms",
                value: self.cycle_ms as i64,
            });
        }
        if self.enable && self.port == 0 {
            return Err(ProtocolError::InvalidValue {
                field: "port",
                value: 0,
            });
        }
        if self.ip.is_empty() || self.ip.len() > PUSH_IP_MAX {
            return Err(ProtocolError::InvalidString { field: "ip" });
        }
        Ok(())
    }

    /// 广播周期对应的基准节拍数
    pub fn cycle_ticks(&self) -> u16 {
        self.cycle_ms / PUSH_TICK_MS
    }

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_u16(self.cycle_ms);
        out.put_u8(self.enable as u8);
        out.put_u16(self.port);
        out.put_u8(self.force_frame as u8);
        put_fixed_str::<{ PUSH_IP_MAX + 1 }>(out, &self.ip);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let cycle_ms = buf.get_u16();
        let enable = get_flag(buf, "enable")?;
        let port = buf.get_u16();
        let force_frame = ForceFrame::parse(buf.get_u8(), "force_coordinate")?;
        let ip = get_fixed_str::<{ PUSH_IP_MAX + 1 }>(buf, "ip")?;
        let config = Self {
            cycle_ms,
            enable,
            port,
            force_frame,
            ip,
        };
        config.validate()?;
        Ok(config)
    }
}
