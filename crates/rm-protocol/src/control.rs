//! 下行指令定义
//!
//! 在线编程运行控制与实时推送配置指令。指令编码总是成功，
//! 取值范围由调用方在编码前校验（见各构造方法）。

use bytes::{Buf, BufMut};

use crate::config::RealtimePushConfig;
use crate::constants::PLAN_SPEED_MAX;
use crate::ids::MessageKind;
use crate::{ProtocolError, get_flag};

/// 下行指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 运行指定编号的在线编程轨迹
    ///
    /// `speed` 为 0 时使用控制器保存的速度，否则为 1~100 的速度比例。
    StartProgram { program_id: i32, speed: u8 },
    /// 轨迹暂停
    PauseProgram,
    /// 轨迹继续
    ResumeProgram,
    /// 轨迹停止
    StopProgram,
    /// 设置单步模式
    SetStepMode { enabled: bool },
    /// 设置全局规划速度比例（1~100）
    SetPlanSpeed { speed: u8 },
    /// 配置 UDP 主动上报
    SetRealtimePush(RealtimePushConfig),
    /// 查询在线程序运行状态
    QueryProgramState,
}

impl Command {
    pub fn kind(&self) -> MessageKind {
        match self {
            Command::StartProgram { .. } => MessageKind::StartProgram,
            Command::PauseProgram => MessageKind::PauseProgram,
            Command::ResumeProgram => MessageKind::ResumeProgram,
            Command::StopProgram => MessageKind::StopProgram,
            Command::SetStepMode { .. } => MessageKind::SetStepMode,
            Command::SetPlanSpeed { .. } => MessageKind::SetPlanSpeed,
            Command::SetRealtimePush(_) => MessageKind::SetRealtimePush,
            Command::QueryProgramState => MessageKind::QueryProgramState,
        }
    }

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        match self {
            Command::StartProgram { program_id, speed } => {
                out.put_i32(*program_id);
                out.put_u8(*speed);
            },
            Command::SetStepMode { enabled } => out.put_u8(*enabled as u8),
            Command::SetPlanSpeed { speed } => out.put_u8(*speed),
            Command::SetRealtimePush(config) => config.encode(out),
            Command::PauseProgram
            | Command::ResumeProgram
            | Command::StopProgram
            | Command::QueryProgramState => {}
        }
    }

    /// 解析指令负载（供模拟控制器与测试使用）
    pub(crate) fn decode(kind: MessageKind, buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let command = match kind {
            MessageKind::StartProgram => {
                let program_id = buf.get_i32();
                let speed = buf.get_u8();
                if speed > PLAN_SPEED_MAX {
                    return Err(ProtocolError::InvalidValue {
                        field: "speed",
                        value: speed as i64,
                    });
                }
                Command::StartProgram { program_id, speed }
            },
            MessageKind::PauseProgram => Command::PauseProgram,
            MessageKind::ResumeProgram => Command::ResumeProgram,
            MessageKind::StopProgram => Command::StopProgram,
            MessageKind::SetStepMode => Command::SetStepMode {
                enabled: get_flag(buf, "step_mode")?,
            },
            MessageKind::SetPlanSpeed => {
                let speed = buf.get_u8();
                if !(1..=PLAN_SPEED_MAX).contains(&speed) {
                    return Err(ProtocolError::InvalidValue {
                        field: "plan_speed",
                        value: speed as i64,
                    });
                }
                Command::SetPlanSpeed { speed }
            },
            MessageKind::SetRealtimePush => {
                Command::SetRealtimePush(RealtimePushConfig::decode(buf)?)
            },
            MessageKind::QueryProgramState => Command::QueryProgramState,
            other => {
                return Err(ProtocolError::UnknownKind {
                    kind: other.as_u8(),
                });
            },
        };
        Ok(command)
    }
}
