//! 报文类型（kind）定义
//!
//! 每一帧由 8 字节帧头 + 定长负载组成，帧头中的 kind 字节决定负载布局。
//!
//! ```text
//! | magic u16 | kind u8 | flags u8 | seq u16 | payload_len u16 | payload ... |
//! ```

/// 帧头魔数（"RM"）
pub const FRAME_MAGIC: u16 = 0x524D;

/// 帧头长度
pub const HEADER_LEN: usize = 8;

/// 上行报文 kind 范围（控制器 → 客户端）
pub const INBOUND_BASE_KIND: u8 = 0x01;
pub const INBOUND_END_KIND: u8 = 0x04;

/// 下行报文 kind 范围（客户端 → 控制器）
pub const COMMAND_BASE_KIND: u8 = 0x10;
pub const COMMAND_END_KIND: u8 = 0x17;

// ============================================================================
// 负载长度
// ============================================================================

/// 实时状态广播负载长度
pub const TELEMETRY_PAYLOAD_LEN: usize = 237;

/// 事件推送负载长度
pub const EVENT_PAYLOAD_LEN: usize = 8;

/// 指令应答负载长度
pub const ACK_PAYLOAD_LEN: usize = 4;

/// 在线程序运行状态负载长度
pub const PROGRAM_STATE_PAYLOAD_LEN: usize = 820;

/// 实时推送配置负载长度
pub const REALTIME_PUSH_PAYLOAD_LEN: usize = 34;

/// 最长负载（用于流式重组时的上限检查）
pub const MAX_PAYLOAD_LEN: usize = PROGRAM_STATE_PAYLOAD_LEN;

/// 最长帧
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// 报文类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum MessageKind {
    /// 实时状态广播（UDP 周期推送）
    Telemetry = 0x01,
    /// 事件推送（轨迹到位 / 在线程序结束）
    Event = 0x02,
    /// 指令应答
    CommandAck = 0x03,
    /// 在线程序运行状态
    ProgramState = 0x04,

    StartProgram = 0x10,
    PauseProgram = 0x11,
    ResumeProgram = 0x12,
    StopProgram = 0x13,
    SetStepMode = 0x14,
    SetPlanSpeed = 0x15,
    SetRealtimePush = 0x16,
    QueryProgramState = 0x17,
}

impl MessageKind {
    /// 解析 kind 字节
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value).ok()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 该类型的定长负载长度
    pub fn payload_len(self) -> usize {
        match self {
            MessageKind::Telemetry => TELEMETRY_PAYLOAD_LEN,
            MessageKind::Event => EVENT_PAYLOAD_LEN,
            MessageKind::CommandAck => ACK_PAYLOAD_LEN,
            MessageKind::ProgramState => PROGRAM_STATE_PAYLOAD_LEN,
            MessageKind::StartProgram => 5,
            MessageKind::PauseProgram
            | MessageKind::ResumeProgram
            | MessageKind::StopProgram
            | MessageKind::QueryProgramState => 0,
            MessageKind::SetStepMode | MessageKind::SetPlanSpeed => 1,
            MessageKind::SetRealtimePush => REALTIME_PUSH_PAYLOAD_LEN,
        }
    }

    /// 是否为控制器上行报文
    pub fn is_inbound(self) -> bool {
        (INBOUND_BASE_KIND..=INBOUND_END_KIND).contains(&self.as_u8())
    }

    /// 是否为下行指令
    pub fn is_command(self) -> bool {
        (COMMAND_BASE_KIND..=COMMAND_END_KIND).contains(&self.as_u8())
    }

    /// 是否为对某条指令的应答（需要按 seq 关联）
    pub fn is_response(self) -> bool {
        matches!(self, MessageKind::CommandAck | MessageKind::ProgramState)
    }
}
