//! 上行报文结构体定义
//!
//! 包含控制器推送/应答的所有报文：实时状态广播、事件推送、指令应答、
//! 在线程序运行状态。每个结构体提供定长负载的编解码方法，
//! 长度由 `codec` 在调用前严格校验。

use bytes::{Buf, BufMut};
use bilge::prelude::*;
use num_enum::TryFromPrimitive;

use crate::constants::{ARM_DOF, ARM_IP_MAX, MAX_LOOP_PAIRS, PLAN_SPEED_MAX};
use crate::pose::Pose;
use crate::{ProtocolError, get_finite_f32s, get_fixed_str, get_flag, put_fixed_str};

// ============================================================================
// 关节状态
// ============================================================================

/// 关节使能位域
///
/// - Bit 0-6: 1~7 号关节使能状态（0：掉使能 1：使能）
/// - Bit 7: 保留，必须为 0
///
/// 单个字节内 Bit 0 对应 1 号关节（LSB first），与 bilge 默认位序一致。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq)]
pub struct JointEnableFlags {
    pub joint1: bool,
    pub joint2: bool,
    pub joint3: bool,
    pub joint4: bool,
    pub joint5: bool,
    pub joint6: bool,
    pub joint7: bool,
    pub reserved: u1,
}

impl JointEnableFlags {
    pub fn from_array(enabled: [bool; ARM_DOF]) -> Self {
        let bits = enabled
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &on)| acc | ((on as u8) << i));
        Self::from(u8::new(bits))
    }

    pub fn to_array(self) -> [bool; ARM_DOF] {
        [
            self.joint1(),
            self.joint2(),
            self.joint3(),
            self.joint4(),
            self.joint5(),
            self.joint6(),
            self.joint7(),
        ]
    }
}

/// 单个关节状态
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JointState {
    /// 电流（mA）
    pub current: f32,
    /// 使能状态
    pub enabled: bool,
    /// 关节错误码
    pub err_code: u16,
    /// 关节角度（°）
    pub position: f32,
    /// 温度（℃）
    pub temperature: f32,
    /// 电压（V）
    pub voltage: f32,
}

// ============================================================================
// 六维力 / 一维力
// ============================================================================

/// 外力数据参考坐标系
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum ForceFrame {
    /// 传感器坐标系
    Sensor = 0,
    /// 当前工作坐标系
    Work = 1,
    /// 当前工具坐标系
    Tool = 2,
}

// TryFromPrimitive 会把 #[default] 当作兜底值，这里手写 Default
impl Default for ForceFrame {
    fn default() -> Self {
        ForceFrame::Sensor
    }
}

impl ForceFrame {
    pub(crate) fn parse(value: u8, field: &'static str) -> Result<Self, ProtocolError> {
        Self::try_from(value).map_err(|_| ProtocolError::InvalidValue {
            field,
            value: value as i64,
        })
    }
}

/// 力传感器读数，取决于末端传感器型号
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ForceReading {
    /// 一维力版本（仅 Fz）
    SingleAxis { fz: f32, zero_fz: f32 },
    /// 六维力版本（Fx, Fy, Fz, Mx, My, Mz）
    SixAxis {
        raw: [f32; 6],
        zero_referenced: [f32; 6],
    },
}

/// 力传感器样本
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForceSample {
    /// 系统外受力数据的参考坐标系
    pub frame: ForceFrame,
    pub reading: ForceReading,
}

const FORCE_NONE: u8 = 0;
const FORCE_SINGLE_AXIS: u8 = 1;
const FORCE_SIX_AXIS: u8 = 2;

fn encode_force(force: &Option<ForceSample>, out: &mut impl BufMut) {
    let mut raw = [0.0f32; 6];
    let mut zero = [0.0f32; 6];
    let (variant, frame) = match force {
        None => (FORCE_NONE, 0),
        Some(sample) => {
            let variant = match sample.reading {
                ForceReading::SingleAxis { fz, zero_fz } => {
                    raw[0] = fz;
                    zero[0] = zero_fz;
                    FORCE_SINGLE_AXIS
                },
                ForceReading::SixAxis {
                    raw: r,
                    zero_referenced: z,
                } => {
                    raw = r;
                    zero = z;
                    FORCE_SIX_AXIS
                },
            };
            (variant, sample.frame as u8)
        },
    };
    out.put_u8(variant);
    out.put_u8(frame);
    raw.iter().chain(zero.iter()).for_each(|v| out.put_f32(*v));
}

fn decode_force(buf: &mut impl Buf) -> Result<Option<ForceSample>, ProtocolError> {
    let variant = buf.get_u8();
    let frame = buf.get_u8();
    let mut raw = [0.0f32; 6];
    let mut zero = [0.0f32; 6];
    raw.iter_mut().for_each(|v| *v = buf.get_f32());
    zero.iter_mut().for_each(|v| *v = buf.get_f32());

    let check = |values: &[f32], field| {
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(ProtocolError::NonFinite { field })
        }
    };

    let reading = match variant {
        FORCE_NONE => return Ok(None),
        FORCE_SINGLE_AXIS => {
            check(&[raw[0], zero[0]], "force.fz")?;
            ForceReading::SingleAxis {
                fz: raw[0],
                zero_fz: zero[0],
            }
        },
        FORCE_SIX_AXIS => {
            check(&raw, "force.raw")?;
            check(&zero, "force.zero_referenced")?;
            ForceReading::SixAxis {
                raw,
                zero_referenced: zero,
            }
        },
        other => {
            return Err(ProtocolError::InvalidValue {
                field: "force.variant",
                value: other as i64,
            });
        },
    };

    Ok(Some(ForceSample {
        frame: ForceFrame::parse(frame, "force.frame")?,
        reading,
    }))
}

// ============================================================================
// 实时状态广播
// ============================================================================

/// 实时状态广播 (kind 0x01)
///
/// 控制器按推送周期（5ms 的整数倍）通过 UDP 推送。
/// 整帧校验：任意字段非法则整帧判为畸形，不做字段级抢救。
///
/// | 字段 | 布局 |
/// |---|---|
/// | arm_ip | `[u8;16]`，NUL 结尾 |
/// | arm_err / sys_err | `u16` ×2 |
/// | 关节电流 | `[f32;7]` |
/// | 关节使能 | `u8` 位域 |
/// | 关节错误码 | `[u16;7]` |
/// | 关节角度 / 温度 / 电压 | `[f32;7]` ×3 |
/// | 力数据 | 型号 `u8` + 坐标系 `u8` + `[f32;6]` ×2 |
/// | 位姿 | 40 字节 |
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RealtimeArmState {
    /// 推送数据的机械臂 IP
    pub arm_ip: String,
    /// 机械臂错误码
    pub arm_err: u16,
    /// 系统错误码
    pub sys_err: u16,
    pub joints: [JointState; ARM_DOF],
    /// 末端力传感器数据（无传感器时为 `None`）
    pub force: Option<ForceSample>,
    pub pose: Pose,
}

impl RealtimeArmState {
    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        put_fixed_str::<{ ARM_IP_MAX + 1 }>(out, &self.arm_ip);
        out.put_u16(self.arm_err);
        out.put_u16(self.sys_err);

        self.joints.iter().for_each(|j| out.put_f32(j.current));
        let enabled = self.joints.map(|j| j.enabled);
        out.put_u8(u8::from(JointEnableFlags::from_array(enabled)));
        self.joints.iter().for_each(|j| out.put_u16(j.err_code));
        self.joints.iter().for_each(|j| out.put_f32(j.position));
        self.joints.iter().for_each(|j| out.put_f32(j.temperature));
        self.joints.iter().for_each(|j| out.put_f32(j.voltage));

        encode_force(&self.force, out);
        self.pose.encode(out);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let arm_ip = get_fixed_str::<{ ARM_IP_MAX + 1 }>(buf, "arm_ip")?;
        let arm_err = buf.get_u16();
        let sys_err = buf.get_u16();

        let current = get_finite_f32s::<ARM_DOF>(buf, "joint.current")?;
        let enable_byte = buf.get_u8();
        if enable_byte & 0x80 != 0 {
            return Err(ProtocolError::InvalidValue {
                field: "joint.enable",
                value: enable_byte as i64,
            });
        }
        let enabled = JointEnableFlags::from(u8::new(enable_byte)).to_array();
        let mut err_code = [0u16; ARM_DOF];
        err_code.iter_mut().for_each(|e| *e = buf.get_u16());
        let position = get_finite_f32s::<ARM_DOF>(buf, "joint.position")?;
        let temperature = get_finite_f32s::<ARM_DOF>(buf, "joint.temperature")?;
        let voltage = get_finite_f32s::<ARM_DOF>(buf, "joint.voltage")?;

        let joints = std::array::from_fn(|i| JointState {
            current: current[i],
            enabled: enabled[i],
            err_code: err_code[i],
            position: position[i],
            temperature: temperature[i],
            voltage: voltage[i],
        });

        let force = decode_force(buf)?;
        let pose = Pose::decode(buf)?;

        Ok(Self {
            arm_ip,
            arm_err,
            sys_err,
            joints,
            force,
            pose,
        })
    }
}

// ============================================================================
// 事件推送
// ============================================================================

/// 到位设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ArrivalDevice {
    Joint = 0,
    Gripper = 1,
    DexterousHand = 2,
    Lift = 3,
    ExpandJoint = 4,
    /// 保留编号，原样保留
    #[num_enum(catch_all)]
    Reserved(u8),
}

impl ArrivalDevice {
    pub fn as_u8(self) -> u8 {
        match self {
            ArrivalDevice::Joint => 0,
            ArrivalDevice::Gripper => 1,
            ArrivalDevice::DexterousHand => 2,
            ArrivalDevice::Lift => 3,
            ArrivalDevice::ExpandJoint => 4,
            ArrivalDevice::Reserved(raw) => raw,
        }
    }
}

/// 事件推送 (kind 0x02)
///
/// 每种事件只携带与自身相关的字段。线路上无关字段写 0，解码时不读取。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventPush {
    #[default]
    None,
    /// 当前轨迹到位
    TrajectoryReached {
        /// 到位状态
        arrived: bool,
        device: ArrivalDevice,
        /// 是否连接下一条轨迹
        chain_next: bool,
    },
    /// 在线编程运行结束
    ProgramFinished { program_id: i32 },
}

const EVENT_NONE: u8 = 0;
const EVENT_TRAJECTORY_REACHED: u8 = 1;
const EVENT_PROGRAM_FINISHED: u8 = 2;

impl EventPush {
    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        let (kind, arrived, device, chain, program_id) = match *self {
            EventPush::None => (EVENT_NONE, false, 0, false, 0),
            EventPush::TrajectoryReached {
                arrived,
                device,
                chain_next,
            } => (
                EVENT_TRAJECTORY_REACHED,
                arrived,
                device.as_u8(),
                chain_next,
                0,
            ),
            EventPush::ProgramFinished { program_id } => {
                (EVENT_PROGRAM_FINISHED, false, 0, false, program_id)
            },
        };
        out.put_u8(kind);
        out.put_u8(arrived as u8);
        out.put_u8(device);
        out.put_u8(chain as u8);
        out.put_i32(program_id);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let kind = buf.get_u8();
        match kind {
            EVENT_NONE => Ok(EventPush::None),
            EVENT_TRAJECTORY_REACHED => {
                let arrived = get_flag(buf, "event.trajectory_state")?;
                let device = ArrivalDevice::from(buf.get_u8());
                let chain_next = get_flag(buf, "event.trajectory_connect")?;
                Ok(EventPush::TrajectoryReached {
                    arrived,
                    device,
                    chain_next,
                })
            },
            EVENT_PROGRAM_FINISHED => {
                buf.advance(3);
                Ok(EventPush::ProgramFinished {
                    program_id: buf.get_i32(),
                })
            },
            other => Err(ProtocolError::InvalidValue {
                field: "event.kind",
                value: other as i64,
            }),
        }
    }
}

// ============================================================================
// 指令应答
// ============================================================================

/// 指令应答 (kind 0x03)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandAck {
    /// 0：成功；其他：控制器拒绝原因
    pub code: i32,
}

impl CommandAck {
    pub const ACCEPTED: CommandAck = CommandAck { code: 0 };

    pub fn is_accepted(&self) -> bool {
        self.code == 0
    }

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        out.put_i32(self.code);
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        Ok(Self {
            code: buf.get_i32(),
        })
    }
}

// ============================================================================
// 在线程序运行状态
// ============================================================================

/// 在线程序运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum RunState {
    /// 未开始
    NotStarted = 0,
    /// 运行中
    Running = 1,
    /// 暂停中
    Paused = 2,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::NotStarted
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::NotStarted => "NotStarted",
            RunState::Running => "Running",
            RunState::Paused => "Paused",
        };
        f.write_str(name)
    }
}

/// 循环指令计数（所在行 → 已执行次数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopCount {
    pub line: i32,
    pub count: u32,
}

/// 在线程序运行状态报告 (kind 0x04)
///
/// `total_loop` 字段即有效循环计数对的数量，线路上两张定长表各 100 项，
/// 超出部分写 0 且解码时忽略。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgramRunReport {
    pub run_state: RunState,
    /// 单步模式
    pub step_mode: bool,
    /// 全局规划速度比例（0 表示未设置）
    pub plan_speed: u8,
    /// 运行中的轨迹编号
    pub program_id: i32,
    /// 上次编辑的在线编程编号
    pub edit_id: i32,
    /// 当前运行行数
    pub current_line: i32,
    pub loops: Vec<LoopCount>,
}

impl ProgramRunReport {
    /// 循环指令数量
    pub fn total_loop(&self) -> usize {
        self.loops.len()
    }

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        let pairs = &self.loops[..self.loops.len().min(MAX_LOOP_PAIRS)];
        out.put_u8(self.run_state as u8);
        out.put_u8(self.step_mode as u8);
        out.put_u8(self.plan_speed);
        out.put_u8(0);
        out.put_i32(self.program_id);
        out.put_i32(self.edit_id);
        out.put_i32(self.current_line);
        out.put_i32(pairs.len() as i32);
        for i in 0..MAX_LOOP_PAIRS {
            out.put_i32(pairs.get(i).map_or(0, |p| p.line));
        }
        for i in 0..MAX_LOOP_PAIRS {
            out.put_i32(pairs.get(i).map_or(0, |p| p.count as i32));
        }
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let raw_state = buf.get_u8();
        let run_state = RunState::try_from(raw_state).map_err(|_| ProtocolError::InvalidValue {
            field: "run_state",
            value: raw_state as i64,
        })?;
        let step_mode = get_flag(buf, "step_mode")?;
        let plan_speed = buf.get_u8();
        if plan_speed > PLAN_SPEED_MAX {
            return Err(ProtocolError::InvalidValue {
                field: "plan_speed",
                value: plan_speed as i64,
            });
        }
        buf.advance(1);
        let program_id = buf.get_i32();
        let edit_id = buf.get_i32();
        let current_line = buf.get_i32();
        let total_loop = buf.get_i32();
        if !(0..=MAX_LOOP_PAIRS as i32).contains(&total_loop) {
            return Err(ProtocolError::InvalidValue {
                field: "total_loop",
                value: total_loop as i64,
            });
        }

        let mut lines = [0i32; MAX_LOOP_PAIRS];
        let mut counts = [0i32; MAX_LOOP_PAIRS];
        lines.iter_mut().for_each(|l| *l = buf.get_i32());
        counts.iter_mut().for_each(|c| *c = buf.get_i32());

        let loops = (0..total_loop as usize)
            .map(|i| {
                u32::try_from(counts[i])
                    .map(|count| LoopCount {
                        line: lines[i],
                        count,
                    })
                    .map_err(|_| ProtocolError::InvalidValue {
                        field: "loop_cont",
                        value: counts[i] as i64,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            run_state,
            step_mode,
            plan_speed,
            program_id,
            edit_id,
            current_line,
            loops,
        })
    }
}
