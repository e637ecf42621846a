//! 帧编解码
//!
//! `decode` 对每种报文执行严格的整帧校验：帧头魔数、kind、负载长度
//! 与该 kind 的定长必须完全一致，任何字段越界都返回
//! [`DecodeError::Malformed`]。`encode` 总是成功。

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::control::Command;
use crate::feedback::{CommandAck, EventPush, ProgramRunReport, RealtimeArmState};
use crate::ids::{FRAME_MAGIC, HEADER_LEN, MAX_PAYLOAD_LEN, MessageKind};
use crate::{DecodeError, ProtocolError};

/// 帧内容
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// 实时状态广播
    Telemetry(Box<RealtimeArmState>),
    /// 事件推送
    Event(EventPush),
    /// 指令应答
    Ack(CommandAck),
    /// 在线程序运行状态（`QueryProgramState` 的应答）
    ProgramState(ProgramRunReport),
    /// 下行指令
    Command(Command),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Telemetry(_) => MessageKind::Telemetry,
            Message::Event(_) => MessageKind::Event,
            Message::Ack(_) => MessageKind::CommandAck,
            Message::ProgramState(_) => MessageKind::ProgramState,
            Message::Command(cmd) => cmd.kind(),
        }
    }
}

/// 带帧头信息的报文
///
/// `seq` 用于指令与应答的关联；主动推送的报文（广播、事件）为 0。
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub seq: u16,
    pub message: Message,
}

impl Envelope {
    pub fn new(seq: u16, message: Message) -> Self {
        Self { seq, message }
    }

    /// 主动推送（seq = 0）
    pub fn unsolicited(message: Message) -> Self {
        Self { seq: 0, message }
    }
}

/// 编码一帧
pub fn encode(envelope: &Envelope) -> Bytes {
    let kind = envelope.message.kind();
    let payload_len = kind.payload_len();
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload_len);

    out.put_u16(FRAME_MAGIC);
    out.put_u8(kind.as_u8());
    out.put_u8(0); // flags: 保留
    out.put_u16(envelope.seq);
    out.put_u16(payload_len as u16);

    match &envelope.message {
        Message::Telemetry(state) => state.encode(&mut out),
        Message::Event(event) => event.encode(&mut out),
        Message::Ack(ack) => ack.encode(&mut out),
        Message::ProgramState(report) => report.encode(&mut out),
        Message::Command(cmd) => cmd.encode(&mut out),
    }

    debug_assert_eq!(out.len(), HEADER_LEN + payload_len);
    out.freeze()
}

/// 编码一条下行指令
pub fn encode_command(seq: u16, command: &Command) -> Bytes {
    encode(&Envelope::new(seq, Message::Command(command.clone())))
}

/// 解码一帧
///
/// # 错误
/// 返回 `DecodeError::Malformed`，调用方应丢弃该帧并继续。
pub fn decode(frame: &[u8]) -> Result<Envelope, DecodeError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: HEADER_LEN,
            actual: frame.len(),
        }
        .into());
    }

    let mut buf = frame;
    let magic = buf.get_u16();
    if magic != FRAME_MAGIC {
        return Err(ProtocolError::InvalidMagic { found: magic }.into());
    }
    let raw_kind = buf.get_u8();
    let kind =
        MessageKind::from_u8(raw_kind).ok_or(ProtocolError::UnknownKind { kind: raw_kind })?;
    let _flags = buf.get_u8();
    let seq = buf.get_u16();
    let payload_len = buf.get_u16() as usize;

    // 帧头声明长度、实际长度、kind 定长三者必须一致
    if payload_len != buf.len() {
        return Err(ProtocolError::InvalidLength {
            expected: payload_len,
            actual: buf.len(),
        }
        .into());
    }
    if payload_len != kind.payload_len() {
        return Err(ProtocolError::InvalidLength {
            expected: kind.payload_len(),
            actual: payload_len,
        }
        .into());
    }

    let message = match kind {
        MessageKind::Telemetry => Message::Telemetry(Box::new(RealtimeArmState::decode(&mut buf)?)),
        MessageKind::Event => Message::Event(EventPush::decode(&mut buf)?),
        MessageKind::CommandAck => Message::Ack(CommandAck::decode(&mut buf)?),
        MessageKind::ProgramState => Message::ProgramState(ProgramRunReport::decode(&mut buf)?),
        command_kind => Message::Command(Command::decode(command_kind, &mut buf)?),
    };

    Ok(Envelope { seq, message })
}

/// 从字节流头部探测一帧的总长度（流式传输重组用）
///
/// - `Ok(None)`：帧头尚未收全
/// - `Ok(Some(n))`：完整帧长度为 `n`（可能尚未收全）
/// - `Err(_)`：魔数错误或声明长度超过上限，流已失步
pub fn frame_len(stream: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if stream.len() < HEADER_LEN {
        return Ok(None);
    }
    let magic = u16::from_be_bytes([stream[0], stream[1]]);
    if magic != FRAME_MAGIC {
        return Err(ProtocolError::InvalidMagic { found: magic });
    }
    let payload_len = u16::from_be_bytes([stream[6], stream[7]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: MAX_PAYLOAD_LEN,
            actual: payload_len,
        });
    }
    Ok(Some(HEADER_LEN + payload_len))
}

/// 在字节流中查找下一个魔数位置（失步后重新同步用）
pub fn find_magic(stream: &[u8]) -> Option<usize> {
    let magic = FRAME_MAGIC.to_be_bytes();
    stream.windows(2).position(|w| w == magic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimePushConfig;
    use crate::constants::{ARM_DOF, MAX_LOOP_PAIRS};
    use crate::feedback::{
        ArrivalDevice, ForceFrame, ForceReading, ForceSample, JointState, LoopCount, RunState,
    };
    use crate::ids::TELEMETRY_PAYLOAD_LEN;
    use crate::pose::{Euler, Pose, Position, Quaternion};
    use proptest::prelude::*;

    fn sample_state() -> RealtimeArmState {
        RealtimeArmState {
            arm_ip: "192.168.1.18".to_string(),
            arm_err: 0x1001,
            sys_err: 0x0002,
            joints: std::array::from_fn(|i| JointState {
                current: 100.0 + i as f32,
                enabled: i % 2 == 0,
                err_code: i as u16,
                position: -10.5 * i as f32,
                temperature: 35.0,
                voltage: 48.2,
            }),
            force: Some(ForceSample {
                frame: ForceFrame::Work,
                reading: ForceReading::SixAxis {
                    raw: [1.0, 2.0, 3.0, 0.1, 0.2, 0.3],
                    zero_referenced: [0.5, 1.5, 2.5, 0.0, 0.1, 0.2],
                },
            }),
            pose: Pose::from_position_euler(
                Position {
                    x: 0.3,
                    y: -0.1,
                    z: 0.45,
                },
                Euler {
                    rx: 3.1,
                    ry: 0.0,
                    rz: 1.57,
                },
            ),
        }
    }

    #[test]
    fn test_telemetry_roundtrip() {
        let env = Envelope::unsolicited(Message::Telemetry(Box::new(sample_state())));
        let bytes = encode(&env);
        assert_eq!(bytes.len(), HEADER_LEN + TELEMETRY_PAYLOAD_LEN);
        assert_eq!(decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_decode_rejects_short_header() {
        let err = decode(&[0x52, 0x4D, 0x01]).unwrap_err();
        assert_eq!(err.code(), DecodeError::CODE);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = encode(&Envelope::unsolicited(Message::Ack(CommandAck::ACCEPTED))).to_vec();
        bytes[0] = 0x00;
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Malformed(ProtocolError::InvalidMagic {
                found: 0x004D
            }))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut bytes = encode(&Envelope::unsolicited(Message::Ack(CommandAck::ACCEPTED))).to_vec();
        bytes[2] = 0x7E;
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Malformed(ProtocolError::UnknownKind {
                kind: 0x7E
            }))
        );
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let bytes = encode(&Envelope::unsolicited(Message::Telemetry(Box::new(
            sample_state(),
        ))));
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            decode(truncated),
            Err(DecodeError::Malformed(ProtocolError::InvalidLength { .. }))
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode(&Envelope::unsolicited(Message::Event(
            EventPush::ProgramFinished { program_id: 1 },
        )))
        .to_vec();
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_header_len_not_matching_kind() {
        // 帧头声明 4 字节，但 Event 定长 8 字节
        let mut bytes = vec![0x52, 0x4D, 0x02, 0x00, 0x00, 0x00, 0x00, 0x04];
        bytes.extend_from_slice(&[0u8; 4]);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Malformed(ProtocolError::InvalidLength {
                expected: 8,
                actual: 4
            }))
        );
    }

    #[test]
    fn test_seq_is_preserved() {
        let bytes = encode_command(0xBEEF, &Command::QueryProgramState);
        let env = decode(&bytes).unwrap();
        assert_eq!(env.seq, 0xBEEF);
        assert_eq!(env.message, Message::Command(Command::QueryProgramState));
    }

    #[test]
    fn test_frame_len_from_header() {
        let bytes = encode(&Envelope::unsolicited(Message::Ack(CommandAck { code: 5 })));
        assert_eq!(frame_len(&bytes[..3]), Ok(None));
        assert_eq!(frame_len(&bytes), Ok(Some(HEADER_LEN + 4)));
        assert!(frame_len(&[0u8; 8]).is_err());

        let oversized = [0x52, 0x4D, 0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF];
        assert!(frame_len(&oversized).is_err());
    }

    #[test]
    fn test_find_magic() {
        assert_eq!(find_magic(&[0x00, 0x11, 0x52, 0x4D, 0x01]), Some(2));
        assert_eq!(find_magic(&[0x52]), None);
    }

    // ========================================================================
    // 属性测试：所有报文类型的 encode → decode 往返
    // ========================================================================

    fn finite() -> impl Strategy<Value = f32> {
        -1.0e4f32..1.0e4f32
    }

    fn arb_force() -> impl Strategy<Value = Option<ForceSample>> {
        let frame = prop_oneof![
            Just(ForceFrame::Sensor),
            Just(ForceFrame::Work),
            Just(ForceFrame::Tool)
        ];
        let reading = prop_oneof![
            (finite(), finite()).prop_map(|(fz, zero_fz)| ForceReading::SingleAxis { fz, zero_fz }),
            (
                prop::array::uniform6(finite()),
                prop::array::uniform6(finite())
            )
                .prop_map(|(raw, zero_referenced)| ForceReading::SixAxis {
                    raw,
                    zero_referenced
                }),
        ];
        prop::option::of((frame, reading).prop_map(|(frame, reading)| ForceSample { frame, reading }))
    }

    fn arb_joint() -> impl Strategy<Value = JointState> {
        (
            finite(),
            any::<bool>(),
            any::<u16>(),
            finite(),
            finite(),
            finite(),
        )
            .prop_map(
                |(current, enabled, err_code, position, temperature, voltage)| JointState {
                    current,
                    enabled,
                    err_code,
                    position,
                    temperature,
                    voltage,
                },
            )
    }

    fn arb_pose() -> impl Strategy<Value = Pose> {
        (prop::array::uniform3(finite()), prop::array::uniform4(finite()), prop::array::uniform3(finite()))
            .prop_map(|(p, q, e)| Pose {
                position: Position {
                    x: p[0],
                    y: p[1],
                    z: p[2],
                },
                quaternion: Quaternion {
                    w: q[0],
                    x: q[1],
                    y: q[2],
                    z: q[3],
                },
                euler: Euler {
                    rx: e[0],
                    ry: e[1],
                    rz: e[2],
                },
            })
    }

    fn arb_state() -> impl Strategy<Value = RealtimeArmState> {
        (
            "[0-9.]{0,15}",
            any::<u16>(),
            any::<u16>(),
            prop::array::uniform7(arb_joint()),
            arb_force(),
            arb_pose(),
        )
            .prop_map(|(arm_ip, arm_err, sys_err, joints, force, pose)| {
                RealtimeArmState {
                    arm_ip,
                    arm_err,
                    sys_err,
                    joints,
                    force,
                    pose,
                }
            })
    }

    fn arb_event() -> impl Strategy<Value = EventPush> {
        prop_oneof![
            Just(EventPush::None),
            (any::<bool>(), any::<u8>(), any::<bool>()).prop_map(|(arrived, dev, chain_next)| {
                EventPush::TrajectoryReached {
                    arrived,
                    device: ArrivalDevice::from(dev),
                    chain_next,
                }
            }),
            any::<i32>().prop_map(|program_id| EventPush::ProgramFinished { program_id }),
        ]
    }

    fn arb_report() -> impl Strategy<Value = ProgramRunReport> {
        (
            prop_oneof![
                Just(RunState::NotStarted),
                Just(RunState::Running),
                Just(RunState::Paused)
            ],
            any::<bool>(),
            0u8..=100,
            any::<i32>(),
            any::<i32>(),
            any::<i32>(),
            prop::collection::vec(
                (any::<i32>(), 0u32..=i32::MAX as u32)
                    .prop_map(|(line, count)| LoopCount { line, count }),
                0..=MAX_LOOP_PAIRS,
            ),
        )
            .prop_map(
                |(run_state, step_mode, plan_speed, program_id, edit_id, current_line, loops)| {
                    ProgramRunReport {
                        run_state,
                        step_mode,
                        plan_speed,
                        program_id,
                        edit_id,
                        current_line,
                        loops,
                    }
                },
            )
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        let push = (1u16..=1000, any::<bool>(), 1u16..=u16::MAX, "[a-z0-9.]{1,27}").prop_map(
            |(ticks, enable, port, ip)| {
                Command::SetRealtimePush(RealtimePushConfig {
                    cycle_ms: ticks * 5,
                    enable,
                    port,
                    force_frame: ForceFrame::Tool,
                    ip,
                })
            },
        );
        prop_oneof![
            (any::<i32>(), 0u8..=100)
                .prop_map(|(program_id, speed)| Command::StartProgram { program_id, speed }),
            Just(Command::PauseProgram),
            Just(Command::ResumeProgram),
            Just(Command::StopProgram),
            any::<bool>().prop_map(|enabled| Command::SetStepMode { enabled }),
            (1u8..=100).prop_map(|speed| Command::SetPlanSpeed { speed }),
            push,
            Just(Command::QueryProgramState),
        ]
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            arb_state().prop_map(|s| Message::Telemetry(Box::new(s))),
            arb_event().prop_map(Message::Event),
            any::<i32>().prop_map(|code| Message::Ack(CommandAck { code })),
            arb_report().prop_map(Message::ProgramState),
            arb_command().prop_map(Message::Command),
        ]
    }

    proptest! {
        #[test]
        fn prop_roundtrip(seq in any::<u16>(), message in arb_message()) {
            let env = Envelope::new(seq, message);
            let bytes = encode(&env);
            prop_assert_eq!(frame_len(&bytes), Ok(Some(bytes.len())));
            prop_assert_eq!(decode(&bytes), Ok(env));
        }

        #[test]
        fn prop_any_truncation_is_malformed(message in arb_message(), cut in 1usize..64) {
            let bytes = encode(&Envelope::unsolicited(message));
            let keep = bytes.len().saturating_sub(cut);
            prop_assert!(decode(&bytes[..keep]).is_err());
        }

        #[test]
        fn prop_decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..900)) {
            let _ = decode(&raw);
        }
    }

    #[test]
    fn test_joint_count_matches_dof() {
        assert_eq!(sample_state().joints.len(), ARM_DOF);
    }
}
