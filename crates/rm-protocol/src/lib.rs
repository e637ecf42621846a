//! # RM Protocol
//!
//! 机械臂控制器以太网协议定义（无 IO 依赖）
//!
//! ## 模块
//!
//! - `ids`: 报文类型（kind）与帧头常量
//! - `constants`: 协议常量定义（关节数、容量上限、名称长度）
//! - `pose`: 位姿类型（位置 + 四元数 + 欧拉角）
//! - `feedback`: 控制器上行报文（实时状态、事件、应答、程序状态）
//! - `control`: 下行指令
//! - `config`: 实时推送配置
//! - `codec`: 帧编解码入口（`encode` / `decode`）
//!
//! ## 字节序
//!
//! 所有多字节整数与浮点数均为大端字节序（网络字节序）。
//! 本模块提供了字节序转换与定长字符串工具函数。

pub mod codec;
pub mod config;
pub mod constants;
pub mod control;
pub mod feedback;
pub mod ids;
pub mod pose;

// 重新导出常用类型
pub use codec::*;
pub use config::*;
pub use constants::*;
pub use control::*;
pub use feedback::*;
pub use ids::*;
pub use pose::*;

use bytes::{Buf, BufMut};
use thiserror::Error;

/// 协议解析错误类型
///
/// 描述一帧为何被判定为畸形。上层通常只关心 [`DecodeError`]，
/// 本类型作为其内部原因保留，便于诊断日志输出。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid magic: 0x{found:04X}")]
    InvalidMagic { found: u16 },

    #[error("Unknown message kind: 0x{kind:02X}")]
    UnknownKind { kind: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: i64 },

    #[error("Invalid string in field {field}")]
    InvalidString { field: &'static str },

    #[error("Non-finite value in field {field}")]
    NonFinite { field: &'static str },
}

/// 解码错误
///
/// 对应控制器 SDK 对外约定的 `-3`（数据解析失败）。接收端必须把它当作
/// "丢弃一帧"，而不是致命错误。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed frame (code {code}): {0}", code = DecodeError::CODE)]
    Malformed(#[from] ProtocolError),
}

impl DecodeError {
    /// 对外暴露的错误码
    pub const CODE: i32 = -3;

    pub fn code(&self) -> i32 {
        Self::CODE
    }

    /// 具体的畸形原因
    pub fn reason(&self) -> &ProtocolError {
        match self {
            DecodeError::Malformed(reason) => reason,
        }
    }
}

/// 写入定长、以 NUL 结尾的字符串字段
///
/// 超出 `N - 1` 字节的部分在字符边界处截断（编码不会失败，
/// 长度校验由调用方在编码前完成）。
pub fn put_fixed_str<const N: usize>(out: &mut impl BufMut, value: &str) {
    let mut end = value.len().min(N - 1);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut field = [0u8; N];
    field[..end].copy_from_slice(&value.as_bytes()[..end]);
    out.put_slice(&field);
}

/// 读取定长、以 NUL 结尾的字符串字段
///
/// 字段内必须至少有一个 NUL，且 NUL 之前的内容必须是合法 UTF-8。
/// 调用方需保证 `buf` 剩余长度不少于 `N`。
pub fn get_fixed_str<const N: usize>(
    buf: &mut impl Buf,
    field: &'static str,
) -> Result<String, ProtocolError> {
    let mut raw = [0u8; N];
    buf.copy_to_slice(&mut raw);
    let end = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::InvalidString { field })?;
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidString { field })
}

/// 读取 `N` 个有限值 f32
pub fn get_finite_f32s<const N: usize>(
    buf: &mut impl Buf,
    field: &'static str,
) -> Result<[f32; N], ProtocolError> {
    let mut values = [0.0f32; N];
    for v in values.iter_mut() {
        *v = buf.get_f32();
        if !v.is_finite() {
            return Err(ProtocolError::NonFinite { field });
        }
    }
    Ok(values)
}

/// 读取布尔字节（仅接受 0/1）
pub fn get_flag(buf: &mut impl Buf, field: &'static str) -> Result<bool, ProtocolError> {
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::InvalidValue {
            field,
            value: other as i64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_fixed_str_truncates_at_char_boundary() {
        let mut out = BytesMut::new();
        // 5 个两字节字符 = 10 字节，字段容量 8 (最多 7 字节内容)
        put_fixed_str::<8>(&mut out, "ééééé");
        assert_eq!(out.len(), 8);
        let mut buf = &out[..];
        let s = get_fixed_str::<8>(&mut buf, "name").unwrap();
        assert_eq!(s, "ééé");
    }

    #[test]
    fn test_fixed_str_requires_nul() {
        let raw = [b'a'; 4];
        let mut buf = &raw[..];
        assert_eq!(
            get_fixed_str::<4>(&mut buf, "ip"),
            Err(ProtocolError::InvalidString { field: "ip" })
        );
    }

    #[test]
    fn test_fixed_str_rejects_invalid_utf8() {
        let raw = [0xFF, 0xFE, 0x00, 0x00];
        let mut buf = &raw[..];
        assert!(get_fixed_str::<4>(&mut buf, "ip").is_err());
    }

    #[test]
    fn test_finite_f32s_rejects_nan() {
        let mut out = BytesMut::new();
        out.put_f32(1.0);
        out.put_f32(f32::NAN);
        let mut buf = &out[..];
        assert_eq!(
            get_finite_f32s::<2>(&mut buf, "pose"),
            Err(ProtocolError::NonFinite { field: "pose" })
        );
    }

    #[test]
    fn test_get_flag() {
        let raw = [0u8, 1, 2];
        let mut buf = &raw[..];
        assert_eq!(get_flag(&mut buf, "f"), Ok(false));
        assert_eq!(get_flag(&mut buf, "f"), Ok(true));
        assert!(get_flag(&mut buf, "f").is_err());
    }

    #[test]
    fn test_decode_error_code() {
        let err = DecodeError::from(ProtocolError::UnknownKind { kind: 0x7F });
        assert_eq!(err.code(), -3);
        assert_eq!(err.reason(), &ProtocolError::UnknownKind { kind: 0x7F });
        assert!(err.to_string().contains("code -3"));
    }
}
