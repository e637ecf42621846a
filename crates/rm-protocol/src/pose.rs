//! 位姿类型
//!
//! 控制器同时上报位置、四元数与欧拉角三种表示，它们描述的是同一个姿态。
//! 这里提供基于 `nalgebra` 的相互转换，解码时不做一致性校验（以控制器为准）。

use bytes::{Buf, BufMut};
use nalgebra::{Quaternion as NaQuaternion, UnitQuaternion};

use crate::{ProtocolError, get_finite_f32s};

/// 位置（单位：m）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 四元数（w, x, y, z）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

/// 欧拉角（单位：rad，rx/ry/rz 即 roll/pitch/yaw）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Euler {
    pub rx: f32,
    pub ry: f32,
    pub rz: f32,
}

impl Quaternion {
    fn to_unit(self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_quaternion(NaQuaternion::new(self.w, self.x, self.y, self.z))
    }

    /// 转换为欧拉角
    pub fn to_euler(self) -> Euler {
        let (rx, ry, rz) = self.to_unit().euler_angles();
        Euler { rx, ry, rz }
    }
}

impl Euler {
    /// 转换为单位四元数
    pub fn to_quaternion(self) -> Quaternion {
        let q = UnitQuaternion::from_euler_angles(self.rx, self.ry, self.rz);
        Quaternion {
            w: q.w,
            x: q.i,
            y: q.j,
            z: q.k,
        }
    }
}

/// 末端位姿
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pose {
    pub position: Position,
    pub quaternion: Quaternion,
    pub euler: Euler,
}

impl Pose {
    /// 位姿在线路上的字节数（3 + 4 + 3 个 f32）
    pub const WIRE_LEN: usize = 40;

    /// 由位置与欧拉角构造，四元数由欧拉角推导
    pub fn from_position_euler(position: Position, euler: Euler) -> Self {
        Self {
            position,
            quaternion: euler.to_quaternion(),
            euler,
        }
    }

    pub(crate) fn encode(&self, out: &mut impl BufMut) {
        let p = &self.position;
        let q = &self.quaternion;
        let e = &self.euler;
        for v in [p.x, p.y, p.z, q.w, q.x, q.y, q.z, e.rx, e.ry, e.rz] {
            out.put_f32(v);
        }
    }

    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        let [x, y, z] = get_finite_f32s::<3>(buf, "pose.position")?;
        let [qw, qx, qy, qz] = get_finite_f32s::<4>(buf, "pose.quaternion")?;
        let [rx, ry, rz] = get_finite_f32s::<3>(buf, "pose.euler")?;
        Ok(Self {
            position: Position { x, y, z },
            quaternion: Quaternion {
                w: qw,
                x: qx,
                y: qy,
                z: qz,
            },
            euler: Euler { rx, ry, rz },
        })
    }
}
