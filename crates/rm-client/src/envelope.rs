//! 工具包络
//!
//! 每个工具最多 5 个包络球。这里只做存储与校验，不做几何计算。

use rm_protocol::{FRAME_NAME_MAX, MAX_ENVELOPE_BALLS, Position};

use crate::bounded::BoundedVec;
use crate::catalog::check_name;
use crate::error::ClientError;

/// 包络球
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopeBall {
    /// 名称（≤11 字节）
    pub name: String,
    /// 半径（m）
    pub radius: f32,
    /// 球心（相对末端法兰）
    pub center: Position,
}

impl EnvelopeBall {
    pub fn new(name: impl Into<String>, radius: f32, center: Position) -> Self {
        Self {
            name: name.into(),
            radius,
            center,
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        check_name("envelope ball name", &self.name, FRAME_NAME_MAX)?;
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(ClientError::InvalidInput(format!(
                "envelope ball radius must be > 0, got {}",
                self.radius
            )));
        }
        let Position { x, y, z } = self.center;
        if ![x, y, z].iter().all(|v| v.is_finite()) {
            return Err(ClientError::InvalidInput(
                "envelope ball center must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// 工具包络球列表
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEnvelope {
    tool_name: String,
    balls: BoundedVec<EnvelopeBall, MAX_ENVELOPE_BALLS>,
}

impl ToolEnvelope {
    pub fn new(tool_name: impl Into<String>) -> Result<Self, ClientError> {
        let tool_name = tool_name.into();
        check_name("tool name", &tool_name, FRAME_NAME_MAX)?;
        Ok(Self {
            tool_name,
            balls: BoundedVec::new("envelope balls"),
        })
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// 添加包络球
    ///
    /// # 错误
    /// - `ClientError::InvalidInput`: 名称/半径/球心非法
    /// - `ClientError::Duplicate`: 同名球已存在
    /// - `ClientError::CapacityExceeded`: 已有 5 个球
    pub fn add_ball(&mut self, ball: EnvelopeBall) -> Result<(), ClientError> {
        ball.validate()?;
        if self.balls.iter().any(|b| b.name == ball.name) {
            return Err(ClientError::Duplicate {
                what: "envelope ball",
                key: ball.name,
            });
        }
        self.balls.push(ball)
    }

    pub fn remove_ball(&mut self, name: &str) -> Result<EnvelopeBall, ClientError> {
        let index = self.balls.iter().position(|b| b.name == name);
        index
            .and_then(|i| self.balls.remove(i))
            .ok_or_else(|| ClientError::NotFound {
                what: "envelope ball",
                key: name.to_string(),
            })
    }

    pub fn balls(&self) -> &[EnvelopeBall] {
        self.balls.as_slice()
    }

    pub fn len(&self) -> usize {
        self.balls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balls.is_empty()
    }

    pub fn clear(&mut self) {
        self.balls.clear();
    }
}
