//! 轨迹 / 全局路点目录
//!
//! 纯查询与维护组件：读写互斥由目录内部的 `RwLock` 保证，没有其他并发约束。
//! 分页视图的 `total_size` 永远等于实际存储（过滤后）的条目数，不维护独立计数器。

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rm_protocol::{
    ARM_DOF, CATALOG_CAPACITY, CATALOG_PAGE_CAPACITY, FRAME_NAME_MAX, PLAN_SPEED_MAX, Pose, SEARCH_FILTER_MAX,
    TRAJECTORY_NAME_MAX, WAYPOINT_NAME_MAX,
};
use tracing::debug;

use crate::error::ClientError;

/// 校验名称：非空且不超过 `max` 字节
pub(crate) fn check_name(field: &str, value: &str, max: usize) -> Result<(), ClientError> {
    if value.is_empty() {
        return Err(ClientError::InvalidInput(format!("{} must not be empty", field)));
    }
    if value.len() > max {
        return Err(ClientError::InvalidInput(format!(
            "{} exceeds {} bytes: {:?}",
            field, max, value
        )));
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 目录条目
pub trait CatalogRecord: Clone {
    type Key: Ord + Clone + fmt::Display;

    /// 条目类型名（用于错误信息）
    const KIND: &'static str;

    fn key(&self) -> Self::Key;

    /// 搜索用名称
    fn name(&self) -> &str;

    fn validate(&self) -> Result<(), ClientError>;

    fn set_modified_at(&mut self, ms: u64);
}

/// 在线编程轨迹文件
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrajectoryRecord {
    pub id: i32,
    /// 文件名（≤31 字节）
    pub name: String,
    /// 文件大小
    pub size: u32,
    /// 运行速度比例（0-100）
    pub speed: u8,
    /// 最后修改时间（Unix 毫秒）
    pub modified_at_ms: u64,
}

impl TrajectoryRecord {
    pub fn new(id: i32, name: impl Into<String>, size: u32, speed: u8) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            speed,
            modified_at_ms: 0,
        }
    }
}

impl CatalogRecord for TrajectoryRecord {
    type Key = i32;
    const KIND: &'static str = "trajectory";

    fn key(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), ClientError> {
        check_name("trajectory name", &self.name, TRAJECTORY_NAME_MAX)?;
        if self.speed > PLAN_SPEED_MAX {
            return Err(ClientError::InvalidInput(format!(
                "trajectory speed must be 0..={}, got {}",
                PLAN_SPEED_MAX, self.speed
            )));
        }
        Ok(())
    }

    fn set_modified_at(&mut self, ms: u64) {
        self.modified_at_ms = ms;
    }
}

/// 全局路点
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Waypoint {
    /// 路点名（≤19 字节，唯一）
    pub name: String,
    /// 关节角度（°）
    pub joints: [f32; ARM_DOF],
    pub pose: Pose,
    /// 工作坐标系名（≤11 字节）
    pub work_frame: String,
    /// 工具坐标系名（≤11 字节）
    pub tool_frame: String,
    pub modified_at_ms: u64,
}

impl Waypoint {
    pub fn new(
        name: impl Into<String>,
        joints: [f32; ARM_DOF],
        pose: Pose,
        work_frame: impl Into<String>,
        tool_frame: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            joints,
            pose,
            work_frame: work_frame.into(),
            tool_frame: tool_frame.into(),
            modified_at_ms: 0,
        }
    }
}

impl CatalogRecord for Waypoint {
    type Key = String;
    const KIND: &'static str = "waypoint";

    fn key(&self) -> String {
        self.name.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<(), ClientError> {
        check_name("waypoint name", &self.name, WAYPOINT_NAME_MAX)?;
        check_name("work frame name", &self.work_frame, FRAME_NAME_MAX)?;
        check_name("tool frame name", &self.tool_frame, FRAME_NAME_MAX)?;
        if self.joints.iter().any(|j| !j.is_finite()) {
            return Err(ClientError::InvalidInput("waypoint joints must be finite".into()));
        }
        Ok(())
    }

    fn set_modified_at(&mut self, ms: u64) {
        self.modified_at_ms = ms;
    }
}

/// 分页结果
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// 页码（从 1 开始）
    pub page_num: usize,
    /// 实际使用的页大小（已裁剪到单页容量）
    pub page_size: usize,
    /// 满足过滤条件的条目总数
    pub total_size: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// 本页条目数
    pub fn list_len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 总页数
    pub fn page_count(&self) -> usize {
        self.total_size.div_ceil(self.page_size)
    }
}

/// 分页参数校验与裁剪，返回 (起始下标, 实际页大小)
pub(crate) fn page_window(page_num: usize, page_size: usize) -> Result<(usize, usize), ClientError> {
    if page_num == 0 || page_size == 0 {
        return Err(ClientError::InvalidInput(format!(
            "page_num and page_size must be >= 1 (got {}, {})",
            page_num, page_size
        )));
    }
    let page_size = page_size.min(CATALOG_PAGE_CAPACITY);
    let start = (page_num - 1).saturating_mul(page_size);
    Ok((start, page_size))
}

/// 分页、可按名称搜索的目录
#[derive(Debug)]
pub struct Catalog<T: CatalogRecord> {
    records: RwLock<BTreeMap<T::Key, T>>,
    capacity: usize,
}

impl<T: CatalogRecord> Catalog<T> {
    /// 容量为 [`CATALOG_CAPACITY`] 的空目录
    pub fn new() -> Self {
        Self::with_capacity(CATALOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 新增条目，记录修改时间
    ///
    /// # 错误
    /// - `ClientError::InvalidInput`: 名称为空或超长
    /// - `ClientError::Duplicate`: 键已存在
    /// - `ClientError::CapacityExceeded`: 目录已满，已有条目不受影响
    pub fn insert(&self, mut record: T) -> Result<(), ClientError> {
        record.validate()?;
        let key = record.key();
        let mut records = self.records.write();
        if records.contains_key(&key) {
            return Err(ClientError::Duplicate {
                what: T::KIND,
                key: key.to_string(),
            });
        }
        if records.len() >= self.capacity {
            return Err(ClientError::CapacityExceeded {
                what: T::KIND,
                current: records.len(),
                limit: self.capacity,
            });
        }
        record.set_modified_at(now_ms());
        debug!("Catalog insert {} {}", T::KIND, key);
        records.insert(key, record);
        Ok(())
    }

    /// 替换已有条目
    pub fn update(&self, mut record: T) -> Result<(), ClientError> {
        record.validate()?;
        let key = record.key();
        let mut records = self.records.write();
        match records.get_mut(&key) {
            Some(slot) => {
                record.set_modified_at(now_ms());
                *slot = record;
                Ok(())
            },
            None => Err(ClientError::NotFound {
                what: T::KIND,
                key: key.to_string(),
            }),
        }
    }

    pub fn remove(&self, key: &T::Key) -> Result<T, ClientError> {
        self.records
            .write()
            .remove(key)
            .ok_or_else(|| ClientError::NotFound {
                what: T::KIND,
                key: key.to_string(),
            })
    }

    pub fn get(&self, key: &T::Key) -> Option<T> {
        self.records.read().get(key).cloned()
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.records.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// 分页查询
    ///
    /// # 参数
    /// - `page_num`: 页码（从 1 开始），超出最后一页时返回空页
    /// - `page_size`: 页大小，裁剪到 100
    /// - `filter`: 名称子串（区分大小写，≤31 字节）
    ///
    /// # 错误
    /// - `ClientError::InvalidInput`: 页码/页大小为 0，或过滤串超长
    pub fn list(
        &self,
        page_num: usize,
        page_size: usize,
        filter: Option<&str>,
    ) -> Result<Page<T>, ClientError> {
        if let Some(f) = filter
            && f.len() > SEARCH_FILTER_MAX
        {
            return Err(ClientError::InvalidInput(format!(
                "search filter exceeds {} bytes",
                SEARCH_FILTER_MAX
            )));
        }
        let (start, page_size) = page_window(page_num, page_size)?;

        let records = self.records.read();
        let matches = |r: &&T| filter.is_none_or(|f| r.name().contains(f));
        let total_size = records.values().filter(matches).count();
        let items = records
            .values()
            .filter(matches)
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();

        Ok(Page {
            page_num,
            page_size,
            total_size,
            items,
        })
    }
}

impl<T: CatalogRecord> Default for Catalog<T> {
    fn default() -> Self {
        Self::new()
    }
}
