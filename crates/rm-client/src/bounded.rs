//! 有界列表
//!
//! 控制器侧的定长表（100 项循环计数、5 个包络球等）在这里是显式的有界容器：
//! 超出容量返回 `CapacityExceeded`，不会静默截断。

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub struct BoundedVec<T, const N: usize> {
    items: Vec<T>,
    what: &'static str,
}

impl<T, const N: usize> BoundedVec<T, N> {
    /// `what` 用于错误信息（如 "loop counters"）
    pub fn new(what: &'static str) -> Self {
        Self {
            items: Vec::new(),
            what,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= N
    }

    /// 追加一项，已满时返回 `CapacityExceeded` 且列表不变
    pub fn push(&mut self, item: T) -> Result<(), ClientError> {
        if self.is_full() {
            return Err(ClientError::CapacityExceeded {
                what: self.what,
                current: self.items.len(),
                limit: N,
            });
        }
        self.items.push(item);
        Ok(())
    }

    /// 用一组数据整体替换，超出容量时保持原内容
    pub fn replace_all(&mut self, items: Vec<T>) -> Result<(), ClientError> {
        if items.len() > N {
            return Err(ClientError::CapacityExceeded {
                what: self.what,
                current: items.len(),
                limit: N,
            });
        }
        self.items = items;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }
}
