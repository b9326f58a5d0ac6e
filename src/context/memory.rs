//! 短期记忆：带时间戳的有界环形缓冲
//!
//! 容量默认 100，超出后从最旧的条目开始淘汰；每次追加后立即保证 len <= capacity。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_SHORT_TERM_CAPACITY: usize = 100;

/// 一条短期记忆：写入时间 + 任意负载
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl MemoryEntry {
    pub fn now(data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            data,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShortTermMemory {
    entries: VecDeque<MemoryEntry>,
    capacity: usize,
}

impl Default for ShortTermMemory {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT_TERM_CAPACITY)
    }
}

impl ShortTermMemory {
    /// 容量限制在 1..=DEFAULT_SHORT_TERM_CAPACITY
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, DEFAULT_SHORT_TERM_CAPACITY);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 从已有条目重建（例如 restore），超出容量的旧条目被丢弃
    pub fn from_entries(entries: Vec<MemoryEntry>, capacity: usize) -> Self {
        let mut memory = Self::new(capacity);
        memory.entries.extend(entries);
        memory.prune();
        memory
    }

    /// 追加一条记忆，返回因此被淘汰的条目数
    pub fn push(&mut self, data: Value) -> usize {
        self.push_entry(MemoryEntry::now(data))
    }

    pub fn push_entry(&mut self, entry: MemoryEntry) -> usize {
        self.entries.push_back(entry);
        self.prune()
    }

    /// 裁剪到容量上限，返回被淘汰的条目数
    pub fn prune(&mut self) -> usize {
        let excess = self.entries.len().saturating_sub(self.capacity);
        self.entries.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    /// 最近 n 条，按写入顺序（旧 → 新）
    pub fn recent(&self, n: usize) -> Vec<MemoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<MemoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
