//! 已发送帧注册表与帧缓存
//! Sent-frame registry and frame cache, both owned by the reconciliation thread

use std::collections::{BTreeMap, VecDeque};

use tracing::warn;

use crate::error::EngineError;
use crate::types::Frame;

/// 已发送、尚未收到检测结果的帧 (seq → Frame)
pub struct SentFrameRegistry {
    frames: BTreeMap<u64, Frame>,
    capacity: usize,
}

impl SentFrameRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// 登记一帧; 超出容量时丢弃序号最小的帧并返回
    /// (检测结果迟迟不回来时, 注册表不会无限增长)
    pub fn insert(&mut self, frame: Frame) -> Option<Frame> {
        self.frames.insert(frame.seq, frame);
        if self.frames.len() <= self.capacity {
            return None;
        }
        let (seq, evicted) = self.frames.pop_first()?;
        warn!("⚠️ 已发送帧注册表已满 ({}), 丢弃帧 #{}", self.capacity, seq);
        Some(evicted)
    }

    pub fn get(&self, seq: u64) -> Option<&Frame> {
        self.frames.get(&seq)
    }

    pub fn take(&mut self, seq: u64) -> Option<Frame> {
        self.frames.remove(&seq)
    }

    /// 删除所有 `seq <= through` 的条目, 返回被删除的序号
    pub fn prune_through(&mut self, through: u64) -> Vec<u64> {
        let kept = match through.checked_add(1) {
            Some(next) => self.frames.split_off(&next),
            None => BTreeMap::new(),
        };
        let pruned = std::mem::replace(&mut self.frames, kept);
        pruned.into_keys().collect()
    }

    pub fn seqs(&self) -> impl Iterator<Item = u64> + '_ {
        self.frames.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// 上次校正以来跟踪器处理过的帧, seq 严格递增
pub struct FrameCache {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 追加一帧; 超出容量时丢弃最旧的帧并返回
    pub fn push(&mut self, frame: Frame) -> Result<Option<Frame>, EngineError> {
        if let Some(last) = self.last_seq() {
            if frame.seq <= last {
                return Err(EngineError::OutOfOrder {
                    last,
                    got: frame.seq,
                });
            }
        }
        self.frames.push_back(frame);
        if self.frames.len() > self.capacity {
            let evicted = self.frames.pop_front();
            if let Some(frame) = &evicted {
                warn!("⚠️ 帧缓存已满 ({}), 丢弃帧 #{}", self.capacity, frame.seq);
            }
            return Ok(evicted);
        }
        Ok(None)
    }

    /// `seq > anchor` 的帧, 按缓存顺序
    pub fn after(&self, anchor: u64) -> impl Iterator<Item = &Frame> + '_ {
        self.frames.iter().filter(move |f| f.seq > anchor)
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.frames.back().map(|f| f.seq)
    }

    pub fn seqs(&self) -> impl Iterator<Item = u64> + '_ {
        self.frames.iter().map(|f| f.seq)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
