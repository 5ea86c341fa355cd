//! 轻量跟踪系统 (Tracker Adapter)
//!
//! - `ObjectTracker`:     跟踪器能力接口, 每个跟踪ID独立状态
//! - `CheckpointTracker`: 按ID保存隐状态, 定期回滚到种子检查点以限制漂移
//! - `TrackerBackend`:    单步预测网络 (图像对 + 上一框 → 新框 + 隐状态)
//! - `TemplateBackend`:   基于模板匹配的参考实现
pub mod checkpoint;
pub mod template;

pub use checkpoint::{CheckpointTracker, TrackedObject};
pub use template::TemplateBackend;

use std::sync::Arc;

use image::RgbImage;

use crate::error::TrackError;
use crate::types::{BBox, TrackId};

/// 跟踪器隐状态. 核心逻辑只复制或丢弃, 从不解析内容.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HiddenState(Arc<[u8]>);

impl HiddenState {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// 跟踪器能力接口
pub trait ObjectTracker {
    /// 全部ID状态的快照
    type Snapshot;

    /// 跟踪一步.
    ///
    /// 给出 `seed` 时以该框在 `image` 上重新锚定, 原样返回 `seed`;
    /// 否则要求该ID已被锚定过, 返回新的预测框并更新隐状态.
    fn track(
        &mut self,
        id: TrackId,
        image: &Arc<RgbImage>,
        seed: Option<BBox>,
    ) -> Result<BBox, TrackError>;

    /// 该ID是否已有种子框
    fn is_seeded(&self, id: TrackId) -> bool;

    /// 清空所有ID的状态
    fn reset(&mut self);

    fn snapshot(&self) -> Self::Snapshot;

    /// 回滚到快照时的状态 (一组 `track` 调用中途失败时使用)
    fn restore(&mut self, snapshot: Self::Snapshot);
}

/// 单步预测网络
pub trait TrackerBackend: Send {
    /// 从 `prev_image` 上的 `prev_bbox` 出发, 预测目标在 `image` 上的位置
    fn step(
        &mut self,
        prev_image: &RgbImage,
        prev_bbox: &BBox,
        image: &RgbImage,
        hidden: Option<&HiddenState>,
    ) -> Result<(BBox, HiddenState), TrackError>;
}
