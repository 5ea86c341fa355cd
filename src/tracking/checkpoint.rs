//! 带检查点的多ID跟踪器
//! Per-id hidden state with periodic rollback to the seed checkpoint

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbImage;
use tracing::trace;

use super::{HiddenState, ObjectTracker, TrackerBackend};
use crate::error::TrackError;
use crate::types::{BBox, TrackId};

/// 单个跟踪目标的状态 (由跟踪线程独占)
#[derive(Clone, Debug)]
pub struct TrackedObject {
    pub hidden_state: HiddenState,
    /// 锚定后第一步产生的隐状态
    pub checkpoint_hidden_state: HiddenState,
    pub last_bbox: BBox,
    pub last_image: Arc<RgbImage>,
    /// 自上次锚定以来的步数
    pub steps_since_reset: u32,
}

/// 跟踪器: 每 `horizon` 步把隐状态回滚到检查点, 限制两次检测之间的漂移累积
pub struct CheckpointTracker<B: TrackerBackend> {
    backend: B,
    horizon: u32,
    tracked: HashMap<TrackId, TrackedObject>,
}

impl<B: TrackerBackend> CheckpointTracker<B> {
    pub fn new(backend: B, horizon: u32) -> Self {
        Self {
            backend,
            horizon: horizon.max(1),
            tracked: HashMap::new(),
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackedObject> {
        self.tracked.get(&id)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: TrackerBackend> ObjectTracker for CheckpointTracker<B> {
    // 隐状态和图像都是 Arc, 快照只复制引用
    type Snapshot = HashMap<TrackId, TrackedObject>;

    fn track(
        &mut self,
        id: TrackId,
        image: &Arc<RgbImage>,
        seed: Option<BBox>,
    ) -> Result<BBox, TrackError> {
        let (hidden, checkpoint, past_bbox, prev_image, steps) = match seed {
            Some(seed) => (None, None, seed, image.clone(), 0),
            None => {
                let state = self.tracked.get(&id).ok_or(TrackError::Unseeded(id))?;
                (
                    Some(state.hidden_state.clone()),
                    Some(state.checkpoint_hidden_state.clone()),
                    state.last_bbox,
                    state.last_image.clone(),
                    state.steps_since_reset,
                )
            }
        };

        let (predicted, mut hidden_state) =
            self.backend
                .step(&prev_image, &past_bbox, image, hidden.as_ref())?;

        let checkpoint_hidden_state = match checkpoint {
            Some(checkpoint) if steps > 0 => checkpoint,
            _ => hidden_state.clone(),
        };

        // 回滚隐状态
        if steps > 0 && steps % self.horizon == 0 {
            trace!("track {} 隐状态回滚 (第{}步)", id, steps);
            hidden_state = checkpoint_hidden_state.clone();
        }

        let bbox = seed.unwrap_or(predicted);
        self.tracked.insert(
            id,
            TrackedObject {
                hidden_state,
                checkpoint_hidden_state,
                last_bbox: bbox,
                last_image: image.clone(),
                steps_since_reset: steps + 1,
            },
        );
        Ok(bbox)
    }

    fn is_seeded(&self, id: TrackId) -> bool {
        self.tracked.contains_key(&id)
    }

    fn reset(&mut self) {
        self.tracked.clear();
    }

    fn snapshot(&self) -> Self::Snapshot {
        self.tracked.clone()
    }

    fn restore(&mut self, snapshot: Self::Snapshot) {
        self.tracked = snapshot;
    }
}
