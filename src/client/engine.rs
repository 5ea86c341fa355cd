//! 校正引擎 (Reconciliation Engine)
//!
//! 状态机:
//! - `Bootstrapping`:  首帧已发送, 等待首个检测结果
//! - `SteadyTracking`: 每帧轻量跟踪一步, 按关键帧策略发送
//! - `CatchUp`:        收到检测结果 → 在对应帧上重新锚定 → 重放缓存中更新的帧
//!
//! 所有跟踪/缓存/注册表状态只在本线程内修改, 无需加锁.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::keyframe::KeyframeSelector;
use super::registry::{FrameCache, SentFrameRegistry};
use crate::config::{PipelineConfig, SeedPolicy};
use crate::error::{ChannelError, EngineError, TrackError};
use crate::tracking::ObjectTracker;
use crate::transport::FrameSender;
use crate::types::{BBox, DetectedObject, DetectedObjects, Frame, TrackId};

/// 关键帧的出口 (通常是到检测服务的帧通道)
pub trait FrameSink {
    fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError>;
}

impl FrameSink for FrameSender {
    fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        self.send(frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Bootstrapping,
    SteadyTracking,
    CatchUp,
}

/// 一次校正的记录
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcileReport {
    /// 锚定所用结果的序号
    pub anchor_seq: u64,
    /// 被重新锚定的跟踪ID
    pub seeded: Vec<TrackId>,
    /// 按顺序重放的帧
    pub replayed: Vec<u64>,
    /// 从注册表中清除的其他帧
    pub discarded: Vec<u64>,
}

/// 一次锚定+重放的暂存结果, 全部成功后才提交
struct Staged {
    boxes: BTreeMap<TrackId, BBox>,
    seeded: Vec<TrackId>,
    replayed: Vec<u64>,
}

/// 一帧的处理结果 (用于显示/输出)
#[derive(Clone, Debug)]
pub struct TrackedFrame {
    pub frame: Frame,
    pub boxes: Vec<(TrackId, BBox)>,
    pub sent: bool,
    pub reconciled: Option<ReconcileReport>,
}

pub struct ReconciliationEngine<T: ObjectTracker, S: FrameSink> {
    tracker: T,
    sink: S,
    selector: KeyframeSelector,
    registry: SentFrameRegistry,
    cache: FrameCache,
    /// 已锚定ID的当前框
    boxes: BTreeMap<TrackId, BBox>,
    max_tracked_objects: usize,
    seed_policy: SeedPolicy,
    min_seed_iou: f32,
    state: EngineState,
    last_seq: Option<u64>,
    last_anchor: Option<u64>,
    /// 上次校正失败的结果, 下一次校正时重试
    deferred: Option<DetectedObjects>,
}

impl<T: ObjectTracker, S: FrameSink> ReconciliationEngine<T, S> {
    pub fn new(tracker: T, sink: S, config: &PipelineConfig, frame_rate: u32) -> Self {
        Self {
            tracker,
            sink,
            selector: KeyframeSelector::new(config, frame_rate),
            registry: SentFrameRegistry::new(config.max_cached_frames),
            cache: FrameCache::new(config.max_cached_frames),
            boxes: BTreeMap::new(),
            max_tracked_objects: config.max_tracked_objects,
            seed_policy: config.seed_policy,
            min_seed_iou: config.min_seed_iou,
            state: EngineState::Bootstrapping,
            last_seq: None,
            last_anchor: None,
            deferred: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn registry(&self) -> &SentFrameRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn boxes(&self) -> Vec<(TrackId, BBox)> {
        self.boxes.iter().map(|(id, bbox)| (*id, *bbox)).collect()
    }

    pub fn last_anchor(&self) -> Option<u64> {
        self.last_anchor
    }

    /// 等待重试的结果序号
    pub fn deferred_seq(&self) -> Option<u64> {
        self.deferred.as_ref().map(|r| r.seq)
    }

    fn check_order(&self, seq: u64) -> Result<(), EngineError> {
        match self.last_seq {
            Some(last) if seq <= last => Err(EngineError::OutOfOrder { last, got: seq }),
            _ => Ok(()),
        }
    }

    /// 无条件发送首帧
    pub fn send_first(&mut self, frame: &Frame) -> Result<(), EngineError> {
        self.check_order(frame.seq)?;
        self.sink.send_frame(frame)?;
        self.selector.commit(frame)?;
        self.registry.insert(frame.clone());
        self.last_seq = Some(frame.seq);
        info!("📤 首帧 #{} 已发送, 等待检测结果", frame.seq);
        Ok(())
    }

    /// 用单个结果锚定 (启动阶段)
    pub fn anchor(&mut self, result: DetectedObjects) -> Result<Option<ReconcileReport>, EngineError> {
        self.reconcile(vec![result])
    }

    /// 处理一帧采集图像; `results` 为本轮非阻塞取出的全部检测结果
    pub fn process_frame(
        &mut self,
        frame: Frame,
        results: Vec<DetectedObjects>,
    ) -> Result<TrackedFrame, EngineError> {
        self.check_order(frame.seq)?;
        self.last_seq = Some(frame.seq);

        let decision = self.selector.consider(&frame)?;
        debug!(
            "diff #{:?} → #{}: {}",
            self.selector.last_sent_seq(),
            frame.seq,
            decision.diff
        );
        let mut sent = false;
        if decision.send {
            match self.sink.send_frame(&frame) {
                Ok(()) => {
                    self.selector.commit(&frame)?;
                    self.registry.insert(frame.clone());
                    sent = true;
                    debug!("📤 关键帧 #{} 已发送 (diff {})", frame.seq, decision.diff);
                }
                // 发送失败不影响本帧跟踪, 下一帧重新评估
                Err(e) => warn!("⚠️ 关键帧 #{} 发送失败: {}", frame.seq, e),
            }
        }

        self.cache.push(frame.clone())?;

        let reconciled = self.reconcile(results)?;
        let replayed_here: &[TrackId] = match &reconciled {
            Some(report) if report.replayed.contains(&frame.seq) => &report.seeded,
            _ => &[],
        };
        // 未经重放的已锚定ID在当前帧上前进一步
        let pending: Vec<TrackId> = self
            .boxes
            .keys()
            .copied()
            .filter(|id| !replayed_here.contains(id))
            .collect();
        let snapshot = self.tracker.snapshot();
        let mut stepped = Vec::with_capacity(pending.len());
        for id in pending {
            match self.tracker.track(id, &frame.image, None) {
                Ok(bbox) => stepped.push((id, bbox)),
                Err(e) => {
                    self.tracker.restore(snapshot);
                    return Err(e.into());
                }
            }
        }
        self.boxes.extend(stepped);

        Ok(TrackedFrame {
            frame,
            boxes: self.boxes(),
            sent,
            reconciled,
        })
    }

    /// 校正. 选序号最大的结果锚定, 重放缓存中更新的帧.
    /// 过期/重复/未知的结果只清理注册表, 不改变跟踪状态.
    ///
    /// 锚定和重放在暂存区进行, 全部成功后才提交; 任一步失败时跟踪器回滚,
    /// 注册表和缓存保持原样, 该结果留到下一次校正重试.
    pub fn reconcile(
        &mut self,
        results: Vec<DetectedObjects>,
    ) -> Result<Option<ReconcileReport>, EngineError> {
        let Some(latest) = results
            .into_iter()
            .chain(self.deferred.take())
            .max_by_key(|r| r.seq)
        else {
            return Ok(None);
        };
        let anchor_seq = latest.seq;

        if self.last_anchor.is_some_and(|last| anchor_seq <= last) {
            let discarded = self.registry.prune_through(anchor_seq);
            debug!("忽略过期结果 #{} (已锚定到 #{:?})", anchor_seq, self.last_anchor);
            if !discarded.is_empty() {
                debug!("清除注册表 {:?}", discarded);
            }
            return Ok(None);
        }
        let Some(key_frame) = self.registry.get(anchor_seq).cloned() else {
            // 启动阶段只认首帧的结果, 不能把首帧清掉
            let discarded = match self.state {
                EngineState::Bootstrapping => Vec::new(),
                _ => self.registry.prune_through(anchor_seq),
            };
            warn!(
                "⚠️ 结果 #{} 没有对应的已发送帧, 忽略 (清除 {:?})",
                anchor_seq, discarded
            );
            return Ok(None);
        };

        let resumed = self.state;
        self.state = EngineState::CatchUp;
        let seeds = self.assign_seeds(&latest.objects);
        let snapshot = self.tracker.snapshot();
        let staged = match self.catch_up(&key_frame, seeds) {
            Ok(staged) => staged,
            Err(e) => {
                self.tracker.restore(snapshot);
                self.state = resumed;
                warn!("⚠️ 校正 #{} 失败, 跟踪状态已回滚: {}", anchor_seq, e);
                self.deferred = Some(latest);
                return Err(e.into());
            }
        };

        self.registry.take(anchor_seq);
        let discarded = self.registry.prune_through(anchor_seq);
        self.boxes = staged.boxes;
        self.cache.clear();
        self.last_anchor = Some(anchor_seq);
        self.state = EngineState::SteadyTracking;

        info!(
            "🎯 校正: 锚定 #{} ids {:?}, 重放 {:?}, 清除 {:?}",
            anchor_seq, staged.seeded, staged.replayed, discarded
        );
        Ok(Some(ReconcileReport {
            anchor_seq,
            seeded: staged.seeded,
            replayed: staged.replayed,
            discarded,
        }))
    }

    /// 在关键帧上锚定, 再依次重放缓存中更新的帧. 结果只写入暂存区.
    fn catch_up(
        &mut self,
        key_frame: &Frame,
        seeds: Vec<(TrackId, BBox)>,
    ) -> Result<Staged, TrackError> {
        let mut boxes = self.boxes.clone();
        let mut seeded = Vec::with_capacity(seeds.len());
        for (id, seed) in seeds {
            let bbox = self.tracker.track(id, &key_frame.image, Some(seed))?;
            boxes.insert(id, bbox);
            seeded.push(id);
        }

        let mut replayed = Vec::new();
        if !seeded.is_empty() {
            for frame in self.cache.after(key_frame.seq) {
                for &id in &seeded {
                    let bbox = self.tracker.track(id, &frame.image, None)?;
                    boxes.insert(id, bbox);
                }
                replayed.push(frame.seq);
            }
        }
        Ok(Staged {
            boxes,
            seeded,
            replayed,
        })
    }

    /// 为跟踪ID分配检测目标
    fn assign_seeds(&self, objects: &[DetectedObject]) -> Vec<(TrackId, BBox)> {
        let mut ranked: Vec<&DetectedObject> = objects.iter().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        match self.seed_policy {
            SeedPolicy::Rank => (0..self.max_tracked_objects)
                .zip(ranked)
                .map(|(id, object)| (id, object.bbox))
                .collect(),
            SeedPolicy::Overlap => {
                let mut pairs: Vec<(f32, TrackId, usize)> = Vec::new();
                for (&id, bbox) in self.boxes.range(..self.max_tracked_objects) {
                    for (j, object) in ranked.iter().enumerate() {
                        let iou = bbox.iou(&object.bbox);
                        if iou >= self.min_seed_iou {
                            pairs.push((iou, id, j));
                        }
                    }
                }
                pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

                let mut assigned: BTreeMap<TrackId, BBox> = BTreeMap::new();
                let mut used = vec![false; ranked.len()];
                for (_, id, j) in pairs {
                    if !used[j] && !assigned.contains_key(&id) {
                        used[j] = true;
                        assigned.insert(id, ranked[j].bbox);
                    }
                }

                // 剩余ID按置信度领取剩余目标
                let mut leftovers = ranked
                    .iter()
                    .zip(&used)
                    .filter(|(_, used)| !**used)
                    .map(|(object, _)| object.bbox);
                for id in 0..self.max_tracked_objects {
                    if assigned.contains_key(&id) {
                        continue;
                    }
                    match leftovers.next() {
                        Some(bbox) => {
                            assigned.insert(id, bbox);
                        }
                        None => break,
                    }
                }
                assigned.into_iter().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::{Rgb, RgbImage};

    use super::*;

    /// 记录调用顺序; 帧序号编码在左上角像素中
    #[derive(Default)]
    struct RecordingTracker {
        calls: Vec<(TrackId, u64, bool)>,
        seeded: BTreeMap<TrackId, BBox>,
        /// 在 (id, 帧序号) 上返回错误
        fail_on: Option<(TrackId, u64)>,
    }

    fn seq_of(image: &RgbImage) -> u64 {
        let p = image.get_pixel(0, 0).0;
        p[0] as u64 * 256 + p[1] as u64
    }

    impl ObjectTracker for RecordingTracker {
        fn track(
            &mut self,
            id: TrackId,
            image: &Arc<RgbImage>,
            seed: Option<BBox>,
        ) -> Result<BBox, TrackError> {
            self.calls.push((id, seq_of(image), seed.is_some()));
            if self.fail_on == Some((id, seq_of(image))) {
                return Err(TrackError::Backend(format!("id {} lost on #{}", id, seq_of(image))));
            }
            match seed {
                Some(seed) => {
                    self.seeded.insert(id, seed);
                    Ok(seed)
                }
                None => {
                    let last = self.seeded.get(&id).ok_or(TrackError::Unseeded(id))?;
                    let next = last.shifted(1., 0.);
                    self.seeded.insert(id, next);
                    Ok(next)
                }
            }
        }

        fn is_seeded(&self, id: TrackId) -> bool {
            self.seeded.contains_key(&id)
        }

        fn reset(&mut self) {
            self.seeded.clear();
        }

        type Snapshot = BTreeMap<TrackId, BBox>;

        fn snapshot(&self) -> Self::Snapshot {
            self.seeded.clone()
        }

        fn restore(&mut self, snapshot: Self::Snapshot) {
            self.seeded = snapshot;
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<u64>,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
            self.sent.push(frame.seq);
            Ok(())
        }
    }

    /// 交替明暗, 保证帧差超过阈值
    fn frame(seq: u64) -> Frame {
        let value = if seq % 2 == 0 { 40 } else { 220 };
        let mut image = RgbImage::from_pixel(32, 20, Rgb([value, value, value]));
        image.put_pixel(0, 0, Rgb([(seq / 256) as u8, (seq % 256) as u8, 0]));
        Frame::new(image, seq)
    }

    fn still_frame(seq: u64) -> Frame {
        let mut image = RgbImage::from_pixel(32, 20, Rgb([90, 90, 90]));
        image.put_pixel(0, 0, Rgb([(seq / 256) as u8, (seq % 256) as u8, 0]));
        Frame::new(image, seq)
    }

    fn config(max_tracked_objects: usize) -> PipelineConfig {
        PipelineConfig {
            diff_width: 32,
            diff_height: 20,
            frame_diff_threshold: 1000,
            max_tracked_objects,
            ..Default::default()
        }
    }

    fn result(seq: u64, boxes: &[(BBox, f32)]) -> DetectedObjects {
        DetectedObjects::new(
            seq,
            boxes
                .iter()
                .map(|(bbox, confidence)| DetectedObject::new(0, *bbox, *confidence))
                .collect(),
        )
    }

    fn engine(max: usize) -> ReconciliationEngine<RecordingTracker, RecordingSink> {
        ReconciliationEngine::new(
            RecordingTracker::default(),
            RecordingSink::default(),
            &config(max),
            1,
        )
    }

    fn bootstrapped(
        max: usize,
        boxes: &[(BBox, f32)],
    ) -> ReconciliationEngine<RecordingTracker, RecordingSink> {
        let mut engine = engine(max);
        engine.send_first(&frame(0)).unwrap();
        assert_eq!(engine.state(), EngineState::Bootstrapping);
        engine.anchor(result(0, boxes)).unwrap().unwrap();
        assert_eq!(engine.state(), EngineState::SteadyTracking);
        engine
    }

    #[test]
    fn test_seed_then_predict() {
        let seed = BBox::new(10., 10., 50., 50.);
        let mut engine = bootstrapped(1, &[(seed, 0.9)]);
        assert_eq!(engine.boxes(), vec![(0, seed)]);

        let tracked = engine.process_frame(still_frame(1), vec![]).unwrap();
        assert_ne!(tracked.boxes[0].1, seed);
        assert_eq!(tracked.boxes[0].1, seed.shifted(1., 0.));
    }

    #[test]
    fn test_catch_up_replays_newer_cached_frames() {
        let mut engine = bootstrapped(1, &[(BBox::new(0., 0., 10., 10.), 0.9)]);
        // 1fps + 交替明暗: 每帧都发送
        for seq in 1..10 {
            engine.process_frame(frame(seq), vec![]).unwrap();
        }
        // 模拟上一轮已校正: 缓存只剩 10..15
        engine.reconcile(vec![result(9, &[(BBox::new(0., 0., 10., 10.), 0.9)])]).unwrap();
        for seq in 10..15 {
            engine.process_frame(frame(seq), vec![]).unwrap();
        }
        assert!(engine.registry().get(12).is_some());
        engine.tracker.calls.clear();

        let anchor = BBox::new(100., 100., 120., 120.);
        let tracked = engine
            .process_frame(frame(15), vec![result(12, &[(anchor, 0.8)])])
            .unwrap();
        let report = tracked.reconciled.unwrap();
        assert_eq!(report.anchor_seq, 12);
        assert_eq!(report.replayed, vec![13, 14, 15]);
        assert_eq!(report.discarded, vec![10, 11]);

        // 锚定在帧12, 然后依次重放 13, 14, 15, 当前帧不再重复跟踪
        assert_eq!(
            engine.tracker.calls,
            vec![(0, 12, true), (0, 13, false), (0, 14, false), (0, 15, false)]
        );
        assert_eq!(tracked.boxes, vec![(0, anchor.shifted(3., 0.))]);
        assert!(engine.cache().is_empty());
        assert_eq!(engine.registry().seqs().collect::<Vec<_>>(), vec![13, 14, 15]);
    }

    #[test]
    fn test_duplicate_result_is_noop() {
        let mut engine = bootstrapped(1, &[(BBox::new(0., 0., 10., 10.), 0.9)]);
        for seq in 1..4 {
            engine.process_frame(frame(seq), vec![]).unwrap();
        }
        let anchor = result(2, &[(BBox::new(5., 5., 15., 15.), 0.9)]);
        let first = engine.reconcile(vec![anchor.clone()]).unwrap().unwrap();
        assert_eq!(first.replayed, vec![3]);

        let calls = engine.tracker.calls.len();
        let boxes = engine.boxes();
        assert!(engine.reconcile(vec![anchor]).unwrap().is_none());
        assert_eq!(engine.tracker.calls.len(), calls);
        assert_eq!(engine.boxes(), boxes);
        assert_eq!(engine.last_anchor(), Some(2));
    }

    #[test]
    fn test_latest_result_wins_and_all_drained_are_discarded() {
        let mut engine = bootstrapped(1, &[(BBox::new(0., 0., 10., 10.), 0.9)]);
        for seq in 1..6 {
            engine.process_frame(frame(seq), vec![]).unwrap();
        }
        let tracked = engine
            .process_frame(
                frame(6),
                vec![
                    result(3, &[(BBox::new(1., 1., 2., 2.), 0.5)]),
                    result(5, &[(BBox::new(30., 30., 40., 40.), 0.5)]),
                    result(4, &[(BBox::new(3., 3., 4., 4.), 0.5)]),
                ],
            )
            .unwrap();
        let report = tracked.reconciled.unwrap();
        assert_eq!(report.anchor_seq, 5);
        assert_eq!(report.replayed, vec![6]);
        assert!(report.discarded.contains(&3) && report.discarded.contains(&4));
        assert!(engine.registry().seqs().all(|seq| seq > 5));
    }

    #[test]
    fn test_unknown_result_leaves_state_untouched() {
        let mut engine = engine(1);
        engine.send_first(&still_frame(0)).unwrap();
        engine
            .anchor(result(0, &[(BBox::new(0., 0., 10., 10.), 0.9)]))
            .unwrap();
        engine.process_frame(still_frame(1), vec![]).unwrap();
        engine.process_frame(still_frame(2), vec![]).unwrap();
        // still帧差异为0, 从未发送
        assert_eq!(engine.sink().sent, vec![0]);

        let tracked = engine
            .process_frame(still_frame(3), vec![result(2, &[(BBox::new(5., 5., 9., 9.), 0.9)])])
            .unwrap();
        assert!(tracked.reconciled.is_none());
        assert_eq!(engine.cache().seqs().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(tracked.boxes, vec![(0, BBox::new(3., 0., 13., 10.))]);
    }

    #[test]
    fn test_out_of_order_frame_rejected() {
        let mut engine = bootstrapped(1, &[(BBox::new(0., 0., 10., 10.), 0.9)]);
        engine.process_frame(frame(3), vec![]).unwrap();
        assert!(matches!(
            engine.process_frame(frame(3), vec![]),
            Err(EngineError::OutOfOrder { last: 3, got: 3 })
        ));
    }

    #[test]
    fn test_overlap_policy_keeps_identity() {
        let left = BBox::new(0., 0., 10., 10.);
        let right = BBox::new(50., 0., 60., 10.);
        let mut engine = bootstrapped(2, &[(left, 0.9), (right, 0.8)]);
        assert_eq!(engine.boxes(), vec![(0, left), (1, right)]);

        engine.process_frame(frame(1), vec![]).unwrap();
        // 置信度顺序翻转, 但按重叠保持ID
        let tracked = engine
            .process_frame(
                frame(2),
                vec![result(1, &[(right.shifted(1., 0.), 0.95), (left.shifted(1., 0.), 0.6)])],
            )
            .unwrap();
        let boxes: BTreeMap<TrackId, BBox> = tracked.boxes.into_iter().collect();
        assert!(boxes[&0].iou(&left) > 0.5);
        assert!(boxes[&1].iou(&right) > 0.5);
    }

    #[test]
    fn test_rank_policy_and_partial_bootstrap() {
        let mut cfg = config(2);
        cfg.seed_policy = SeedPolicy::Rank;
        let mut engine = ReconciliationEngine::new(
            RecordingTracker::default(),
            RecordingSink::default(),
            &cfg,
            1,
        );
        engine.send_first(&frame(0)).unwrap();
        let only = BBox::new(0., 0., 10., 10.);
        let report = engine.anchor(result(0, &[(only, 0.4)])).unwrap().unwrap();
        assert_eq!(report.seeded, vec![0]);
        assert!(!engine.tracker().is_seeded(1));

        engine.process_frame(frame(1), vec![]).unwrap();
        let a = BBox::new(20., 20., 30., 30.);
        let b = BBox::new(40., 40., 50., 50.);
        let report = engine
            .process_frame(frame(2), vec![result(1, &[(a, 0.3), (b, 0.7)])])
            .unwrap()
            .reconciled
            .unwrap();
        assert_eq!(report.seeded, vec![0, 1]);
        assert_eq!(engine.tracker.calls.iter().filter(|c| c.2 && c.1 == 1).count(), 2);
        // 按置信度: id0 ← b, id1 ← a, 然后在帧2上重放一步
        assert_eq!(engine.boxes(), vec![(0, b.shifted(1., 0.)), (1, a.shifted(1., 0.))]);
    }

    #[test]
    fn test_failed_catch_up_rolls_back_and_retries() {
        let left = BBox::new(0., 0., 10., 10.);
        let right = BBox::new(50., 0., 60., 10.);
        let mut engine = bootstrapped(2, &[(left, 0.9), (right, 0.8)]);
        for seq in 1..4 {
            engine.process_frame(frame(seq), vec![]).unwrap();
        }
        let boxes = engine.boxes();
        assert_eq!(boxes, vec![(0, left.shifted(3., 0.)), (1, right.shifted(3., 0.))]);

        // id1 在关键帧 #2 上锚定失败, 此前 id0 已经重新锚定
        engine.tracker.fail_on = Some((1, 2));
        let anchor = result(2, &[(left.shifted(2., 0.), 0.9), (right.shifted(2., 0.), 0.8)]);
        assert!(matches!(
            engine.reconcile(vec![anchor]),
            Err(EngineError::Track(TrackError::Backend(_)))
        ));

        assert_eq!(engine.state(), EngineState::SteadyTracking);
        assert_eq!(engine.boxes(), boxes);
        assert_eq!(engine.tracker.seeded[&0], left.shifted(3., 0.));
        assert_eq!(engine.registry().seqs().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(engine.cache().seqs().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(engine.last_anchor(), Some(0));
        assert_eq!(engine.deferred_seq(), Some(2));

        // 跟踪器恢复后, 下一帧重试同一个结果
        engine.tracker.fail_on = None;
        let tracked = engine.process_frame(frame(4), vec![]).unwrap();
        let report = tracked.reconciled.unwrap();
        assert_eq!(report.anchor_seq, 2);
        assert_eq!(report.seeded, vec![0, 1]);
        assert_eq!(report.replayed, vec![3, 4]);
        assert_eq!(report.discarded, vec![1]);
        assert_eq!(
            tracked.boxes,
            vec![(0, left.shifted(4., 0.)), (1, right.shifted(4., 0.))]
        );
        assert_eq!(engine.deferred_seq(), None);
        assert_eq!(engine.registry().seqs().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_failed_step_leaves_other_ids_untouched() {
        let left = BBox::new(0., 0., 10., 10.);
        let right = BBox::new(50., 0., 60., 10.);
        let mut engine = bootstrapped(2, &[(left, 0.9), (right, 0.8)]);
        engine.tracker.fail_on = Some((1, 1));

        assert!(engine.process_frame(frame(1), vec![]).is_err());
        assert_eq!(engine.boxes(), vec![(0, left), (1, right)]);
        assert_eq!(engine.tracker.seeded[&0], left);

        engine.tracker.fail_on = None;
        let tracked = engine.process_frame(frame(2), vec![]).unwrap();
        assert_eq!(tracked.boxes, vec![(0, left.shifted(1., 0.)), (1, right.shifted(1., 0.))]);
    }

    #[test]
    fn test_bootstrap_ignores_results_for_other_frames() {
        let mut engine = engine(1);
        engine.send_first(&frame(5)).unwrap();
        assert!(engine
            .anchor(result(9, &[(BBox::new(0., 0., 4., 4.), 0.9)]))
            .unwrap()
            .is_none());
        assert_eq!(engine.state(), EngineState::Bootstrapping);
        assert_eq!(engine.registry().seqs().collect::<Vec<_>>(), vec![5]);

        let seed = BBox::new(1., 1., 8., 8.);
        let report = engine.anchor(result(5, &[(seed, 0.7)])).unwrap().unwrap();
        assert_eq!(report.anchor_seq, 5);
        assert_eq!(engine.boxes(), vec![(0, seed)]);
    }
}
