//! 边缘跟踪系统数据结构定义
//! Data structures shared by the edge client and the detection server

use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// 跟踪目标ID (固定的小规模跟踪集合)
pub type TrackId = usize;

// ========== 视频帧 ==========

/// 帧尺寸 `[height, width, channels]`, 与传输协议中的 `size` 字段一致
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize(pub u32, pub u32, pub u32);

impl FrameSize {
    pub fn of(image: &RgbImage) -> Self {
        Self(image.height(), image.width(), 3)
    }

    pub fn height(&self) -> u32 {
        self.0
    }

    pub fn width(&self) -> u32 {
        self.1
    }
}

/// 视频帧 (采集线程 → 跟踪线程 / 检测服务)
///
/// `seq` 在同一视频流内严格递增, 是检测结果与帧之间唯一的关联键.
/// 图像用 `Arc` 共享, 缓存/注册表/跟踪器之间传递不复制像素.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub size: FrameSize,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        let size = FrameSize::of(&image);
        Self {
            image: Arc::new(image),
            size,
            seq,
        }
    }
}

// ========== 边界框 ==========

/// 边界框 `[x1, y1, x2, y2]`, 源图像像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2., (self.y1 + self.y2) / 2.)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0. && self.height() > 0.)
    }

    /// 平移
    pub fn shifted(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// 裁剪到 `[lo_x, hi_x] x [lo_y, hi_y]`
    pub fn clipped(&self, lo_x: f32, lo_y: f32, hi_x: f32, hi_y: f32) -> Self {
        Self::new(
            self.x1.clamp(lo_x, hi_x),
            self.y1.clamp(lo_y, hi_y),
            self.x2.clamp(lo_x, hi_x),
            self.y2.clamp(lo_y, hi_y),
        )
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &BBox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

// ========== 检测结果 ==========

/// 单个检测目标
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: i64,
    pub bbox: BBox,
    pub confidence: f32,
}

impl DetectedObject {
    pub fn new(label: i64, bbox: BBox, confidence: f32) -> Self {
        Self {
            label,
            bbox,
            confidence,
        }
    }
}

/// 一帧的检测结果 (检测服务 → 边缘端)
///
/// `seq` 恒等于产生该结果的 `Frame::seq`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObjects {
    pub seq: u64,
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
}

impl DetectedObjects {
    pub fn new(seq: u64, objects: Vec<DetectedObject>) -> Self {
        Self { seq, objects }
    }

    /// 按置信度降序排列 (发送前调用, 接收方可安全截断)
    pub fn sort_by_confidence(&mut self) {
        self.objects
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BBox::new(0., 0., 10., 10.);
        let b = BBox::new(5., 0., 15., 10.);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&BBox::new(20., 20., 30., 30.)), 0.);
        assert_eq!(a.iou(&a), 1.);
    }

    #[test]
    fn test_sort_by_confidence() {
        let mut objects = DetectedObjects::new(
            3,
            vec![
                DetectedObject::new(1, BBox::new(0., 0., 1., 1.), 0.2),
                DetectedObject::new(2, BBox::new(0., 0., 1., 1.), 0.9),
                DetectedObject::new(3, BBox::new(0., 0., 1., 1.), 0.5),
            ],
        );
        objects.sort_by_confidence();
        let labels: Vec<i64> = objects.objects.iter().map(|o| o.label).collect();
        assert_eq!(labels, vec![2, 3, 1]);
    }

    #[test]
    fn test_wire_shape() {
        let objects = DetectedObjects::new(
            12,
            vec![DetectedObject::new(7, BBox::new(10., 10., 50., 50.), 0.75)],
        );
        let json = serde_json::to_value(&objects).unwrap();
        assert_eq!(json["seq"], 12);
        assert_eq!(json["objects"][0]["label"], 7);
        assert_eq!(json["objects"][0]["bbox"], serde_json::json!([10.0, 10.0, 50.0, 50.0]));

        let size = serde_json::to_string(&FrameSize(480, 640, 3)).unwrap();
        assert_eq!(size, "[480,640,3]");
    }
}
