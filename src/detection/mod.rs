//! 检测系统 (Detection System)
//!
//! - `ObjectDetector`: 检测器能力接口, 整帧输入, 返回原图坐标的目标列表
//! - `BlobDetector`:   连通域检测器 (无模型依赖的参考实现)
//! - `nms`:            非极大值抑制
pub mod blob;
pub mod nms;

pub use blob::{BlobDetector, BLOB_LABEL};
pub use nms::non_max_suppression;

use image::RgbImage;

use crate::error::DetectError;
use crate::types::DetectedObject;

/// 检测器能力接口
pub trait ObjectDetector: Send {
    /// 检测整帧. 框坐标为 `image` 的像素坐标, 顺序不限.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedObject>, DetectError>;
}
