//! 模板匹配跟踪后端
//! Template-matching tracker backend
//!
//! 上一帧框内的灰度块作为模板, 在当前帧的预测位置附近搜索.
//! 隐状态保存目标速度 (像素/帧), 用于预测下一帧的搜索中心.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};

use super::{HiddenState, TrackerBackend};
use crate::error::TrackError;
use crate::types::BBox;

/// 模板边长上限 (像素), 大目标先缩小再匹配
const MAX_TEMPLATE_SIDE: f32 = 32.0;

pub struct TemplateBackend {
    /// 搜索窗口相对框尺寸的外扩比例 (每侧)
    search_margin: f32,
}

impl Default for TemplateBackend {
    fn default() -> Self {
        Self { search_margin: 0.5 }
    }
}

impl TemplateBackend {
    pub fn new(search_margin: f32) -> Self {
        Self {
            search_margin: search_margin.max(0.),
        }
    }
}

/// 隐状态 ⇄ 速度
fn velocity(hidden: Option<&HiddenState>) -> (f32, f32) {
    match hidden.map(|h| h.as_bytes()) {
        Some(bytes) if bytes.len() == 8 => {
            let vx = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let vy = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            (vx, vy)
        }
        _ => (0., 0.),
    }
}

fn encode_velocity(vx: f32, vy: f32) -> HiddenState {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&vx.to_le_bytes());
    bytes[4..].copy_from_slice(&vy.to_le_bytes());
    HiddenState::from_bytes(&bytes)
}

/// 框在图像内的整数区域 `(x, y, w, h)`, 为空时返回 None
fn region(bbox: &BBox, image: &RgbImage) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let clipped = bbox.clipped(0., 0., w, h);
    let x0 = clipped.x1.round() as u32;
    let y0 = clipped.y1.round() as u32;
    let x1 = clipped.x2.round() as u32;
    let y1 = clipped.y2.round() as u32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

fn gray_patch(image: &RgbImage, (x, y, w, h): (u32, u32, u32, u32), scale: f32) -> GrayImage {
    let gray = imageops::grayscale(&imageops::crop_imm(image, x, y, w, h).to_image());
    if scale <= 1. {
        return gray;
    }
    let nw = ((w as f32 / scale).round() as u32).max(1);
    let nh = ((h as f32 / scale).round() as u32).max(1);
    imageops::resize(&gray, nw, nh, FilterType::Triangle)
}

impl TrackerBackend for TemplateBackend {
    fn step(
        &mut self,
        prev_image: &RgbImage,
        prev_bbox: &BBox,
        image: &RgbImage,
        hidden: Option<&HiddenState>,
    ) -> Result<(BBox, HiddenState), TrackError> {
        if prev_image.dimensions() != image.dimensions() {
            return Err(TrackError::Backend(format!(
                "frame size changed from {:?} to {:?}",
                prev_image.dimensions(),
                image.dimensions()
            )));
        }
        let (vx, vy) = velocity(hidden);
        let Some(template_region) = region(prev_bbox, prev_image) else {
            // 目标已离开画面, 保持原位
            return Ok((*prev_bbox, encode_velocity(0., 0.)));
        };

        let predicted = prev_bbox.shifted(vx, vy);
        let pad_x = prev_bbox.width() * self.search_margin;
        let pad_y = prev_bbox.height() * self.search_margin;
        let search = BBox::new(
            predicted.x1 - pad_x,
            predicted.y1 - pad_y,
            predicted.x2 + pad_x,
            predicted.y2 + pad_y,
        );
        let Some(search_region) = region(&search, image) else {
            return Ok((predicted, encode_velocity(vx, vy)));
        };

        let (_, _, tw, th) = template_region;
        let scale = (tw.max(th) as f32 / MAX_TEMPLATE_SIDE).max(1.);
        let template = gray_patch(prev_image, template_region, scale);
        let window = gray_patch(image, search_region, scale);
        if window.width() < template.width() || window.height() < template.height() {
            return Ok((predicted, encode_velocity(vx, vy)));
        }

        let scores = match_template(
            &window,
            &template,
            MatchTemplateMethod::SumOfSquaredErrorsNormalized,
        );
        let (mx, my) = find_extremes(&scores).min_value_location;

        // 模板左上角相对原框的偏移 (框被画面裁剪时不为0)
        let offset_x = template_region.0 as f32 - prev_bbox.x1;
        let offset_y = template_region.1 as f32 - prev_bbox.y1;
        let x1 = search_region.0 as f32 + mx as f32 * scale - offset_x;
        let y1 = search_region.1 as f32 + my as f32 * scale - offset_y;
        let bbox = BBox::from_xywh(x1, y1, prev_bbox.width(), prev_bbox.height());

        let (cx0, cy0) = prev_bbox.center();
        let (cx1, cy1) = bbox.center();
        Ok((bbox, encode_velocity(cx1 - cx0, cy1 - cy0)))
    }
}
