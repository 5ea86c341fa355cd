//! 关键帧选择 (Keyframe Selector)
//!
//! 双门限: 与上一发送帧的灰度缩略图差异超过阈值, 且距上次发送已超过最小间隔.

use std::time::Duration;

use fast_image_resize as fr;
use image::RgbImage;

use crate::config::PipelineConfig;
use crate::error::KeyframeError;
use crate::types::Frame;

/// 单帧的选择结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyframeDecision {
    pub diff: u64,
    pub send: bool,
}

pub struct KeyframeSelector {
    threshold: u64,
    min_interval: Duration,
    frame_rate: u32,
    thumb_width: u32,
    thumb_height: u32,
    resizer: fr::Resizer,
    /// 上一发送帧的缩略图
    last_sent: Option<(u64, Vec<u8>)>,
    /// 最近一次评估的候选帧缩略图
    candidate: Option<(u64, Vec<u8>)>,
    frames_since_sent: u64,
}

impl KeyframeSelector {
    pub fn new(config: &PipelineConfig, frame_rate: u32) -> Self {
        Self {
            threshold: config.frame_diff_threshold,
            min_interval: config.min_keyframe_interval(),
            frame_rate: frame_rate.max(1),
            thumb_width: config.diff_width.max(1),
            thumb_height: config.diff_height.max(1),
            resizer: fr::Resizer::new(),
            last_sent: None,
            candidate: None,
            frames_since_sent: 0,
        }
    }

    /// 灰度 + Box滤波缩放到固定尺寸
    pub fn thumbnail(&mut self, image: &RgbImage) -> Result<Vec<u8>, KeyframeError> {
        let gray = image::imageops::grayscale(image);
        let (width, height) = gray.dimensions();
        let src = fr::images::Image::from_vec_u8(width, height, gray.into_raw(), fr::PixelType::U8)?;
        let mut dst = fr::images::Image::new(self.thumb_width, self.thumb_height, fr::PixelType::U8);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Box)),
        )?;
        Ok(dst.buffer().to_vec())
    }

    /// 逐像素绝对差之和
    pub fn frame_diff(a: &[u8], b: &[u8]) -> u64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.abs_diff(*y) as u64)
            .sum()
    }

    /// 距上次发送的时长 (帧数 × 帧间隔)
    pub fn elapsed_since_sent(&self) -> Duration {
        Duration::from_secs_f64(self.frames_since_sent as f64 / self.frame_rate as f64)
    }

    pub fn last_sent_seq(&self) -> Option<u64> {
        self.last_sent.as_ref().map(|(seq, _)| *seq)
    }

    /// 评估一帧. 只计数和比较, 真正发送成功后调用 `commit`.
    pub fn consider(&mut self, frame: &Frame) -> Result<KeyframeDecision, KeyframeError> {
        self.frames_since_sent += 1;
        let thumbnail = self.thumbnail(&frame.image)?;
        let diff = match &self.last_sent {
            Some((_, last)) => Self::frame_diff(last, &thumbnail),
            // 从未发送过: 任何帧都值得发送
            None => u64::MAX,
        };
        self.candidate = Some((frame.seq, thumbnail));

        let send = diff > self.threshold && self.elapsed_since_sent() > self.min_interval;
        Ok(KeyframeDecision { diff, send })
    }

    /// 标记 `frame` 已发送: 成为新的参照帧, 计数清零
    pub fn commit(&mut self, frame: &Frame) -> Result<(), KeyframeError> {
        let thumbnail = match self.candidate.take() {
            Some((seq, thumbnail)) if seq == frame.seq => thumbnail,
            _ => self.thumbnail(&frame.image)?,
        };
        self.last_sent = Some((frame.seq, thumbnail));
        self.frames_since_sent = 0;
        Ok(())
    }
}
