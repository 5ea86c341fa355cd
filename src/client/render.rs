//! 跟踪框绘制与输出
//! Overlay drawing for tracked boxes

use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use once_cell::sync::Lazy;
use rand::Rng;

use crate::types::{BBox, Frame, TrackId};

const COLOR_NUM: usize = 100;

/// 每个跟踪ID一种颜色
static PALETTE: Lazy<Vec<Rgb<u8>>> = Lazy::new(|| {
    let mut rng = rand::thread_rng();
    (0..COLOR_NUM)
        .map(|_| Rgb([rng.gen(), rng.gen(), rng.gen()]))
        .collect()
});

pub fn track_color(id: TrackId) -> Rgb<u8> {
    PALETTE[id % COLOR_NUM]
}

/// 在图像上画空心框, 线宽 `2 * padding + 1`, 框先裁剪到 `[padding, size - padding]`
pub fn draw_bbox(image: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, padding: u32) {
    let (width, height) = image.dimensions();
    if width <= 2 * padding || height <= 2 * padding {
        return;
    }
    let pad = padding as f32;
    let clipped = bbox.clipped(
        pad,
        pad,
        (width - 1 - padding) as f32,
        (height - 1 - padding) as f32,
    );
    let x1 = clipped.x1.round() as i32;
    let y1 = clipped.y1.round() as i32;
    let x2 = clipped.x2.round() as i32;
    let y2 = clipped.y2.round() as i32;

    for k in -(padding as i32)..=padding as i32 {
        let w = x2 - x1 + 1 - 2 * k;
        let h = y2 - y1 + 1 - 2 * k;
        if w <= 0 || h <= 0 {
            continue;
        }
        let rect = Rect::at(x1 + k, y1 + k).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// 跟踪结果的去向
pub trait FrameRenderer {
    fn render(&mut self, frame: &Frame, boxes: &[(TrackId, BBox)]) -> Result<(), image::ImageError>;
}

/// 把叠加了跟踪框的帧写入 `<out>/<seq>.JPEG`
pub struct OverlayWriter {
    out_dir: PathBuf,
    padding: u32,
}

impl OverlayWriter {
    pub fn new(out_dir: &Path, padding: u32) -> std::io::Result<Self> {
        fs::create_dir_all(out_dir)?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            padding,
        })
    }

    pub fn path_for(&self, seq: u64) -> PathBuf {
        self.out_dir.join(format!("{}.JPEG", seq))
    }
}

impl FrameRenderer for OverlayWriter {
    fn render(&mut self, frame: &Frame, boxes: &[(TrackId, BBox)]) -> Result<(), image::ImageError> {
        let mut image = (*frame.image).clone();
        for (id, bbox) in boxes {
            draw_bbox(&mut image, bbox, track_color(*id), self.padding);
        }
        image.save_with_format(self.path_for(frame.seq), ImageFormat::Jpeg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_bbox_outline() {
        let mut image = RgbImage::new(40, 30);
        let color = Rgb([255, 0, 0]);
        draw_bbox(&mut image, &BBox::new(10., 10., 20., 20.), color, 1);

        // 线宽3: 9..=11 列都是边框
        for x in 9..=11 {
            assert_eq!(*image.get_pixel(x, 15), color);
        }
        assert_eq!(*image.get_pixel(15, 15), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(15, 10), color);
        assert_eq!(*image.get_pixel(20, 20), color);
    }

    #[test]
    fn test_draw_bbox_clips_to_image() {
        let mut image = RgbImage::new(20, 20);
        let color = Rgb([0, 255, 0]);
        draw_bbox(&mut image, &BBox::new(-50., -50., 100., 100.), color, 1);
        assert_eq!(*image.get_pixel(0, 10), color);
        assert_eq!(*image.get_pixel(19, 10), color);
        assert_eq!(*image.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_overlay_writer_names_by_seq() {
        let dir = std::env::temp_dir().join(format!("edgetrack-render-{}", std::process::id()));
        let mut writer = OverlayWriter::new(&dir, 1).unwrap();
        let frame = Frame::new(RgbImage::new(16, 16), 42);
        writer
            .render(&frame, &[(0, BBox::new(2., 2., 10., 10.))])
            .unwrap();
        let path = writer.path_for(42);
        assert!(path.ends_with("42.JPEG"));
        assert_eq!(image::image_dimensions(&path).unwrap(), (16, 16));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_palette_is_stable_per_id() {
        assert_eq!(track_color(3), track_color(3));
        assert_eq!(track_color(7), track_color(107));
    }
}
