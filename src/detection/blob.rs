//! 连通域检测器
//! Connected-component detector: Otsu threshold, minority side as foreground

use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::trace;

use super::nms::non_max_suppression;
use super::ObjectDetector;
use crate::error::DetectError;
use crate::types::{BBox, DetectedObject};

/// 所有目标的类别
pub const BLOB_LABEL: i64 = 0;

pub struct BlobDetector {
    min_area: u32,
    nms_iou: f32,
    max_objects: usize,
}

impl BlobDetector {
    pub fn new(min_area: u32, nms_iou: f32, max_objects: usize) -> Self {
        Self {
            min_area,
            nms_iou,
            max_objects,
        }
    }
}

/// 单个连通域的外接框和像素数
#[derive(Clone, Copy)]
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u32,
}

impl Component {
    fn at(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            pixels: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.pixels += 1;
    }

    fn bbox(&self) -> BBox {
        BBox::new(
            self.min_x as f32,
            self.min_y as f32,
            (self.max_x + 1) as f32,
            (self.max_y + 1) as f32,
        )
    }
}

/// 前景掩码. 像素少的一侧视为前景; 图像全同色时返回 None.
fn foreground_mask(gray: &GrayImage) -> Option<GrayImage> {
    let level = otsu_level(gray);
    let above = gray.pixels().filter(|p| p.0[0] > level).count();
    let total = (gray.width() * gray.height()) as usize;
    if above == 0 || above == total {
        return None;
    }
    let bright_is_foreground = above * 2 <= total;
    let mut mask = GrayImage::new(gray.width(), gray.height());
    for (x, y, p) in gray.enumerate_pixels() {
        if (p.0[0] > level) == bright_is_foreground {
            mask.put_pixel(x, y, Luma([255]));
        }
    }
    Some(mask)
}

impl ObjectDetector for BlobDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedObject>, DetectError> {
        let (width, height) = image.dimensions();
        if width < 2 || height < 2 {
            return Err(DetectError::ImageTooSmall { width, height });
        }

        let gray = image::imageops::grayscale(image);
        let Some(mask) = foreground_mask(&gray) else {
            return Ok(Vec::new());
        };
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        // label 0 为背景
        let mut components: Vec<Option<Component>> = Vec::new();
        for (x, y, p) in labels.enumerate_pixels() {
            let label = p.0[0] as usize;
            if label == 0 {
                continue;
            }
            if components.len() < label {
                components.resize(label, None);
            }
            components[label - 1]
                .get_or_insert_with(|| Component::at(x, y))
                .add(x, y);
        }

        let mut objects: Vec<DetectedObject> = components
            .into_iter()
            .flatten()
            .filter(|c| c.pixels >= self.min_area)
            .map(|c| {
                let bbox = c.bbox();
                // 置信度 = 填充率
                let confidence = (c.pixels as f32 / bbox.area()).min(1.0);
                DetectedObject::new(BLOB_LABEL, bbox, confidence)
            })
            .collect();
        trace!("blob detector: {} candidates", objects.len());

        non_max_suppression(&mut objects, self.nms_iou);
        objects.truncate(self.max_objects);
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn paint(image: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: [u8; 3]) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.put_pixel(x, y, Rgb(color));
            }
        }
    }

    #[test]
    fn test_detects_bright_squares() {
        let mut image = RgbImage::from_pixel(120, 90, Rgb([10, 10, 10]));
        paint(&mut image, 10, 10, 20, 20, [250, 250, 250]);
        paint(&mut image, 70, 40, 30, 25, [250, 250, 250]);
        // 噪点
        paint(&mut image, 100, 5, 2, 2, [250, 250, 250]);

        let mut detector = BlobDetector::new(64, 0.45, 20);
        let objects = detector.detect(&image).unwrap();
        assert_eq!(objects.len(), 2);

        let mut boxes: Vec<BBox> = objects.iter().map(|o| o.bbox).collect();
        boxes.sort_by(|a, b| a.x1.total_cmp(&b.x1));
        assert_eq!(boxes[0], BBox::new(10., 10., 30., 30.));
        assert_eq!(boxes[1], BBox::new(70., 40., 100., 65.));
        assert!(objects.iter().all(|o| o.label == BLOB_LABEL));
        assert!(objects.iter().all(|o| (o.confidence - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_dark_object_on_bright_background() {
        let mut image = RgbImage::from_pixel(64, 64, Rgb([240, 240, 240]));
        paint(&mut image, 8, 8, 16, 16, [5, 5, 5]);
        let objects = BlobDetector::new(16, 0.45, 20).detect(&image).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].bbox, BBox::new(8., 8., 24., 24.));
    }

    #[test]
    fn test_uniform_and_tiny_images() {
        let image = RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]));
        let mut detector = BlobDetector::new(16, 0.45, 20);
        assert!(detector.detect(&image).unwrap().is_empty());
        assert!(matches!(
            detector.detect(&RgbImage::new(1, 1)),
            Err(DetectError::ImageTooSmall { .. })
        ));
    }

    #[test]
    fn test_max_objects_keeps_most_confident() {
        let mut image = RgbImage::from_pixel(100, 40, Rgb([0, 0, 0]));
        // 实心方块 (填充率1.0)
        paint(&mut image, 5, 5, 12, 12, [255, 255, 255]);
        // L形 (填充率较低)
        paint(&mut image, 40, 5, 4, 20, [255, 255, 255]);
        paint(&mut image, 40, 21, 20, 4, [255, 255, 255]);
        let objects = BlobDetector::new(16, 0.45, 1).detect(&image).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].bbox, BBox::new(5., 5., 17., 17.));
    }
}
