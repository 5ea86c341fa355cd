//! 非极大值抑制 (NMS)

use crate::types::DetectedObject;

/// 按置信度降序保留目标, 与已保留目标IOU超过阈值的丢弃
pub fn non_max_suppression(xs: &mut Vec<DetectedObject>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let drop = (0..current_index)
            .any(|kept| xs[kept].bbox.iou(&xs[index].bbox) > iou_threshold);
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let mut xs = vec![
            DetectedObject::new(0, BBox::new(0., 0., 10., 10.), 0.6),
            DetectedObject::new(0, BBox::new(1., 1., 11., 11.), 0.9),
            DetectedObject::new(0, BBox::new(50., 50., 60., 60.), 0.3),
        ];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence, 0.9);
        assert_eq!(xs[1].confidence, 0.3);
    }
}
