use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub detector_confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, detector_confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            detector_confidence,
        }
    }

    /// Builds a box from yolo-style center coordinates.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, detector_confidence: f32) -> Self {
        Self::new(
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
            detector_confidence,
        )
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &Bbox) -> f32 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = self.xmax.min(other.xmax);
        let y2 = self.ymax.min(other.ymax);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Clamps the box into a `width` x `height` frame.
    pub fn clamp(self, width: f32, height: f32) -> Self {
        Self {
            xmin: self.xmin.clamp(0.0, width),
            ymin: self.ymin.clamp(0.0, height),
            xmax: self.xmax.clamp(0.0, width),
            ymax: self.ymax.clamp(0.0, height),
            detector_confidence: self.detector_confidence,
        }
    }
}

/// Greedy non-maximum suppression, highest confidence wins.
pub fn non_maximum_suppression(mut bboxes: Vec<Bbox>, iou_threshold: f32) -> Vec<Bbox> {
    bboxes.sort_by(|a, b| {
        b.detector_confidence
            .partial_cmp(&a.detector_confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Bbox> = Vec::with_capacity(bboxes.len());
    for candidate in bboxes {
        if keep.iter().all(|kept| kept.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = Bbox::new(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = Bbox::new(20.0, 20.0, 30.0, 30.0, 0.9);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = Bbox::new(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = Bbox::new(5.0, 0.0, 15.0, 10.0, 0.9);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let boxes = vec![
            Bbox::new(0.0, 0.0, 10.0, 10.0, 0.6),
            Bbox::new(1.0, 1.0, 11.0, 11.0, 0.9),
            Bbox::new(50.0, 50.0, 60.0, 60.0, 0.5),
        ];
        let kept = non_maximum_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].detector_confidence, 0.9);
        assert_eq!(kept[1].detector_confidence, 0.5);
    }

    #[test]
    fn from_center_and_clamp() {
        let b = Bbox::from_center(5.0, 5.0, 20.0, 4.0, 1.0).clamp(8.0, 8.0);
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (0.0, 3.0, 8.0, 7.0));
    }
}
