// THEORY:
// The `observation` module holds the "dumb" data containers that cross the
// boundary between the external tracker and this crate. A `TrackedObject` is a
// snapshot of one object in one frame: where its box is, which class the
// detector thinks it is, and (once the tracker has confirmed it) the identifier
// that links it to the same object in other frames. It carries no memory of
// earlier frames; that lives in the `TrailTable`.

use crate::core_modules::trail_table::{TrackId, TrailPoint};

/// An axis-aligned box in frame pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Builds a box from its centre and size.
    pub fn from_xywh(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// The point that gets appended to the object's trail.
    pub fn center(&self) -> TrailPoint {
        TrailPoint::new(self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// The part of the box that lies inside `[-margin, w + margin] x
    /// [-margin, h + margin]`, or `None` when nothing is left or a coordinate
    /// is not finite. The result always fits in `i32` pixel coordinates.
    pub fn clipped_to(&self, (width, height): (u32, u32), margin: f64) -> Option<BoundingBox> {
        if !self.is_finite() {
            return None;
        }
        let (w, h) = (width as f64, height as f64);
        let left = self.left.clamp(-margin, w + margin);
        let top = self.top.clamp(-margin, h + margin);
        let right = self.right().clamp(-margin, w + margin);
        let bottom = self.bottom().clamp(-margin, h + margin);
        if right <= left || bottom <= top {
            return None;
        }
        Some(BoundingBox::new(left, top, right - left, bottom - top))
    }

    /// Intersection over union; `0.0` for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return 0.0;
        }
        let intersection = (right - left) * (bottom - top);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 { intersection / union } else { 0.0 }
    }
}

/// One object reported by the tracker for a single frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackedObject {
    /// The tracker's identifier. `None` while the tracker has not confirmed an
    /// identity; such objects get a box but no trail.
    pub id: Option<TrackId>,
    pub bbox: BoundingBox,
    /// Detector class index, if the tracker reports one.
    pub class_id: Option<u32>,
    /// Detection confidence in `[0, 1]`, if reported.
    pub confidence: Option<f32>,
}

impl TrackedObject {
    pub fn new(id: Option<TrackId>, bbox: BoundingBox) -> Self {
        Self {
            id,
            bbox,
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class_id: u32) -> Self {
        self.class_id = Some(class_id);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Text drawn above the box, e.g. `id:7 person 0.87`.
    pub fn label(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(id) = self.id {
            parts.push(format!("id:{id}"));
        }
        if let Some(class_id) = self.class_id {
            match class_name(class_id) {
                Some(name) => parts.push(name.to_string()),
                None => parts.push(format!("class {class_id}")),
            }
        }
        if let Some(confidence) = self.confidence {
            parts.push(format!("{confidence:.2}"));
        }
        parts.join(" ")
    }
}

/// COCO class names, in the index order used by the common pretrained detectors.
const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

pub fn class_name(class_id: u32) -> Option<&'static str> {
    COCO_CLASSES.get(class_id as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_of_box() {
        let bbox = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(bbox.center(), TrailPoint::new(25.0, 40.0));
        assert_eq!(bbox.right(), 40.0);
        assert_eq!(bbox.bottom(), 60.0);
    }

    #[test]
    fn xywh_round_trips_center() {
        let bbox = BoundingBox::from_xywh(100.0, 50.0, 20.0, 10.0);
        assert_eq!(bbox.left, 90.0);
        assert_eq!(bbox.top, 45.0);
        assert_eq!(bbox.center(), TrailPoint::new(100.0, 50.0));
    }

    #[test]
    fn label_includes_known_parts() {
        let object = TrackedObject::new(Some(7), BoundingBox::default())
            .with_class(0)
            .with_confidence(0.871);
        assert_eq!(object.label(), "id:7 person 0.87");

        let anonymous = TrackedObject::new(None, BoundingBox::default()).with_class(500);
        assert_eq!(anonymous.label(), "class 500");
    }

    #[test]
    fn clipping_keeps_huge_boxes_in_pixel_range() {
        let huge = BoundingBox::new(10.0, 10.0, 1e30, 1e30);
        let clipped = huge.clipped_to((64, 48), 3.0).unwrap();
        assert_eq!(clipped, BoundingBox::new(10.0, 10.0, 57.0, 41.0));

        let outside = BoundingBox::new(1e12, 5.0, 10.0, 10.0);
        assert_eq!(outside.clipped_to((64, 48), 0.0), None);
        let broken = BoundingBox::new(f64::NAN, 0.0, 10.0, 10.0);
        assert_eq!(broken.clipped_to((64, 48), 0.0), None);
        assert!(!broken.is_finite());
    }

    #[test]
    fn iou_of_overlapping_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 5.0, 5.0)), 0.0);
    }
}
