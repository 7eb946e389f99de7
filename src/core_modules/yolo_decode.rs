// THEORY:
// The `yolo_decode` module turns the raw output tensor of a YOLOv8 detection
// model into boxes in frame coordinates. It knows nothing about the inference
// runtime: the backend hands over the tensor shape and its flat `f32` data.
//
// A YOLOv8 head emits one column per anchor, each holding `cx, cy, w, h`
// followed by one score per class, laid out either as `[1, 4 + nc, anchors]`
// (the default export) or transposed as `[1, anchors, 4 + nc]`. Frames are
// scaled into the square model input keeping their aspect ratio and placed at
// the top-left corner, so mapping back is a single division by that ratio.

use crate::core_modules::observation::BoundingBox;
use crate::error::TrackerError;

const BOX_VALUES: usize = 4;

/// One detection before identities are assigned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub confidence: f32,
}

/// How a frame was fitted into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Model pixels per frame pixel.
    pub ratio: f64,
    /// Size of the resized frame inside the input square.
    pub scaled_width: u32,
    pub scaled_height: u32,
}

impl Letterbox {
    pub fn fit((width, height): (u32, u32), input_size: u32) -> Self {
        let side = input_size as f64;
        let ratio = (side / width.max(1) as f64).min(side / height.max(1) as f64);
        Self {
            ratio,
            scaled_width: ((width as f64 * ratio).round() as u32).clamp(1, input_size),
            scaled_height: ((height as f64 * ratio).round() as u32).clamp(1, input_size),
        }
    }
}

/// Decodes a detection head output into boxes on a `frame` sized frame,
/// keeping candidates whose best class score reaches `confidence`.
pub fn decode_detections(
    shape: &[usize],
    data: &[f32],
    letterbox: &Letterbox,
    frame: (u32, u32),
    confidence: f32,
) -> Result<Vec<Detection>, TrackerError> {
    let &[batch, a, b] = shape else {
        return Err(TrackerError::Backend(format!(
            "expected a [1, features, anchors] output, got {shape:?}"
        )));
    };
    if batch != 1 || a.saturating_mul(b) != data.len() {
        return Err(TrackerError::Backend(format!(
            "output shape {shape:?} does not match {} values",
            data.len()
        )));
    }
    // Anchors always outnumber features.
    let (features, anchors, transposed) = if a <= b { (a, b, false) } else { (b, a, true) };
    if features <= BOX_VALUES {
        return Err(TrackerError::Backend(format!(
            "output shape {shape:?} has no class scores"
        )));
    }
    let value = |anchor: usize, feature: usize| {
        if transposed {
            data[anchor * features + feature]
        } else {
            data[feature * anchors + anchor]
        }
    };

    let (frame_width, frame_height) = (frame.0 as f64, frame.1 as f64);
    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let mut best = (0usize, f32::NEG_INFINITY);
        for class in 0..features - BOX_VALUES {
            let score = value(anchor, BOX_VALUES + class);
            if score > best.1 {
                best = (class, score);
            }
        }
        if best.1 < confidence {
            continue;
        }

        let [cx, cy, w, h] = [0, 1, 2, 3].map(|i| value(anchor, i) as f64 / letterbox.ratio);
        let bbox = BoundingBox::from_xywh(cx, cy, w, h);
        let left = bbox.left.clamp(0.0, frame_width);
        let top = bbox.top.clamp(0.0, frame_height);
        let right = bbox.right().clamp(0.0, frame_width);
        let bottom = bbox.bottom().clamp(0.0, frame_height);
        if right <= left || bottom <= top {
            continue;
        }
        detections.push(Detection {
            bbox: BoundingBox::new(left, top, right - left, bottom - top),
            class_id: best.0 as u32,
            confidence: best.1,
        });
    }
    Ok(detections)
}

/// Greedy class-agnostic suppression: keeps the strongest box and drops every
/// later box overlapping a kept one by more than `iou_threshold`.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept = 0;
    for index in 0..detections.len() {
        let overlaps = detections[..kept]
            .iter()
            .any(|k| k.bbox.iou(&detections[index].bbox) > iou_threshold as f64);
        if !overlaps {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
