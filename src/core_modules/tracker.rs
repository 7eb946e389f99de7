// THEORY:
// The `tracker` module defines the contract with the external detection and
// tracking collaborator. This crate never detects objects and never decides
// which detection belongs to which identity; a pretrained model (or a tool that
// already ran one) does that. All we require is that, for every frame, the
// collaborator reports the boxes it sees and, where it is confident, a stable
// identifier per object.
//
// The collaborator also owns the look of its own detections: `annotate` draws
// boxes and labels onto the frame before the trails are layered on top. A
// default implementation is provided so simple trackers only implement `track`.

use crate::core_modules::canvas::{Canvas, RgbColor, palette_color};
use crate::core_modules::observation::TrackedObject;
use crate::error::{CanvasError, TrackerError};

/// How detections are drawn before trails are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationStyle {
    pub draw_boxes: bool,
    pub draw_labels: bool,
    pub box_thickness: u32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            draw_boxes: true,
            draw_labels: true,
            box_thickness: 2,
        }
    }
}

/// External detector/tracker seam, generic over the frame type `F`.
pub trait ObjectTracker<F> {
    /// Backend identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Runs detection and identity association on `frame`, the
    /// `frame_index`-th frame of the video (0-based).
    fn track(&mut self, frame: &F, frame_index: u64) -> Result<Vec<TrackedObject>, TrackerError>;

    /// Draws boxes and labels for `objects` onto `frame`.
    fn annotate(
        &self,
        frame: &mut F,
        objects: &[TrackedObject],
        style: &AnnotationStyle,
    ) -> Result<(), CanvasError>
    where
        F: Canvas,
    {
        let size = frame.dimensions();
        for object in objects {
            // Boxes with non-finite corners are skipped, as their trail points are.
            let Some(visible) = object.bbox.clipped_to(size, 0.0) else {
                continue;
            };
            let color = object_color(object);
            if style.draw_boxes {
                frame.draw_rect(&object.bbox, color, style.box_thickness)?;
            }
            if style.draw_labels {
                let anchor = (visible.left as i32, visible.top as i32);
                frame.draw_label(&object.label(), anchor, color)?;
            }
        }
        Ok(())
    }
}

/// Colour by class when known, otherwise by track identifier.
pub fn object_color(object: &TrackedObject) -> RgbColor {
    match (object.class_id, object.id) {
        (Some(class_id), _) => palette_color(class_id as u64),
        (None, Some(id)) => palette_color(id),
        (None, None) => palette_color(0),
    }
}

impl<F, T: ObjectTracker<F> + ?Sized> ObjectTracker<F> for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn track(&mut self, frame: &F, frame_index: u64) -> Result<Vec<TrackedObject>, TrackerError> {
        (**self).track(frame, frame_index)
    }

    fn annotate(
        &self,
        frame: &mut F,
        objects: &[TrackedObject],
        style: &AnnotationStyle,
    ) -> Result<(), CanvasError>
    where
        F: Canvas,
    {
        (**self).annotate(frame, objects, style)
    }
}
