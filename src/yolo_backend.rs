// THEORY:
// The `yolo_backend` module is the built-in detector/tracker collaborator for
// `Mat` frames. Each frame is fitted into the square model input, run through a
// YOLOv8 ONNX model with ONNX Runtime, decoded and suppressed by
// `yolo_decode`, and handed to an `IouAssociator` that assigns identifiers.
//
// Everything model specific stays in this file; the rest of the crate only sees
// an `ObjectTracker<Mat>`.

use std::fmt::Display;

use log::{debug, info};
use ndarray::Array4;
use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::Session;
use ort::value::Value;

use crate::config::DetectorSettings;
use crate::core_modules::association::{AssociationSettings, IouAssociator};
use crate::core_modules::canvas::Canvas;
use crate::core_modules::observation::TrackedObject;
use crate::core_modules::tracker::ObjectTracker;
use crate::core_modules::yolo_decode::{Letterbox, decode_detections, non_max_suppression};
use crate::error::TrackerError;

/// Grey fill of the input square outside the resized frame.
const PAD_VALUE: f32 = 144.0 / 255.0;

fn backend(e: impl Display) -> TrackerError {
    TrackerError::Backend(e.to_string())
}

/// YOLOv8 detection followed by overlap association.
pub struct YoloTracker {
    session: Session,
    settings: DetectorSettings,
    associator: IouAssociator,
}

impl YoloTracker {
    /// Loads the model named in `settings`.
    pub fn load(settings: &DetectorSettings) -> Result<Self, TrackerError> {
        let model_error = |e: ort::Error| TrackerError::Model {
            path: settings.model.clone(),
            reason: e.to_string(),
        };
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(&settings.model))
            .map_err(model_error)?;
        info!(
            "loaded detection model {} ({}px input)",
            settings.model.display(),
            settings.input_size
        );

        let association = AssociationSettings {
            low_score: settings.confidence.min(AssociationSettings::default().low_score),
            max_lost: settings.max_lost,
            ..Default::default()
        };
        Ok(Self {
            session,
            settings: settings.clone(),
            associator: IouAssociator::new(association),
        })
    }

    /// Resizes a BGR frame into an RGB `[1, 3, size, size]` tensor in `[0, 1]`.
    fn preprocess(&self, frame: &Mat, letterbox: &Letterbox) -> Result<Array4<f32>, TrackerError> {
        if frame.channels() != 3 {
            return Err(backend(format!(
                "expected a 3-channel frame, got {} channels",
                frame.channels()
            )));
        }
        let (width, height) = (
            letterbox.scaled_width as usize,
            letterbox.scaled_height as usize,
        );
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(width as i32, height as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .map_err(backend)?;
        let bytes = resized.data_bytes().map_err(backend)?;
        if bytes.len() != width * height * 3 {
            return Err(backend("resized frame is not continuous"));
        }

        let side = self.settings.input_size as usize;
        let mut input = Array4::from_elem((1, 3, side, side), PAD_VALUE);
        for y in 0..height {
            for x in 0..width {
                let pixel = &bytes[(y * width + x) * 3..][..3];
                input[[0, 0, y, x]] = pixel[2] as f32 / 255.0;
                input[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
                input[[0, 2, y, x]] = pixel[0] as f32 / 255.0;
            }
        }
        Ok(input)
    }
}

impl ObjectTracker<Mat> for YoloTracker {
    fn name(&self) -> &'static str {
        "yolov8"
    }

    fn track(&mut self, frame: &Mat, frame_index: u64) -> Result<Vec<TrackedObject>, TrackerError> {
        let size = <Mat as Canvas>::dimensions(frame);
        let letterbox = Letterbox::fit(size, self.settings.input_size);
        let input = self.preprocess(frame, &letterbox)?;

        let mut detections = {
            let input = Value::from_array(input).map_err(backend)?;
            let outputs = self.session.run(ort::inputs![input]).map_err(backend)?;
            let output = outputs
                .get("output0")
                .or_else(|| outputs.get("output"))
                .ok_or_else(|| backend("model has no output0 tensor"))?;
            let (shape, data) = output.try_extract_tensor::<f32>().map_err(backend)?;
            let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            decode_detections(&shape, data, &letterbox, size, self.settings.confidence)?
        };
        non_max_suppression(&mut detections, self.settings.nms_iou);

        let objects = self.associator.update(&detections);
        debug!(
            "frame {frame_index}: {} detections, {} live tracks",
            detections.len(),
            self.associator.track_count()
        );
        Ok(objects)
    }
}
