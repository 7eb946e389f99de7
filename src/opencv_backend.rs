// THEORY:
// The `opencv_backend` module connects the pipeline to real video files. It
// provides the decode collaborator (`CvFrameSource` over `VideoCapture`), the
// encode collaborator (`CvFrameSink` over `VideoWriter`), a `Canvas` for `Mat`
// frames, and `track_video`: the single function both the CLI harness and the
// web UI call.
//
// Both handles are released on every exit path. `Drop` releases whatever is
// still open; the success path releases the writer explicitly first so that a
// failure while finalising the container is reported rather than lost. A
// failed run discards the sink, which also deletes the partial file.
//
// The tracker is picked from configuration: replayed MOT tracks by default, or
// the YOLOv8 detector when the crate is built with `yolo`. A detector that
// cannot be loaded falls back to replay when a tracks file sits next to the
// video.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use opencv::core::{Mat, Point, Rect, Scalar, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture, VideoWriter};

use crate::config::{PipelineConfig, TrackerBackend};
use crate::core_modules::canvas::{Canvas, RgbColor, label_top};
use crate::core_modules::mot_replay::MotReplayTracker;
use crate::core_modules::observation::BoundingBox;
use crate::core_modules::tracker::ObjectTracker;
use crate::core_modules::video::{FrameSink, FrameSource, StreamGeometry, VideoProperties};
use crate::error::{CanvasError, PipelineError, VideoError};
use crate::pipeline::process_video;

const LABEL_FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const LABEL_SCALE: f64 = 0.5;
const LABEL_THICKNESS: i32 = 1;

/// OpenCV stores pixels as BGR.
fn bgr(color: RgbColor) -> Scalar {
    Scalar::new(color[2] as f64, color[1] as f64, color[0] as f64, 0.0)
}

fn path_str(path: &Path) -> Option<&str> {
    path.to_str()
}

impl Canvas for Mat {
    fn dimensions(&self) -> (u32, u32) {
        (self.cols().max(0) as u32, self.rows().max(0) as u32)
    }

    fn draw_rect(
        &mut self,
        bbox: &BoundingBox,
        color: RgbColor,
        thickness: u32,
    ) -> Result<(), CanvasError> {
        let Some(visible) = bbox.clipped_to(self.dimensions(), thickness as f64 + 1.0) else {
            return Ok(());
        };
        let rect = Rect::new(
            visible.left as i32,
            visible.top as i32,
            visible.width as i32,
            visible.height as i32,
        );
        imgproc::rectangle(self, rect, bgr(color), thickness as i32, imgproc::LINE_8, 0)?;
        Ok(())
    }

    fn draw_label(
        &mut self,
        text: &str,
        anchor: (i32, i32),
        color: RgbColor,
    ) -> Result<(), CanvasError> {
        if text.is_empty() {
            return Ok(());
        }
        let mut baseline = 0;
        let size = imgproc::get_text_size(text, LABEL_FONT, LABEL_SCALE, LABEL_THICKNESS, &mut baseline)?;
        let height = size.height + baseline + 2;
        let top = label_top(anchor, height);
        let background = Rect::new(anchor.0, top, size.width + 4, height);
        imgproc::rectangle(self, background, bgr(color), imgproc::FILLED, imgproc::LINE_8, 0)?;
        imgproc::put_text(
            self,
            text,
            Point::new(anchor.0 + 2, top + size.height + 1),
            LABEL_FONT,
            LABEL_SCALE,
            Scalar::all(255.0),
            LABEL_THICKNESS,
            imgproc::LINE_AA,
            false,
        )?;
        Ok(())
    }

    fn draw_polyline(
        &mut self,
        points: &[(i32, i32)],
        color: RgbColor,
        thickness: u32,
    ) -> Result<(), CanvasError> {
        if points.is_empty() {
            return Ok(());
        }
        let contour: Vector<Point> = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
        let mut contours = Vector::<Vector<Point>>::new();
        contours.push(contour);
        imgproc::polylines(
            self,
            &contours,
            false,
            bgr(color),
            thickness.max(1) as i32,
            imgproc::LINE_8,
            0,
        )?;
        Ok(())
    }
}

/// Decode handle over a video file.
pub struct CvFrameSource {
    capture: VideoCapture,
    properties: VideoProperties,
    path: PathBuf,
}

impl CvFrameSource {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        let open_error = || VideoError::Open {
            path: path.to_path_buf(),
        };
        let name = path_str(path).ok_or_else(open_error)?;
        let capture = VideoCapture::from_file(name, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(open_error());
        }

        let fps = capture.get(videoio::CAP_PROP_FPS)?;
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)?;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)?;
        let properties = VideoProperties::new(fps, width.max(0.0) as u32, height.max(0.0) as u32);
        info!(
            "opened {}: {:.2} fps, {}x{}",
            path.display(),
            fps,
            properties.width,
            properties.height
        );

        Ok(Self {
            capture,
            properties,
            path: path.to_path_buf(),
        })
    }
}

impl FrameSource for CvFrameSource {
    type Frame = Mat;

    fn properties(&self) -> VideoProperties {
        self.properties
    }

    fn read_frame(&mut self) -> Result<Option<Mat>, VideoError> {
        let mut frame = Mat::default();
        match self.capture.read(&mut frame) {
            Ok(true) if !frame.empty() => Ok(Some(frame)),
            Ok(_) => {
                debug!("no more frames in {}", self.path.display());
                Ok(None)
            }
            // A decode error ends the stream the same way running out of frames does.
            Err(e) => {
                warn!("error reading frame from {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }
}

impl Drop for CvFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("failed to release {}: {e}", self.path.display());
        }
    }
}

/// Encode handle writing an annotated video file.
pub struct CvFrameSink {
    writer: VideoWriter,
    path: PathBuf,
    size: (u32, u32),
    released: bool,
}

impl CvFrameSink {
    /// Opens `path` for writing, creating its directory when needed.
    pub fn create(
        path: &Path,
        codec: [char; 4],
        geometry: &StreamGeometry,
    ) -> Result<Self, VideoError> {
        let create_error = || VideoError::CreateWriter {
            path: path.to_path_buf(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let name = path_str(path).ok_or_else(create_error)?;
        let fourcc = VideoWriter::fourcc(codec[0], codec[1], codec[2], codec[3])?;
        let writer = VideoWriter::new(
            name,
            fourcc,
            geometry.fps as f64,
            Size::new(geometry.width as i32, geometry.height as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(create_error());
        }
        debug!("video writer initialised for {}", path.display());

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            size: (geometry.width, geometry.height),
            released: false,
        })
    }
}

impl FrameSink<Mat> for CvFrameSink {
    fn write_frame(&mut self, frame: &Mat) -> Result<(), VideoError> {
        if self.released {
            return Err(VideoError::Backend(format!(
                "writer for {} is already released",
                self.path.display()
            )));
        }
        // VideoWriter silently drops frames of the wrong size.
        let got = <Mat as Canvas>::dimensions(frame);
        if got != self.size {
            return Err(VideoError::FrameSize {
                expected: self.size,
                got,
            });
        }
        self.writer.write(frame)?;
        Ok(())
    }

    fn release(&mut self) -> Result<(), VideoError> {
        if !self.released {
            self.released = true;
            self.writer.release()?;
        }
        Ok(())
    }

    fn discard(&mut self) -> Result<(), VideoError> {
        self.release()?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            debug!("removed partial output {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for CvFrameSink {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed to release writer for {}: {e}", self.path.display());
        }
    }
}

/// Annotates `video` and returns the path of the written output, or `None`
/// when no output was produced. Failures are logged.
pub fn track_video(video: &Path, config: &PipelineConfig) -> Option<PathBuf> {
    info!("starting track_video with {}", video.display());
    match try_track_video(video, config) {
        Ok(output) => {
            info!("output video saved to {}", output.display());
            Some(output)
        }
        Err(e) => {
            error!("tracking {} failed: {e}", video.display());
            None
        }
    }
}

/// Like [`track_video`] but returns the failure.
pub fn try_track_video(video: &Path, config: &PipelineConfig) -> Result<PathBuf, PipelineError> {
    config.validate()?;
    let codec = config.codec_chars()?;
    let output = config.checked_output_path_for(video)?;

    let mut source = CvFrameSource::open(video)?;
    let tracker = open_tracker(video, config)?;

    let summary = process_video(
        &mut source,
        |geometry: &StreamGeometry| -> Result<CvFrameSink, PipelineError> {
            Ok(CvFrameSink::create(&output, codec, geometry)?)
        },
        tracker,
        config,
    )?;
    debug!(
        "{} frames, {} observations, {} rejected points",
        summary.frames, summary.observations, summary.rejected_points
    );
    Ok(output)
}

/// The tracker collaborator selected by `config.tracker`.
fn open_tracker(
    video: &Path,
    config: &PipelineConfig,
) -> Result<Box<dyn ObjectTracker<Mat>>, PipelineError> {
    let tracks_path = config.tracks_path_for(video);
    match config.tracker {
        TrackerBackend::Replay => Ok(Box::new(MotReplayTracker::from_path(&tracks_path)?)),
        TrackerBackend::Yolo => match open_detector(config) {
            Ok(detector) => Ok(detector),
            Err(e) if tracks_path.exists() => {
                warn!(
                    "{e}; replaying tracks from {} instead",
                    tracks_path.display()
                );
                Ok(Box::new(MotReplayTracker::from_path(&tracks_path)?))
            }
            Err(e) => Err(e),
        },
    }
}

#[cfg(feature = "yolo")]
fn open_detector(config: &PipelineConfig) -> Result<Box<dyn ObjectTracker<Mat>>, PipelineError> {
    Ok(Box::new(crate::yolo_backend::YoloTracker::load(&config.detector)?))
}

#[cfg(not(feature = "yolo"))]
fn open_detector(_config: &PipelineConfig) -> Result<Box<dyn ObjectTracker<Mat>>, PipelineError> {
    Err(crate::config::ConfigError::Invalid(
        "tracker.backend = \"yolo\" needs trail_vision built with the `yolo` feature".into(),
    )
    .into())
}
