// THEORY:
// This file is the main entry point for the `trail_vision` library crate.
// The public surface is deliberately small: a `TrackingPipeline` that drives a
// frame source, an external tracker and a frame sink, the `TrailTable` that
// keeps the bounded per-object motion history, and the configuration types that
// replace what would otherwise be literals scattered through the frame loop.
//
// Everything that touches real video files lives behind the `opencv` feature in
// `opencv_backend`, so the core builds and tests without a native OpenCV
// installation. The CLI harness and the web UI both end up calling the same
// `track_video` function exported from there. The `yolo` feature adds a
// built-in YOLOv8 detector on top of it; without it, tracks produced by an
// external tracker are replayed.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

#[cfg(feature = "opencv")]
pub mod opencv_backend;
#[cfg(feature = "yolo")]
pub mod yolo_backend;

pub use crate::config::{PipelineConfig, TrackerBackend};
pub use crate::core_modules::output_naming::OutputNaming;
pub use crate::core_modules::trail_table::{TrackId, TrailError, TrailPoint, TrailTable};
pub use crate::error::PipelineError;
pub use crate::pipeline::{RunSummary, TrackingPipeline};

#[cfg(feature = "opencv")]
pub use crate::opencv_backend::{track_video, try_track_video};
