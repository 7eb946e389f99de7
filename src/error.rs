use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Failures of the video decode / encode collaborators.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("could not open video file {}", path.display())]
    Open { path: PathBuf },
    #[error("invalid video properties: fps {fps}, width {width}, height {height}")]
    InvalidProperties { fps: u32, width: u32, height: u32 },
    #[error("could not create video writer for {}", path.display())]
    CreateWriter { path: PathBuf },
    #[error("frame size {got:?} does not match the stream size {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("video backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of the external detector / tracker collaborator.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to read tracks from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed track record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("failed to load detection model {}: {reason}", path.display())]
    Model { path: PathBuf, reason: String },
    #[error("tracker backend error: {0}")]
    Backend(String),
}

/// A drawing call on a frame failed.
#[derive(Debug, Error)]
#[error("render failed: {0}")]
pub struct CanvasError(pub String);

/// Everything that can stop a processing run. The public `track_video` entry
/// point collapses all of these into "no output produced".
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Canvas(#[from] CanvasError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VideoError {
    fn from(e: opencv::Error) -> Self {
        VideoError::Backend(e.to_string())
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for CanvasError {
    fn from(e: opencv::Error) -> Self {
        CanvasError(e.to_string())
    }
}
