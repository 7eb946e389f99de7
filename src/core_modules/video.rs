// THEORY:
// The `video` module describes the decode and encode collaborators as traits.
// The pipeline pulls frames from a `FrameSource` until it runs dry and pushes
// every annotated frame into a `FrameSink`. Neither trait says anything about
// codecs or containers; the OpenCV backend implements them for real files and
// the tests implement them over in-memory `RgbImage`s.
//
// Handles are released on every exit path. The pipeline calls
// `FrameSink::release` after the last frame, and on failure it calls
// `FrameSink::discard`, which releases and removes the partial output.
// Implementations owning native handles also release in `Drop`.

use crate::error::VideoError;

/// Raw stream properties as reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoProperties {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Stream properties that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    /// Whole frames per second; fractional rates are truncated.
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl VideoProperties {
    pub fn new(fps: f64, width: u32, height: u32) -> Self {
        Self { fps, width, height }
    }

    /// Truncates the frame rate to whole frames and rejects streams where the
    /// rate or either dimension comes out as zero.
    pub fn validate(&self) -> Result<StreamGeometry, VideoError> {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            self.fps as u32
        } else {
            0
        };
        if fps == 0 || self.width == 0 || self.height == 0 {
            return Err(VideoError::InvalidProperties {
                fps,
                width: self.width,
                height: self.height,
            });
        }
        Ok(StreamGeometry {
            fps,
            width: self.width,
            height: self.height,
        })
    }
}

/// Decode collaborator: yields frames one at a time.
pub trait FrameSource {
    type Frame;

    fn properties(&self) -> VideoProperties;

    /// The next frame, or `None` once the stream is exhausted.
    fn read_frame(&mut self) -> Result<Option<Self::Frame>, VideoError>;
}

/// Encode collaborator: consumes annotated frames.
pub trait FrameSink<F> {
    fn write_frame(&mut self, frame: &F) -> Result<(), VideoError>;

    /// Flushes and closes the output. Further writes are an error.
    fn release(&mut self) -> Result<(), VideoError>;

    /// Closes the output and throws away whatever was written, so a failed
    /// run leaves no partial video behind. Sinks without a persistent output
    /// only need to release.
    fn discard(&mut self) -> Result<(), VideoError> {
        self.release()
    }
}

impl<F, W: FrameSink<F> + ?Sized> FrameSink<F> for &mut W {
    fn write_frame(&mut self, frame: &F) -> Result<(), VideoError> {
        (**self).write_frame(frame)
    }

    fn release(&mut self) -> Result<(), VideoError> {
        (**self).release()
    }

    fn discard(&mut self) -> Result<(), VideoError> {
        (**self).discard()
    }
}
