// THEORY:
// The `pipeline` module is the top-level API of the crate. It sequences one
// processing run: pull a frame, let the external tracker find and identify the
// objects in it, let the tracker draw its own boxes and labels, extend each
// identified object's trail and draw it, then hand the frame to the encoder.
//
// It is deliberately strict about ordering and ownership:
// 1.  **One Frame at a Time**: a frame is fully tracked, annotated and written
//     before the next one is read. Nothing is buffered or processed ahead.
// 2.  **Exclusive Trail State**: the `TrailTable` is owned by the pipeline and
//     lives exactly as long as the run.
// 3.  **Validate Before Writing**: stream properties are checked before the
//     output is opened, so a broken input never leaves an empty output behind.

use log::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::core_modules::canvas::Canvas;
use crate::core_modules::tracker::ObjectTracker;
use crate::core_modules::trail_table::{TrailPoint, TrailTable};
use crate::core_modules::video::{FrameSink, FrameSource, StreamGeometry};
use crate::error::PipelineError;

// Re-export the collaborator-facing types for the public API.
pub use crate::core_modules::mot_replay::MotReplayTracker;
pub use crate::core_modules::observation::{BoundingBox, TrackedObject};
pub use crate::core_modules::tracker::AnnotationStyle;
pub use crate::core_modules::video::VideoProperties;

/// What happened to a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Objects reported by the tracker, identified or not.
    pub objects: usize,
    pub trails_drawn: usize,
    /// Positions refused by the trail table (non-finite boxes).
    pub rejected_points: usize,
    /// Trails forgotten at the end of this frame.
    pub evicted_trails: usize,
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    /// Identified observations appended to trails.
    pub observations: u64,
    pub rejected_points: u64,
    /// Identifiers holding a trail when the run ended.
    pub identifiers: usize,
}

/// Drives a tracker over a stream of frames and overlays motion trails.
pub struct TrackingPipeline<T> {
    tracker: T,
    trails: TrailTable,
    config: PipelineConfig,
    summary: RunSummary,
}

impl<T> TrackingPipeline<T> {
    pub fn new(tracker: T, config: PipelineConfig) -> Self {
        let trails =
            TrailTable::new(config.trail.capacity).with_stale_after(config.trail.stale_after);
        Self {
            tracker,
            trails,
            config,
            summary: RunSummary::default(),
        }
    }

    /// Processes one frame in place: tracking, annotation and trails.
    pub fn process_frame<F: Canvas>(&mut self, frame: &mut F) -> Result<FrameReport, PipelineError>
    where
        T: ObjectTracker<F>,
    {
        let frame_index = self.trails.frame_index();
        let frame_number = frame_index + 1;
        if frame_number % self.config.progress_every.max(1) == 0 {
            debug!("processing frame {frame_number}");
        }

        // Stage 1: Detection and identity association (external)
        let objects = self.tracker.track(frame, frame_index)?;

        // Stage 2: Tracker-owned annotation
        self.tracker
            .annotate(frame, &objects, &self.config.annotation)?;

        // Stage 3: Trail update and rendering
        let mut trails_drawn = 0;
        let mut rejected_points = 0;
        for object in &objects {
            let Some(id) = object.id else {
                continue;
            };
            let points: Vec<(i32, i32)> = match self.trails.observe(id, object.bbox.center()) {
                Ok(history) => history.iter().map(TrailPoint::to_pixel).collect(),
                Err(e) => {
                    warn!("frame {frame_number}: dropping position of track {id}: {e}");
                    rejected_points += 1;
                    continue;
                }
            };
            frame.draw_polyline(&points, self.config.trail.color, self.config.trail.thickness)?;
            trails_drawn += 1;
        }

        // Stage 4: Retention
        let evicted_trails = self.trails.end_frame();
        if evicted_trails > 0 {
            debug!("frame {frame_number}: forgot {evicted_trails} stale trails");
        }

        self.summary.frames += 1;
        self.summary.observations += trails_drawn as u64;
        self.summary.rejected_points += rejected_points as u64;
        self.summary.identifiers = self.trails.len();

        Ok(FrameReport {
            frame_index,
            objects: objects.len(),
            trails_drawn,
            rejected_points,
            evicted_trails,
        })
    }

    /// Processes every frame of `source` into `sink`, then releases the sink.
    /// The sink is released on failure as well.
    pub fn run<S, W>(&mut self, source: &mut S, sink: &mut W) -> Result<RunSummary, PipelineError>
    where
        S: FrameSource,
        S::Frame: Canvas,
        W: FrameSink<S::Frame>,
        T: ObjectTracker<S::Frame>,
    {
        if let Err(e) = self.pump(source, sink) {
            if let Err(release_error) = sink.release() {
                warn!("failed to release output after error: {release_error}");
            }
            return Err(e);
        }
        sink.release()?;

        info!(
            "finished: {} frames, {} trail points, {} identifiers",
            self.summary.frames, self.summary.observations, self.summary.identifiers
        );
        Ok(self.summary.clone())
    }

    fn pump<S, W>(&mut self, source: &mut S, sink: &mut W) -> Result<(), PipelineError>
    where
        S: FrameSource,
        S::Frame: Canvas,
        W: FrameSink<S::Frame>,
        T: ObjectTracker<S::Frame>,
    {
        while let Some(mut frame) = source.read_frame()? {
            self.process_frame(&mut frame)?;
            sink.write_frame(&frame)?;
        }
        Ok(())
    }

    pub fn trails(&self) -> &TrailTable {
        &self.trails
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }
}

/// Validates the stream, opens the output through `open_sink` and runs a fresh
/// pipeline over `source`. `open_sink` is never called for an invalid stream,
/// and a run that fails after opening it discards the partial output.
pub fn process_video<S, W, T, O>(
    source: &mut S,
    open_sink: O,
    tracker: T,
    config: &PipelineConfig,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource,
    S::Frame: Canvas,
    W: FrameSink<S::Frame>,
    T: ObjectTracker<S::Frame>,
    O: FnOnce(&StreamGeometry) -> Result<W, PipelineError>,
{
    let geometry = source.properties().validate()?;
    debug!(
        "video properties: fps {}, width {}, height {}",
        geometry.fps, geometry.width, geometry.height
    );
    let mut sink = open_sink(&geometry)?;
    info!("tracking with the {} backend", tracker.name());
    let result = TrackingPipeline::new(tracker, config.clone()).run(source, &mut sink);
    if result.is_err() {
        if let Err(e) = sink.discard() {
            warn!("failed to discard partial output: {e}");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use image::RgbImage;

    use super::*;
    use crate::core_modules::canvas::RgbColor;
    use crate::error::{TrackerError, VideoError};

    const GREEN: RgbColor = [0, 255, 0];

    struct VecSource {
        frames: VecDeque<RgbImage>,
        props: VideoProperties,
    }

    impl VecSource {
        fn blank(count: usize, width: u32, height: u32) -> Self {
            Self {
                frames: (0..count).map(|_| RgbImage::new(width, height)).collect(),
                props: VideoProperties::new(25.0, width, height),
            }
        }
    }

    impl FrameSource for VecSource {
        type Frame = RgbImage;

        fn properties(&self) -> VideoProperties {
            self.props
        }

        fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
            Ok(self.frames.pop_front())
        }
    }

    #[derive(Default)]
    struct VecSink {
        frames: Vec<RgbImage>,
        released: bool,
        discarded: bool,
    }

    impl FrameSink<RgbImage> for VecSink {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<(), VideoError> {
            if self.released {
                return Err(VideoError::Backend("write after release".into()));
            }
            self.frames.push(frame.clone());
            Ok(())
        }

        fn release(&mut self) -> Result<(), VideoError> {
            self.released = true;
            Ok(())
        }

        fn discard(&mut self) -> Result<(), VideoError> {
            self.release()?;
            self.frames.clear();
            self.discarded = true;
            Ok(())
        }
    }

    /// Returns a fixed list of objects per frame.
    struct ScriptedTracker {
        script: Vec<Vec<TrackedObject>>,
    }

    impl ObjectTracker<RgbImage> for ScriptedTracker {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn track(
            &mut self,
            _frame: &RgbImage,
            frame_index: u64,
        ) -> Result<Vec<TrackedObject>, TrackerError> {
            self.script
                .get(frame_index as usize)
                .cloned()
                .ok_or_else(|| TrackerError::Backend(format!("no script for frame {frame_index}")))
        }
    }

    fn object(id: Option<u64>, cx: f64, cy: f64) -> TrackedObject {
        TrackedObject::new(id, BoundingBox::from_xywh(cx, cy, 10.0, 10.0))
    }

    fn no_boxes() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.annotation.draw_boxes = false;
        config.annotation.draw_labels = false;
        config
    }

    #[test]
    fn trails_are_drawn_between_successive_centres() {
        let tracker = ScriptedTracker {
            script: vec![
                vec![object(Some(1), 10.0, 10.0)],
                vec![object(Some(1), 40.0, 10.0)],
            ],
        };
        let mut source = VecSource::blank(2, 64, 64);
        let mut sink = VecSink::default();
        let mut pipeline = TrackingPipeline::new(tracker, no_boxes());

        let summary = pipeline.run(&mut source, &mut sink).unwrap();

        assert!(sink.released);
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(
            summary,
            RunSummary {
                frames: 2,
                observations: 2,
                rejected_points: 0,
                identifiers: 1
            }
        );
        let last = &sink.frames[1];
        assert_eq!(last.get_pixel(25, 10).0, GREEN);
        // The first frame only has a single point.
        assert_eq!(sink.frames[0].get_pixel(25, 10).0, [0, 0, 0]);
        assert_eq!(pipeline.trails().history(&1).unwrap().len(), 2);
    }

    #[test]
    fn unidentified_objects_get_boxes_but_no_trail() {
        let tracker = ScriptedTracker {
            script: vec![vec![object(None, 32.0, 32.0)]],
        };
        let mut pipeline = TrackingPipeline::new(tracker, PipelineConfig::default());
        let mut frame = RgbImage::new(64, 64);

        let report = pipeline.process_frame(&mut frame).unwrap();

        assert_eq!(report.objects, 1);
        assert_eq!(report.trails_drawn, 0);
        assert!(pipeline.trails().is_empty());
        // Box outline at the top-left corner (27, 27).
        assert_ne!(frame.get_pixel(27, 30).0, [0, 0, 0]);
        // No trail dot at the centre.
        assert_eq!(frame.get_pixel(32, 32).0, [0, 0, 0]);
    }

    #[test]
    fn trail_length_follows_configuration() {
        let script = (0..10)
            .map(|i| vec![object(Some(4), 5.0 + i as f64, 5.0)])
            .collect();
        let mut config = no_boxes();
        config.trail.capacity = 3;
        let mut pipeline = TrackingPipeline::new(ScriptedTracker { script }, config);
        for _ in 0..10 {
            pipeline.process_frame(&mut RgbImage::new(32, 32)).unwrap();
        }
        let history: Vec<_> = pipeline.trails().history(&4).unwrap().iter().copied().collect();
        assert_eq!(
            history,
            vec![
                TrailPoint::new(12.0, 5.0),
                TrailPoint::new(13.0, 5.0),
                TrailPoint::new(14.0, 5.0)
            ]
        );
    }

    #[test]
    fn non_finite_boxes_are_skipped() {
        let tracker = ScriptedTracker {
            script: vec![vec![object(Some(2), f64::NAN, 3.0), object(Some(3), 8.0, 8.0)]],
        };
        let mut pipeline = TrackingPipeline::new(tracker, no_boxes());
        let report = pipeline.process_frame(&mut RgbImage::new(16, 16)).unwrap();
        assert_eq!(report.rejected_points, 1);
        assert_eq!(report.trails_drawn, 1);
        assert!(!pipeline.trails().contains(&2));
        assert_eq!(pipeline.summary().rejected_points, 1);
    }

    #[test]
    fn stale_trails_are_forgotten_when_configured() {
        let mut script = vec![vec![object(Some(1), 4.0, 4.0)]];
        script.extend((0..3).map(|_| Vec::new()));
        let mut config = no_boxes();
        config.trail.stale_after = Some(1);
        let mut pipeline = TrackingPipeline::new(ScriptedTracker { script }, config);

        let reports: Vec<FrameReport> = (0..4)
            .map(|_| pipeline.process_frame(&mut RgbImage::new(8, 8)).unwrap())
            .collect();

        assert_eq!(reports[1].evicted_trails, 0);
        assert_eq!(reports[2].evicted_trails, 1);
        assert!(pipeline.trails().is_empty());
    }

    #[test]
    fn invalid_stream_never_opens_output() {
        let mut source = VecSource::blank(1, 64, 64);
        source.props.fps = 0.0;
        let mut opened = false;
        let result = process_video(
            &mut source,
            |_geometry: &StreamGeometry| -> Result<VecSink, PipelineError> {
                opened = true;
                Ok(VecSink::default())
            },
            ScriptedTracker { script: vec![] },
            &PipelineConfig::default(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Video(VideoError::InvalidProperties { fps: 0, .. }))
        ));
        assert!(!opened);
    }

    #[test]
    fn tracker_failure_aborts_the_run() {
        let mut source = VecSource::blank(3, 16, 16);
        let tracker = ScriptedTracker {
            script: vec![Vec::new()],
        };
        let result = process_video(
            &mut source,
            |geometry: &StreamGeometry| -> Result<VecSink, PipelineError> {
                assert_eq!(geometry.fps, 25);
                Ok(VecSink::default())
            },
            tracker,
            &PipelineConfig::default(),
        );
        assert!(matches!(result, Err(PipelineError::Tracker(_))));
    }

    #[test]
    fn failed_run_releases_and_discards_partial_output() {
        let mut source = VecSource::blank(3, 16, 16);
        // Frame 1 succeeds, frame 2 has no script and fails.
        let tracker = ScriptedTracker {
            script: vec![vec![object(Some(1), 8.0, 8.0)]],
        };
        let mut sink = VecSink::default();
        let result = process_video(
            &mut source,
            |_: &StreamGeometry| -> Result<&mut VecSink, PipelineError> { Ok(&mut sink) },
            tracker,
            &no_boxes(),
        );

        assert!(matches!(result, Err(PipelineError::Tracker(_))));
        assert!(sink.released);
        assert!(sink.discarded);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn run_releases_the_sink_when_a_frame_fails() {
        let mut source = VecSource::blank(2, 16, 16);
        let tracker = ScriptedTracker { script: vec![] };
        let mut sink = VecSink::default();
        let mut pipeline = TrackingPipeline::new(tracker, no_boxes());
        assert!(pipeline.run(&mut source, &mut sink).is_err());
        assert!(sink.released);
        assert!(!sink.discarded);
    }

    #[test]
    fn successful_run_keeps_the_output() {
        let mut source = VecSource::blank(2, 16, 16);
        let tracker = ScriptedTracker {
            script: vec![Vec::new(), Vec::new()],
        };
        let mut sink = VecSink::default();
        process_video(
            &mut source,
            |_: &StreamGeometry| -> Result<&mut VecSink, PipelineError> { Ok(&mut sink) },
            tracker,
            &no_boxes(),
        )
        .unwrap();
        assert!(sink.released);
        assert!(!sink.discarded);
        assert_eq!(sink.frames.len(), 2);
    }
}
