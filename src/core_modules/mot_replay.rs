// THEORY:
// `MotReplayTracker` is the concrete tracker collaborator shipped with the crate.
// It does not run a model itself: it replays the output of an external tracker
// that was written in the MOT Challenge text format, one record per object per
// frame:
//
//     frame, id, left, top, width, height[, confidence[, class, ...]]
//
// Frames are numbered from 1. An id of -1 marks a detection whose identity the
// tracker has not confirmed yet, and a confidence of -1 means "not reported".
// Trailing columns beyond the class are ignored, which keeps the common
// `x, y, z = -1` padding of MOT result files readable.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;

use crate::core_modules::observation::{BoundingBox, TrackedObject};
use crate::core_modules::tracker::ObjectTracker;
use crate::error::TrackerError;

/// Replays per-frame tracks produced by an external tracker.
#[derive(Debug, Clone, Default)]
pub struct MotReplayTracker {
    /// Objects keyed by 1-based frame number.
    frames: HashMap<u64, Vec<TrackedObject>>,
    source: Option<PathBuf>,
    records: usize,
}

impl MotReplayTracker {
    /// Loads a MOT-format track file.
    pub fn from_path(path: &Path) -> Result<Self, TrackerError> {
        let text = fs::read_to_string(path).map_err(|source| TrackerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut tracker: Self = text.parse()?;
        tracker.source = Some(path.to_path_buf());
        debug!(
            "loaded {} track records over {} frames from {}",
            tracker.records,
            tracker.frames.len(),
            path.display()
        );
        Ok(tracker)
    }

    /// Number of records loaded.
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Number of distinct frames that have at least one record.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Objects recorded for the given 1-based frame number.
    pub fn objects_in_frame(&self, frame_number: u64) -> &[TrackedObject] {
        self.frames
            .get(&frame_number)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl FromStr for MotReplayTracker {
    type Err = TrackerError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut tracker = Self::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (frame, object) = parse_record(line, index + 1)?;
            tracker.frames.entry(frame).or_default().push(object);
            tracker.records += 1;
        }
        Ok(tracker)
    }
}

fn parse_record(line: &str, line_number: usize) -> Result<(u64, TrackedObject), TrackerError> {
    let malformed = |reason: String| TrackerError::Malformed {
        line: line_number,
        reason,
    };
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return Err(malformed(format!(
            "expected at least 6 fields, found {}",
            fields.len()
        )));
    }

    let number = |index: usize, name: &str| -> Result<f64, TrackerError> {
        fields[index]
            .parse::<f64>()
            .map_err(|_| malformed(format!("{name} `{}` is not a number", fields[index])))
    };

    let frame = number(0, "frame")?;
    if frame < 1.0 || frame.fract() != 0.0 {
        return Err(malformed(format!(
            "frame `{}` must be a positive integer",
            fields[0]
        )));
    }
    let id = number(1, "id")?;
    if id.fract() != 0.0 {
        return Err(malformed(format!("id `{}` must be an integer", fields[1])));
    }

    let bbox = BoundingBox::new(
        number(2, "left")?,
        number(3, "top")?,
        number(4, "width")?,
        number(5, "height")?,
    );
    let mut object = TrackedObject::new((id >= 0.0).then_some(id as u64), bbox);

    if fields.len() > 6 {
        let confidence = number(6, "confidence")?;
        if confidence >= 0.0 {
            object.confidence = Some(confidence as f32);
        }
    }
    if fields.len() > 7 {
        let class = number(7, "class")?;
        if class >= 0.0 && class.fract() == 0.0 {
            object.class_id = Some(class as u32);
        }
    }

    Ok((frame as u64, object))
}

impl<F> ObjectTracker<F> for MotReplayTracker {
    fn name(&self) -> &'static str {
        "mot-replay"
    }

    fn track(&mut self, _frame: &F, frame_index: u64) -> Result<Vec<TrackedObject>, TrackerError> {
        Ok(self.objects_in_frame(frame_index + 1).to_vec())
    }
}
