// THEORY:
// The `trail_table` module gives the renderer a short memory of where each
// tracked object has been. It does not decide *which* detection belongs to
// *which* object; the external tracker has already done that and hands us an
// identifier. All this module does is remember the recent centres per
// identifier so they can be drawn as a motion trail.
//
// Key architectural principles:
// 1.  **Bounded History**: Every identifier owns a `VecDeque` of at most
//     `capacity` points. Appending past the bound evicts the oldest point, so
//     the trail always shows the most recent stretch of motion, oldest first.
// 2.  **Lazy Creation**: A history is created the first time its identifier is
//     observed (`entry().or_insert_with()`); there is no registration step.
// 3.  **Retention Policy**: By default a history lives for the whole run, even
//     after its identifier stops appearing. An optional `stale_after` bound
//     drops identifiers that have gone unseen for too many frames, which keeps
//     memory flat on long videos with many short-lived objects.
// 4.  **Finite Input Only**: Non-finite coordinates are rejected before they can
//     reach a history, so a single bad box from the tracker cannot poison a
//     trail that is drawn on every later frame.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use thiserror::Error;

/// Number of points kept per trail unless configured otherwise.
pub const DEFAULT_TRAIL_CAPACITY: usize = 30;

/// Identifier assigned by the external tracker.
pub type TrackId = u64;

/// A single trail position in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrailPoint {
    pub x: f64,
    pub y: f64,
}

impl TrailPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Integer pixel coordinates, truncated toward zero.
    pub fn to_pixel(&self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

impl From<(f64, f64)> for TrailPoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TrailError {
    #[error("invalid trail position ({x}, {y}): coordinates must be finite")]
    InvalidPosition { x: f64, y: f64 },
}

#[derive(Debug, Clone)]
struct TrackHistory {
    points: VecDeque<TrailPoint>,
    /// Index of the last frame in which the identifier was observed.
    last_seen_frame: u64,
}

impl TrackHistory {
    fn new(capacity: usize, frame_index: u64) -> Self {
        Self {
            // One spare slot: the push happens before the eviction.
            points: VecDeque::with_capacity(capacity + 1),
            last_seen_frame: frame_index,
        }
    }
}

/// Per-identifier bounded position histories for one processing run.
#[derive(Debug, Clone)]
pub struct TrailTable<K = TrackId> {
    histories: HashMap<K, TrackHistory>,
    capacity: usize,
    stale_after: Option<u64>,
    frame_index: u64,
}

impl<K: Hash + Eq> TrailTable<K> {
    /// Creates an empty table keeping at most `capacity` points per identifier.
    pub fn new(capacity: usize) -> Self {
        Self {
            histories: HashMap::new(),
            capacity: capacity.max(1),
            stale_after: None,
            frame_index: 0,
        }
    }

    /// Drop identifiers that have gone unseen for more than `frames` frames.
    /// `None` keeps every history until the table is dropped.
    pub fn with_stale_after(mut self, frames: Option<u64>) -> Self {
        self.stale_after = frames;
        self
    }

    /// Appends `position` to the history of `id` and returns the whole history,
    /// oldest point first.
    pub fn observe(
        &mut self,
        id: K,
        position: impl Into<TrailPoint>,
    ) -> Result<&[TrailPoint], TrailError> {
        let position = position.into();
        if !position.is_finite() {
            return Err(TrailError::InvalidPosition {
                x: position.x,
                y: position.y,
            });
        }

        let capacity = self.capacity;
        let frame_index = self.frame_index;
        let history = self
            .histories
            .entry(id)
            .or_insert_with(|| TrackHistory::new(capacity, frame_index));

        history.points.push_back(position);
        if history.points.len() > capacity {
            history.points.pop_front();
        }
        history.last_seen_frame = frame_index;

        Ok(history.points.make_contiguous())
    }

    /// Closes the current frame. When a stale bound is configured, identifiers
    /// unseen for more than that many frames are dropped. Returns how many were
    /// dropped.
    pub fn end_frame(&mut self) -> usize {
        let current = self.frame_index;
        let mut evicted = 0;
        if let Some(limit) = self.stale_after {
            let before = self.histories.len();
            self.histories
                .retain(|_, history| current - history.last_seen_frame <= limit);
            evicted = before - self.histories.len();
        }
        self.frame_index += 1;
        evicted
    }

    pub fn history(&self, id: &K) -> Option<&VecDeque<TrailPoint>> {
        self.histories.get(id).map(|history| &history.points)
    }

    pub fn contains(&self, id: &K) -> bool {
        self.histories.contains_key(id)
    }

    /// Number of identifiers with a history.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stale_after(&self) -> Option<u64> {
        self.stale_after
    }

    /// Index of the frame currently being observed.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl<K: Hash + Eq> Default for TrailTable<K> {
    fn default() -> Self {
        Self::new(DEFAULT_TRAIL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(n: usize) -> Vec<TrailPoint> {
        (0..n).map(|i| TrailPoint::new(i as f64, i as f64)).collect()
    }

    #[test]
    fn length_follows_min_of_calls_and_capacity() {
        let mut table: TrailTable = TrailTable::default();
        for (n, point) in diag(45).into_iter().enumerate() {
            let len = table.observe(7, point).unwrap().len();
            assert_eq!(len, (n + 1).min(DEFAULT_TRAIL_CAPACITY));
        }
    }

    #[test]
    fn oldest_point_is_evicted_first() {
        let mut table: TrailTable = TrailTable::new(5);
        let points = diag(9);
        let mut last = Vec::new();
        for point in &points {
            last = table.observe(1, *point).unwrap().to_vec();
        }
        assert_eq!(last, points[4..].to_vec());
    }

    #[test]
    fn histories_are_independent() {
        let mut table: TrailTable = TrailTable::default();
        table.observe(1, (10.0, 10.0)).unwrap();
        table.observe(1, (11.0, 11.0)).unwrap();
        let before = table.history(&1).unwrap().clone();

        table.observe(2, (500.0, 20.0)).unwrap();

        assert_eq!(table.history(&1).unwrap(), &before);
        assert_eq!(table.history(&2).unwrap().len(), 1);
    }

    #[test]
    fn repeated_observation_appends_twice() {
        let mut table: TrailTable = TrailTable::default();
        table.observe(3, (4.0, 4.0)).unwrap();
        let history = table.observe(3, (4.0, 4.0)).unwrap();
        assert_eq!(history, &[TrailPoint::new(4.0, 4.0), TrailPoint::new(4.0, 4.0)]);
    }

    #[test]
    fn non_finite_position_is_rejected_without_side_effects() {
        let mut table: TrailTable = TrailTable::default();
        let err = table.observe(9, (f64::NAN, 1.0)).unwrap_err();
        assert!(matches!(err, TrailError::InvalidPosition { y, .. } if y == 1.0));
        assert!(table.is_empty());

        table.observe(9, (1.0, 1.0)).unwrap();
        assert!(table.observe(9, (1.0, f64::INFINITY)).is_err());
        assert_eq!(table.history(&9).unwrap().len(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut table: TrailTable = TrailTable::new(0);
        assert_eq!(table.capacity(), 1);
        table.observe(1, (1.0, 1.0)).unwrap();
        let history = table.observe(1, (2.0, 2.0)).unwrap();
        assert_eq!(history, &[TrailPoint::new(2.0, 2.0)]);
    }

    #[test]
    fn histories_persist_without_stale_bound() {
        let mut table: TrailTable = TrailTable::default();
        table.observe(1, (0.0, 0.0)).unwrap();
        for _ in 0..1_000 {
            assert_eq!(table.end_frame(), 0);
        }
        assert!(table.contains(&1));
    }

    #[test]
    fn stale_identifiers_are_dropped_after_bound() {
        let mut table: TrailTable = TrailTable::default().with_stale_after(Some(2));
        table.observe(1, (0.0, 0.0)).unwrap();
        table.observe(2, (5.0, 5.0)).unwrap();
        assert_eq!(table.end_frame(), 0); // frame 0

        table.observe(2, (6.0, 6.0)).unwrap();
        assert_eq!(table.end_frame(), 0); // frame 1, id 1 unseen for 1
        assert_eq!(table.end_frame(), 0); // frame 2, id 1 unseen for 2
        assert_eq!(table.end_frame(), 1); // frame 3, id 1 unseen for 3

        assert!(!table.contains(&1));
        assert!(table.contains(&2));
        assert_eq!(table.end_frame(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn pixel_coordinates_truncate_toward_zero() {
        assert_eq!(TrailPoint::new(12.9, 7.2).to_pixel(), (12, 7));
        assert_eq!(TrailPoint::new(-0.7, 3.999).to_pixel(), (0, 3));
    }

    #[test]
    fn string_keys_are_supported() {
        let mut table: TrailTable<&str> = TrailTable::default();
        table.observe("A", (1.0, 2.0)).unwrap();
        table.observe("B", (3.0, 4.0)).unwrap();
        assert_eq!(table.history(&"A").unwrap()[0], TrailPoint::new(1.0, 2.0));
        assert_eq!(table.history(&"B").unwrap()[0], TrailPoint::new(3.0, 4.0));
    }
}
