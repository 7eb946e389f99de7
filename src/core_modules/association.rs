// THEORY:
// The `association` module gives detections an identity across frames. It is
// the tracking half of the built-in detector backend and follows the ByteTrack
// idea without a motion model: every live track remembers its last box, and
// each frame's detections are matched to those boxes by overlap in two rounds.
//
// Round one pairs confident detections with any track. Round two lets weak
// detections rescue tracks that round one left unmatched, with a stricter
// overlap so a faint box does not steal an identity. Confident detections that
// are still unmatched start new tracks; weak ones are dropped. A track that
// goes unmatched for more than `max_lost` frames is retired and its identifier
// is never reused.

use crate::core_modules::observation::{BoundingBox, TrackedObject};
use crate::core_modules::trail_table::TrackId;
use crate::core_modules::yolo_decode::Detection;

/// Thresholds of the two matching rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationSettings {
    /// Detections at or above this score can match any track or start one.
    pub high_score: f32,
    /// Detections below this score are ignored.
    pub low_score: f32,
    /// Minimum overlap for a confident detection to continue a track.
    pub match_iou: f64,
    /// Minimum overlap for a weak detection to rescue an unmatched track.
    pub rescue_iou: f64,
    /// Frames a track may miss before it is retired.
    pub max_lost: u32,
}

impl Default for AssociationSettings {
    fn default() -> Self {
        Self {
            high_score: 0.5,
            low_score: 0.1,
            match_iou: 0.3,
            rescue_iou: 0.5,
            max_lost: 30,
        }
    }
}

#[derive(Debug, Clone)]
struct Track {
    id: TrackId,
    bbox: BoundingBox,
    lost: u32,
}

/// Links per-frame detections into identities.
#[derive(Debug, Clone)]
pub struct IouAssociator {
    settings: AssociationSettings,
    tracks: Vec<Track>,
    next_id: TrackId,
}

impl IouAssociator {
    pub fn new(settings: AssociationSettings) -> Self {
        Self {
            settings,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Live tracks, including those currently unmatched.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Matches one frame's detections and returns the objects seen in it, each
    /// with the identifier of the track it continued or started.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackedObject> {
        let settings = self.settings;
        let (high, low): (Vec<usize>, Vec<usize>) = (0..detections.len())
            .filter(|&i| detections[i].confidence >= settings.low_score)
            .partition(|&i| detections[i].confidence >= settings.high_score);

        let mut track_of = vec![None; detections.len()];
        let mut matched = vec![false; self.tracks.len()];

        // --- 1. Confident detections against every track ---
        let all: Vec<usize> = (0..self.tracks.len()).collect();
        for (det, track) in self.greedy_match(detections, &high, &all, settings.match_iou) {
            track_of[det] = Some(track);
            matched[track] = true;
        }

        // --- 2. Weak detections rescue the rest ---
        let unmatched: Vec<usize> = (0..self.tracks.len()).filter(|&t| !matched[t]).collect();
        for (det, track) in self.greedy_match(detections, &low, &unmatched, settings.rescue_iou) {
            track_of[det] = Some(track);
            matched[track] = true;
        }

        // --- 3. Update, start and age tracks ---
        let mut objects = Vec::new();
        for (index, detection) in detections.iter().enumerate() {
            let id = match track_of[index] {
                Some(track) => {
                    let track = &mut self.tracks[track];
                    track.bbox = detection.bbox;
                    track.lost = 0;
                    track.id
                }
                None if detection.confidence >= settings.high_score => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        bbox: detection.bbox,
                        lost: 0,
                    });
                    matched.push(true);
                    id
                }
                None => continue,
            };
            objects.push(
                TrackedObject::new(Some(id), detection.bbox)
                    .with_class(detection.class_id)
                    .with_confidence(detection.confidence),
            );
        }
        for (track, &seen) in self.tracks.iter_mut().zip(&matched) {
            if !seen {
                track.lost += 1;
            }
        }
        self.tracks.retain(|track| track.lost <= settings.max_lost);
        objects
    }

    /// Pairs detections with tracks by descending overlap, each at most once.
    fn greedy_match(
        &self,
        detections: &[Detection],
        candidates: &[usize],
        tracks: &[usize],
        min_iou: f64,
    ) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for &det in candidates {
            for &track in tracks {
                let iou = detections[det].bbox.iou(&self.tracks[track].bbox);
                if iou >= min_iou {
                    pairs.push((iou, det, track));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; self.tracks.len()];
        let mut assignments = Vec::new();
        for (_, det, track) in pairs {
            if !used_det[det] && !used_track[track] {
                used_det[det] = true;
                used_track[track] = true;
                assignments.push((det, track));
            }
        }
        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(left: f64, top: f64, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(left, top, 20.0, 20.0),
            class_id: 0,
            confidence,
        }
    }

    fn ids(objects: &[TrackedObject]) -> Vec<Option<TrackId>> {
        objects.iter().map(|o| o.id).collect()
    }

    #[test]
    fn moving_objects_keep_their_identifiers() {
        let mut associator = IouAssociator::new(AssociationSettings::default());
        let first = associator.update(&[detection(0.0, 0.0, 0.9), detection(100.0, 0.0, 0.8)]);
        assert_eq!(ids(&first), vec![Some(1), Some(2)]);

        // Both shift by a quarter of their width, listed in the other order.
        let second = associator.update(&[detection(105.0, 0.0, 0.8), detection(5.0, 0.0, 0.9)]);
        assert_eq!(ids(&second), vec![Some(2), Some(1)]);
        assert_eq!(second[1].bbox, BoundingBox::new(5.0, 0.0, 20.0, 20.0));
        assert_eq!(second[1].class_id, Some(0));
    }

    #[test]
    fn weak_detections_rescue_but_never_start_tracks() {
        let mut associator = IouAssociator::new(AssociationSettings::default());
        associator.update(&[detection(0.0, 0.0, 0.9)]);

        let rescued = associator.update(&[detection(2.0, 0.0, 0.3), detection(200.0, 0.0, 0.3)]);
        assert_eq!(ids(&rescued), vec![Some(1)]);
        assert_eq!(associator.track_count(), 1);

        // Below the low score nothing happens at all.
        assert!(associator.update(&[detection(2.0, 0.0, 0.05)]).is_empty());
    }

    #[test]
    fn lost_tracks_are_retired_after_max_lost_frames() {
        let settings = AssociationSettings {
            max_lost: 2,
            ..Default::default()
        };
        let mut associator = IouAssociator::new(settings);
        associator.update(&[detection(0.0, 0.0, 0.9)]);
        associator.update(&[]);
        associator.update(&[]);
        assert_eq!(associator.track_count(), 1);

        // Still within reach: the identity survives the gap.
        let back = associator.update(&[detection(0.0, 0.0, 0.9)]);
        assert_eq!(ids(&back), vec![Some(1)]);

        for _ in 0..3 {
            associator.update(&[]);
        }
        assert_eq!(associator.track_count(), 0);
        let fresh = associator.update(&[detection(0.0, 0.0, 0.9)]);
        assert_eq!(ids(&fresh), vec![Some(2)]);
    }
}
