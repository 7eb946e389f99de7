// THEORY:
// The `config` module turns every knob of a processing run into a named field
// with a default: trail length and colour, how detections are drawn, where the
// output goes, which codec encodes it, and which tracker backend finds the
// objects (replayed tracks or the ONNX detector).
//
// Configuration is layered. `PipelineConfig::default()` reproduces the stock
// behaviour; an optional TOML file (given explicitly or through the
// `TRAIL_VISION_CONFIG` environment variable) overrides any subset of fields.
// The file is read into a mirror of `Option` fields first, so a partial file
// never has to restate the defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::core_modules::canvas::RgbColor;
use crate::core_modules::output_naming::{
    DEFAULT_OUTPUT_EXTENSION, DEFAULT_OUTPUT_SUFFIX, OutputNaming, sibling_tracks_path,
};
use crate::core_modules::tracker::AnnotationStyle;
use crate::core_modules::trail_table::DEFAULT_TRAIL_CAPACITY;

pub const CONFIG_ENV_VAR: &str = "TRAIL_VISION_CONFIG";

const DEFAULT_TRAIL_COLOR: RgbColor = [0, 255, 0];
const DEFAULT_TRAIL_THICKNESS: u32 = 2;
const DEFAULT_CODEC: &str = "mp4v";
const DEFAULT_PROGRESS_EVERY: u64 = 10;
const DEFAULT_MODEL: &str = "yolov8n.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_LOST: u32 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    trail: Option<TrailFile>,
    annotation: Option<AnnotationFile>,
    output: Option<OutputFile>,
    tracker: Option<TrackerFile>,
    progress: Option<ProgressFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrailFile {
    capacity: Option<usize>,
    color: Option<RgbColor>,
    thickness: Option<u32>,
    stale_after: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotationFile {
    boxes: Option<bool>,
    labels: Option<bool>,
    box_thickness: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum NamingKind {
    Fixed,
    Suffixed,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputFile {
    naming: Option<NamingKind>,
    path: Option<PathBuf>,
    directory: Option<PathBuf>,
    suffix: Option<String>,
    extension: Option<String>,
    codec: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackerFile {
    backend: Option<TrackerBackend>,
    tracks_path: Option<PathBuf>,
    model: Option<PathBuf>,
    confidence: Option<f32>,
    iou: Option<f32>,
    input_size: Option<u32>,
    max_lost: Option<u32>,
}

/// Which collaborator reports the objects in each frame.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackerBackend {
    /// Replay MOT-format tracks written by an external tracker.
    #[default]
    Replay,
    /// Run a YOLOv8 ONNX model on every frame and link detections across
    /// frames by overlap. Needs the `yolo` feature.
    Yolo,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ProgressFile {
    every: Option<u64>,
}

/// How motion trails are kept and drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailSettings {
    /// Maximum number of points per trail.
    pub capacity: usize,
    /// Stroke colour, RGB.
    pub color: RgbColor,
    /// Stroke width in pixels.
    pub thickness: u32,
    /// Forget identifiers unseen for more than this many frames. `None` keeps
    /// every trail for the whole run.
    pub stale_after: Option<u64>,
}

impl Default for TrailSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TRAIL_CAPACITY,
            color: DEFAULT_TRAIL_COLOR,
            thickness: DEFAULT_TRAIL_THICKNESS,
            stale_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub naming: OutputNaming,
    /// Four-character codec code handed to the encoder.
    pub codec: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            naming: OutputNaming::default(),
            codec: DEFAULT_CODEC.to_string(),
        }
    }
}

/// Settings of the YOLOv8 detector backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// ONNX model exported from a YOLOv8 checkpoint.
    pub model: PathBuf,
    /// Minimum class score for a detection to be kept.
    pub confidence: f32,
    /// Overlap above which the weaker of two detections is suppressed.
    pub nms_iou: f32,
    /// Square model input side in pixels.
    pub input_size: u32,
    /// Frames a track may go unmatched before its identifier is retired.
    pub max_lost: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model: PathBuf::from(DEFAULT_MODEL),
            confidence: DEFAULT_CONFIDENCE,
            nms_iou: DEFAULT_NMS_IOU,
            input_size: DEFAULT_INPUT_SIZE,
            max_lost: DEFAULT_MAX_LOST,
        }
    }
}

/// Everything a processing run needs besides the input path.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub trail: TrailSettings,
    pub annotation: AnnotationStyle,
    pub output: OutputSettings,
    pub tracker: TrackerBackend,
    pub detector: DetectorSettings,
    /// Replayed tracks file. `None` looks for `<stem>.tracks.txt` next to the video.
    pub tracks_path: Option<PathBuf>,
    /// Log progress every this many frames.
    pub progress_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trail: TrailSettings::default(),
            annotation: AnnotationStyle::default(),
            output: OutputSettings::default(),
            tracker: TrackerBackend::default(),
            detector: DetectorSettings::default(),
            tracks_path: None,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl PipelineConfig {
    /// Loads `path` if given, else the file named by `TRAIL_VISION_CONFIG`, else
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        let config = Self::from_file_config(file)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file_config(file: ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let trail_file = file.trail.unwrap_or_default();
        let trail = TrailSettings {
            capacity: trail_file.capacity.unwrap_or(defaults.trail.capacity),
            color: trail_file.color.unwrap_or(defaults.trail.color),
            thickness: trail_file.thickness.unwrap_or(defaults.trail.thickness),
            stale_after: trail_file.stale_after,
        };

        let annotation_file = file.annotation.unwrap_or_default();
        let annotation = AnnotationStyle {
            draw_boxes: annotation_file
                .boxes
                .unwrap_or(defaults.annotation.draw_boxes),
            draw_labels: annotation_file
                .labels
                .unwrap_or(defaults.annotation.draw_labels),
            box_thickness: annotation_file
                .box_thickness
                .unwrap_or(defaults.annotation.box_thickness),
        };

        let output_file = file.output.unwrap_or_default();
        let naming_kind = match (output_file.naming, &output_file.path) {
            (Some(kind), _) => kind,
            (None, Some(_)) => NamingKind::Fixed,
            (None, None) => NamingKind::Suffixed,
        };
        let naming = match naming_kind {
            NamingKind::Fixed => {
                let path = output_file.path.ok_or_else(|| {
                    ConfigError::Invalid("output.naming = \"fixed\" requires output.path".into())
                })?;
                OutputNaming::Fixed(path)
            }
            NamingKind::Suffixed => OutputNaming::Suffixed {
                directory: output_file.directory,
                suffix: output_file
                    .suffix
                    .unwrap_or_else(|| DEFAULT_OUTPUT_SUFFIX.to_string()),
                extension: output_file
                    .extension
                    .unwrap_or_else(|| DEFAULT_OUTPUT_EXTENSION.to_string()),
            },
        };
        let output = OutputSettings {
            naming,
            codec: output_file.codec.unwrap_or(defaults.output.codec),
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let detector = DetectorSettings {
            model: tracker_file.model.unwrap_or(defaults.detector.model),
            confidence: tracker_file
                .confidence
                .unwrap_or(defaults.detector.confidence),
            nms_iou: tracker_file.iou.unwrap_or(defaults.detector.nms_iou),
            input_size: tracker_file
                .input_size
                .unwrap_or(defaults.detector.input_size),
            max_lost: tracker_file.max_lost.unwrap_or(defaults.detector.max_lost),
        };

        Ok(Self {
            trail,
            annotation,
            output,
            tracker: tracker_file.backend.unwrap_or(defaults.tracker),
            detector,
            tracks_path: tracker_file.tracks_path,
            progress_every: file
                .progress
                .and_then(|progress| progress.every)
                .unwrap_or(defaults.progress_every),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trail.capacity == 0 {
            return Err(ConfigError::Invalid("trail.capacity must be at least 1".into()));
        }
        if self.trail.thickness == 0 {
            return Err(ConfigError::Invalid("trail.thickness must be at least 1".into()));
        }
        if self.annotation.draw_boxes && self.annotation.box_thickness == 0 {
            return Err(ConfigError::Invalid(
                "annotation.box_thickness must be at least 1".into(),
            ));
        }
        if self.output.codec.chars().count() != 4 {
            return Err(ConfigError::Invalid(format!(
                "output.codec `{}` must be a four-character code",
                self.output.codec
            )));
        }
        if self.progress_every == 0 {
            return Err(ConfigError::Invalid("progress.every must be at least 1".into()));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&self.detector.confidence) || !unit.contains(&self.detector.nms_iou) {
            return Err(ConfigError::Invalid(
                "tracker.confidence and tracker.iou must lie in [0, 1]".into(),
            ));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "tracker.input_size {} must be a positive multiple of 32",
                self.detector.input_size
            )));
        }
        Ok(())
    }

    /// Where the replayed tracks for `video` are read from.
    pub fn tracks_path_for(&self, video: &Path) -> PathBuf {
        self.tracks_path
            .clone()
            .unwrap_or_else(|| sibling_tracks_path(video))
    }

    /// Where the annotated copy of `video` is written.
    pub fn output_path_for(&self, video: &Path) -> PathBuf {
        self.output.naming.output_path(video)
    }

    /// Like [`Self::output_path_for`], but refuses an output that would
    /// overwrite `video` itself.
    pub fn checked_output_path_for(&self, video: &Path) -> Result<PathBuf, ConfigError> {
        let output = self.output_path_for(video);
        if same_file(video, &output) {
            return Err(ConfigError::Invalid(format!(
                "output {} would overwrite the input video",
                output.display()
            )));
        }
        Ok(output)
    }

    /// The codec as the four characters the encoder expects.
    pub fn codec_chars(&self) -> Result<[char; 4], ConfigError> {
        let chars: Vec<char> = self.output.codec.chars().collect();
        chars.try_into().map_err(|_| {
            ConfigError::Invalid(format!(
                "output.codec `{}` must be a four-character code",
                self.output.codec
            ))
        })
    }
}

/// Both paths name the same file. Paths that do not exist yet are compared as
/// written.
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_matches_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.trail.capacity, 30);
        assert_eq!(config.trail.color, [0, 255, 0]);
        assert_eq!(config.trail.thickness, 2);
        assert_eq!(config.output.codec, "mp4v");
        assert_eq!(config.progress_every, 10);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [trail]
            capacity = 50
            stale_after = 90

            [annotation]
            labels = false

            [output]
            directory = "/tmp/out"
            "#,
        )
        .unwrap();
        assert_eq!(config.trail.capacity, 50);
        assert_eq!(config.trail.stale_after, Some(90));
        assert_eq!(config.trail.thickness, 2);
        assert!(config.annotation.draw_boxes);
        assert!(!config.annotation.draw_labels);
        assert_eq!(
            config.output_path_for(Path::new("/videos/cars.mp4")),
            PathBuf::from("/tmp/out/cars_tracked.mp4")
        );
    }

    #[test]
    fn output_path_alone_selects_fixed_naming() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [output]
            path = "output_tracked_video.mp4"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.output.naming,
            OutputNaming::Fixed(PathBuf::from("output_tracked_video.mp4"))
        );
    }

    #[test]
    fn fixed_naming_without_path_is_invalid() {
        let err = PipelineConfig::from_toml_str("[output]\nnaming = \"fixed\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for text in [
            "[trail]\ncapacity = 0\n",
            "[trail]\nthickness = 0\n",
            "[output]\ncodec = \"h264x\"\n",
            "[progress]\nevery = 0\n",
        ] {
            assert!(
                matches!(
                    PipelineConfig::from_toml_str(text),
                    Err(ConfigError::Invalid(_))
                ),
                "accepted: {text}"
            );
        }
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let err = PipelineConfig::from_toml_str("[trail]\nlength = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn tracks_path_defaults_beside_video() {
        let mut config = PipelineConfig::default();
        assert_eq!(
            config.tracks_path_for(Path::new("/v/a.mp4")),
            PathBuf::from("/v/a.tracks.txt")
        );
        config.tracks_path = Some(PathBuf::from("/t/custom.txt"));
        assert_eq!(
            config.tracks_path_for(Path::new("/v/a.mp4")),
            PathBuf::from("/t/custom.txt")
        );
    }

    #[test]
    fn loads_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[trail]\ncolor = [255, 0, 0]").unwrap();
        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.trail.color, [255, 0, 0]);
        assert_eq!(config.codec_chars().unwrap(), ['m', 'p', '4', 'v']);
    }

    #[test]
    fn empty_suffix_cannot_overwrite_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"not really a video").unwrap();

        let config =
            PipelineConfig::from_toml_str("[output]\nsuffix = \"\"\nextension = \"mp4\"\n")
                .unwrap();
        assert_eq!(config.output_path_for(&video), video);
        assert!(matches!(
            config.checked_output_path_for(&video),
            Err(ConfigError::Invalid(_))
        ));

        // The same file reached through a different spelling.
        let mut fixed = PipelineConfig::default();
        fixed.output.naming = OutputNaming::Fixed(dir.path().join(".").join("clip.mp4"));
        assert!(fixed.checked_output_path_for(&video).is_err());

        let default = PipelineConfig::default();
        assert_eq!(
            default.checked_output_path_for(&video).unwrap(),
            dir.path().join("clip_tracked.mp4")
        );
    }

    #[test]
    fn detector_backend_is_selected_from_the_tracker_section() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [tracker]
            backend = "yolo"
            model = "/models/yolov8s.onnx"
            confidence = 0.4
            "#,
        )
        .unwrap();
        assert_eq!(config.tracker, TrackerBackend::Yolo);
        assert_eq!(config.detector.model, PathBuf::from("/models/yolov8s.onnx"));
        assert_eq!(config.detector.confidence, 0.4);
        assert_eq!(config.detector.input_size, 640);
        assert_eq!(PipelineConfig::default().tracker, TrackerBackend::Replay);

        for text in [
            "[tracker]\nconfidence = 1.5\n",
            "[tracker]\ninput_size = 100\n",
            "[tracker]\nbackend = \"sort\"\n",
        ] {
            assert!(PipelineConfig::from_toml_str(text).is_err(), "accepted: {text}");
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
