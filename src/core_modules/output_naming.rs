//! Where annotated videos (and the replayed track files) are found on disk.

use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_SUFFIX: &str = "_tracked";
pub const DEFAULT_OUTPUT_EXTENSION: &str = "mp4";
pub const DEFAULT_TRACKS_SUFFIX: &str = ".tracks.txt";

/// Policy deriving the annotated output path from the input video path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputNaming {
    /// Every run writes to the same file.
    Fixed(PathBuf),
    /// `<directory>/<input stem><suffix>.<extension>`. Without a directory the
    /// output lands next to the input.
    Suffixed {
        directory: Option<PathBuf>,
        suffix: String,
        extension: String,
    },
}

impl Default for OutputNaming {
    fn default() -> Self {
        OutputNaming::Suffixed {
            directory: None,
            suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
        }
    }
}

impl OutputNaming {
    pub fn output_path(&self, input: &Path) -> PathBuf {
        match self {
            OutputNaming::Fixed(path) => path.clone(),
            OutputNaming::Suffixed {
                directory,
                suffix,
                extension,
            } => {
                let stem = file_stem(input);
                let file_name = if extension.is_empty() {
                    format!("{stem}{suffix}")
                } else {
                    format!("{stem}{suffix}.{extension}")
                };
                let directory = directory.clone().unwrap_or_else(|| parent_dir(input));
                directory.join(file_name)
            }
        }
    }
}

/// Default location of the replayed tracks: `<input dir>/<input stem>.tracks.txt`.
pub fn sibling_tracks_path(input: &Path) -> PathBuf {
    parent_dir(input).join(format!("{}{}", file_stem(input), DEFAULT_TRACKS_SUFFIX))
}

fn file_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

fn parent_dir(input: &Path) -> PathBuf {
    input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_ignores_input() {
        let naming = OutputNaming::Fixed(PathBuf::from("output_tracked_video.mp4"));
        assert_eq!(
            naming.output_path(Path::new("/videos/a.mov")),
            PathBuf::from("output_tracked_video.mp4")
        );
    }

    #[test]
    fn suffixed_defaults_next_to_input() {
        let naming = OutputNaming::default();
        assert_eq!(
            naming.output_path(Path::new("/videos/input_video.mp4")),
            PathBuf::from("/videos/input_video_tracked.mp4")
        );
        assert_eq!(
            naming.output_path(Path::new("clip.avi")),
            PathBuf::from("clip_tracked.mp4")
        );
    }

    #[test]
    fn suffixed_with_directory() {
        let naming = OutputNaming::Suffixed {
            directory: Some(PathBuf::from("/out")),
            suffix: "-annotated".to_string(),
            extension: "avi".to_string(),
        };
        assert_eq!(
            naming.output_path(Path::new("/videos/walk.mp4")),
            PathBuf::from("/out/walk-annotated.avi")
        );
    }

    #[test]
    fn tracks_file_sits_beside_video() {
        assert_eq!(
            sibling_tracks_path(Path::new("/videos/walk.mp4")),
            PathBuf::from("/videos/walk.tracks.txt")
        );
    }
}
