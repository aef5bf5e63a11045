//! Grouping the files of a folder into frames.
//!
//! A frame is identified by the first capture group of the frame
//! pattern, matched anywhere in the file name. Each file is sorted into
//! a layer (or a mask role) by patterns anchored at the start of the
//! name, followed by anything and an image extension.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use clap::Args;
use regex::Regex;
use tfm_pipeline::{MaskRole, PipelineWarning};

use crate::error::CliError;

/// Image extensions accepted for layers and masks.
const EXTENSIONS: &str = r"(?i:png|jpe?g|tiff?)";

/// File name patterns for `tfm batch`.
#[derive(Debug, Clone, Args)]
pub struct Patterns {
    /// Frame number: the first capture group is the frame id.
    #[arg(long, default_value = r"(\d{1,4})")]
    pub frame_key: String,

    /// Bead image after the cells were removed.
    #[arg(long, default_value = r"\d{1,4}after")]
    pub reference_key: String,

    /// Bead image with the cells present.
    #[arg(long, default_value = r"\d{1,4}before")]
    pub deformed_key: String,

    /// Image of the cells.
    #[arg(long, default_value = r"\d{1,4}bf_before")]
    pub cells_key: String,

    /// Force measurement area mask.
    #[arg(long, default_value = r"\d{1,4}force_measurement")]
    pub force_mask_key: String,

    /// FEM area mask.
    #[arg(long, default_value = r"\d{1,4}fem_area")]
    pub fem_mask_key: String,

    /// Cell area mask.
    #[arg(long, default_value = r"\d{1,4}cell_area")]
    pub cell_mask_key: String,

    /// Cell border mask.
    #[arg(long, default_value = r"\d{1,4}cell_borders")]
    pub border_mask_key: String,
}

/// Image layers of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Reference,
    Deformed,
    Cells,
}

impl Layer {
    const COUNT: usize = 3;
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reference => "reference",
            Self::Deformed => "deformed",
            Self::Cells => "cells",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Layer(Layer),
    Mask(MaskRole),
}

/// Compiled [`Patterns`].
#[derive(Debug, Clone)]
pub struct FrameKeys {
    frame: Regex,
    /// Checked in order, the first match wins.
    kinds: Vec<(Kind, Regex)>,
}

impl FrameKeys {
    pub fn new(patterns: &Patterns) -> Result<Self, CliError> {
        let compile = |which: &'static str, key: &str| {
            Regex::new(&format!(r"^(?:{key}).*\.{EXTENSIONS}$"))
                .map_err(|source| CliError::Pattern { which, source })
        };
        let frame = Regex::new(&patterns.frame_key).map_err(|source| CliError::Pattern {
            which: "frame",
            source,
        })?;
        let kinds = vec![
            (Kind::Layer(Layer::Cells), compile("cells", &patterns.cells_key)?),
            (Kind::Layer(Layer::Deformed), compile("deformed", &patterns.deformed_key)?),
            (Kind::Layer(Layer::Reference), compile("reference", &patterns.reference_key)?),
            (
                Kind::Mask(MaskRole::ForceMeasurement),
                compile("force mask", &patterns.force_mask_key)?,
            ),
            (Kind::Mask(MaskRole::FemDomain), compile("FEM mask", &patterns.fem_mask_key)?),
            (Kind::Mask(MaskRole::CellArea), compile("cell mask", &patterns.cell_mask_key)?),
            (Kind::Mask(MaskRole::Borders), compile("border mask", &patterns.border_mask_key)?),
        ];
        Ok(Self { frame, kinds })
    }

    fn classify(&self, name: &str) -> Option<(String, Kind)> {
        let kind = self
            .kinds
            .iter()
            .find(|(_, pattern)| pattern.is_match(name))
            .map(|(kind, _)| *kind)?;
        let frame = self.frame.captures(name)?.get(1)?.as_str().to_string();
        Some((frame, kind))
    }
}

/// Files of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub id: String,
    pub layers: BTreeMap<Layer, PathBuf>,
    pub masks: BTreeMap<MaskRole, PathBuf>,
    /// Layer files found, including duplicates.
    pub layer_files: usize,
}

impl Frame {
    /// Reference and deformed bead images, if both were found.
    pub fn bead_images(&self) -> Option<(&Path, &Path)> {
        Some((
            self.layers.get(&Layer::Reference)?,
            self.layers.get(&Layer::Deformed)?,
        ))
    }

    pub fn mask_files(&self) -> impl Iterator<Item = (MaskRole, &Path)> {
        self.masks.iter().map(|(role, path)| (*role, path.as_path()))
    }
}

/// Sort `files` into frames, ordered by frame number.
///
/// Files matching no pattern are ignored. Frames with a number of layer
/// files other than one per layer raise
/// [`PipelineWarning::UnexpectedFileCount`].
pub fn group_frames(
    files: impl IntoIterator<Item = PathBuf>,
    keys: &FrameKeys,
) -> (Vec<Frame>, Vec<PipelineWarning>) {
    let mut frames: BTreeMap<(Option<u64>, String), Frame> = BTreeMap::new();
    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((id, kind)) = keys.classify(name) else {
            tracing::trace!(file = name, "ignored");
            continue;
        };
        let frame = frames
            .entry((id.parse().ok(), id.clone()))
            .or_insert_with(|| Frame {
                id,
                ..Frame::default()
            });
        match kind {
            Kind::Layer(layer) => {
                frame.layer_files += 1;
                frame.layers.insert(layer, path);
            }
            Kind::Mask(role) => {
                frame.masks.insert(role, path);
            }
        }
    }

    let frames: Vec<Frame> = frames.into_values().collect();
    let warnings = frames
        .iter()
        .filter(|f| f.layer_files != Layer::COUNT)
        .map(|f| PipelineWarning::UnexpectedFileCount {
            frame: f.id.clone(),
            found: f.layer_files,
            expected: Layer::COUNT,
        })
        .collect();
    (frames, warnings)
}

/// Group the files directly inside `dir`.
pub fn scan(dir: &Path, keys: &FrameKeys) -> Result<(Vec<Frame>, Vec<PipelineWarning>), CliError> {
    let read_error = |source| CliError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        if entry.file_type().map_err(read_error)?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(group_frames(files, keys))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        patterns: Patterns,
    }

    fn default_keys() -> FrameKeys {
        FrameKeys::new(&Wrapper::parse_from(["test"]).patterns).unwrap()
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/data").join(n)).collect()
    }

    #[test]
    fn files_are_sorted_into_frames_and_layers() {
        let (frames, warnings) = group_frames(
            paths(&[
                "10after.tif",
                "02before.TIF",
                "02after.tif",
                "02bf_before.png",
                "02fem_area.png",
                "02cell_borders.png",
                "10before.tif",
                "10bf_before.jpg",
                "notes.txt",
                "02after_copy.csv",
            ]),
            &default_keys(),
        );
        assert!(warnings.is_empty());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id, "02");
        assert_eq!(frames[1].id, "10");

        let (reference, deformed) = frames[0].bead_images().unwrap();
        assert!(reference.ends_with("02after.tif"));
        assert!(deformed.ends_with("02before.TIF"));
        assert!(frames[0].layers[&Layer::Cells].ends_with("02bf_before.png"));
        let roles: Vec<MaskRole> = frames[0].mask_files().map(|(r, _)| r).collect();
        assert_eq!(roles, [MaskRole::FemDomain, MaskRole::Borders]);
        assert!(frames[1].masks.is_empty());
    }

    #[test]
    fn frames_sort_numerically() {
        let (frames, _) = group_frames(
            paths(&["9after.png", "10after.png", "100after.png"]),
            &default_keys(),
        );
        let ids: Vec<&str> = frames.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["9", "10", "100"]);
    }

    #[test]
    fn incomplete_frames_warn() {
        let (frames, warnings) = group_frames(
            paths(&["01after.png", "01before.png", "01bf_before.png", "03after.png"]),
            &default_keys(),
        );
        assert_eq!(frames.len(), 2);
        assert!(frames[1].bead_images().is_none());
        assert_eq!(
            warnings,
            [PipelineWarning::UnexpectedFileCount {
                frame: "03".to_string(),
                found: 1,
                expected: 3,
            }]
        );
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut patterns = Wrapper::parse_from(["test"]).patterns;
        patterns.deformed_key = "(".to_string();
        assert!(matches!(
            FrameKeys::new(&patterns),
            Err(CliError::Pattern { which: "deformed", .. })
        ));
    }

    #[test]
    fn scan_reads_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["05after.png", "05before.png", "05bf_before.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("06after.png")).unwrap();
        let (frames, warnings) = scan(dir.path(), &default_keys()).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].layer_files, 3);
        assert!(warnings.is_empty());
    }
}
