use std::path::PathBuf;

use tfm_export::ExportError;
use tfm_pipeline::PipelineError;

/// Everything that can stop the command line tool.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot decode image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("invalid configuration file {path}: {source}")]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid {which} pattern: {source}")]
    Pattern {
        which: &'static str,
        source: regex::Error,
    },

    #[error("{path} has shape {found}, expected {expected} like the bead images")]
    MaskShape {
        path: PathBuf,
        expected: tfm_pipeline::GridShape,
        found: tfm_pipeline::GridShape,
    },

    #[error("no complete frames found in {0}")]
    NoFrames(PathBuf),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Export(#[from] ExportError),
}
