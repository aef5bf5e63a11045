//! tfm-export: Pure serializers for pipeline results (sans-IO)
//!
//! Converts a [`TfmResult`](tfm_pipeline::TfmResult) into files a user
//! can keep: a JSON summary of the headline scalars, CSV dumps of the
//! fields and SVG plots of tractions and line tension. Every function
//! returns a `String`; writing it somewhere is the caller's job.

use tfm_pipeline::GridShape;

pub mod csv;
pub mod json;
pub mod svg;

pub use csv::{line_tension_csv, scalar_field_csv, vector_field_csv};
pub use json::{FrameSummary, to_batch_json, to_result_json, to_summary_json};
pub use svg::{QuiverStyle, SvgMetadata, to_line_tension_svg, to_quiver_svg};

/// Errors raised while serializing results.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// JSON serialization failed.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The field to plot has no grid points.
    #[error("cannot plot an empty {0}")]
    EmptyField(&'static str),

    /// A mask is not on the grid of the field it belongs to.
    #[error("mask has shape {found}, expected {expected}")]
    MaskShape {
        /// Field grid shape.
        expected: GridShape,
        /// Mask shape.
        found: GridShape,
    },

    /// A plot parameter is out of range.
    #[error("invalid plot parameter {name}: {value}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },
}
