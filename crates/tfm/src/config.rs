//! Pipeline configuration from a JSON file and command line flags.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tfm_pipeline::{AnalysisMode, SpatialFilter, SubstrateHeight, TfmConfig};

use crate::error::CliError;

/// Analysis mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Isolated colony with force measurement and FEM area masks.
    Colony,
    /// Confluent cell layer covering the field of view.
    CellLayer,
}

impl From<Mode> for AnalysisMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Colony => Self::Colony,
            Mode::CellLayer => Self::CellLayer,
        }
    }
}

/// Pipeline parameters. Flags override values from `--config`.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Pipeline configuration as a JSON file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Analysis mode. Guessed from the available masks when omitted.
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Bead image pixel size in µm.
    #[arg(long)]
    pub pixel_size: Option<f64>,

    /// Substrate Young's modulus in Pa.
    #[arg(long)]
    pub youngs_modulus: Option<f64>,

    /// Substrate Poisson ratio.
    #[arg(long)]
    pub poisson_ratio: Option<f64>,

    /// Substrate height in µm, or "infinite".
    #[arg(long, value_parser = parse_height)]
    pub height: Option<SubstrateHeight>,

    /// PIV window size in pixels.
    #[arg(long)]
    pub window_size: Option<usize>,

    /// PIV window overlap in pixels.
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Gaussian traction filter width in grid units; 0 disables it.
    #[arg(long)]
    pub filter_sigma: Option<f64>,

    /// Poisson ratio of the cell sheet in the FEM model.
    #[arg(long)]
    pub fem_poisson_ratio: Option<f64>,
}

fn parse_height(value: &str) -> Result<SubstrateHeight, String> {
    if value.eq_ignore_ascii_case("infinite") || value.eq_ignore_ascii_case("inf") {
        return Ok(SubstrateHeight::Infinite);
    }
    value
        .parse::<f64>()
        .map(SubstrateHeight::Finite)
        .map_err(|e| format!("expected a height in µm or \"infinite\": {e}"))
}

impl ConfigArgs {
    /// Whether `--mode` was given.
    pub const fn mode_is_explicit(&self) -> bool {
        self.mode.is_some()
    }

    /// Load the configuration file, if any, and apply the flags on top.
    pub fn resolve(&self) -> Result<TfmConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&text).map_err(|source| CliError::Config {
                    path: path.clone(),
                    source,
                })?
            }
            None => TfmConfig::default(),
        };

        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(v) = self.pixel_size {
            config.pixel_size = v;
        }
        if let Some(v) = self.youngs_modulus {
            config.youngs_modulus = v;
        }
        if let Some(v) = self.poisson_ratio {
            config.poisson_ratio = v;
        }
        if let Some(v) = self.height {
            config.height = v;
        }
        if let Some(v) = self.window_size {
            config.correlation.window_size = v;
        }
        if let Some(v) = self.overlap {
            config.correlation.overlap = v;
        }
        if let Some(sigma) = self.filter_sigma {
            config.traction_filter = if sigma > 0.0 {
                SpatialFilter::Gaussian { sigma }
            } else {
                SpatialFilter::None
            };
        }
        if let Some(v) = self.fem_poisson_ratio {
            config.fem_poisson_ratio = Some(v);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tfm_pipeline::PipelineError;

    use super::*;

    #[test]
    fn height_parses_numbers_and_infinite() {
        assert_eq!(parse_height("300"), Ok(SubstrateHeight::Finite(300.0)));
        assert_eq!(parse_height("Infinite"), Ok(SubstrateHeight::Infinite));
        assert!(parse_height("thick").is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"pixel_size": 0.5, "correlation": {"window_size": 64, "overlap": 32}}"#,
        )
        .unwrap();
        let args = ConfigArgs {
            config: Some(path),
            overlap: Some(48),
            filter_sigma: Some(0.0),
            mode: Some(Mode::CellLayer),
            ..ConfigArgs::default()
        };
        let config = args.resolve().unwrap();
        assert!((config.pixel_size - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.correlation.window_size, 64);
        assert_eq!(config.correlation.overlap, 48);
        assert_eq!(config.traction_filter, SpatialFilter::None);
        assert_eq!(config.mode, AnalysisMode::CellLayer);
        assert!((config.youngs_modulus - TfmConfig::DEFAULT_YOUNGS_MODULUS).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let args = ConfigArgs {
            poisson_ratio: Some(0.7),
            ..ConfigArgs::default()
        };
        assert!(matches!(
            args.resolve(),
            Err(CliError::Pipeline(PipelineError::InvalidConfig(_)))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();
        let args = ConfigArgs {
            config: Some(path),
            ..ConfigArgs::default()
        };
        assert!(matches!(args.resolve(), Err(CliError::Config { .. })));
    }
}
