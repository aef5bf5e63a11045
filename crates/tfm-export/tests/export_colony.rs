//! Integration test: run a synthetic contracting colony through the
//! pipeline and export every artifact.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use ndarray::Array2;
use tfm_export::{
    FrameSummary, QuiverStyle, SvgMetadata, line_tension_csv, scalar_field_csv, to_batch_json,
    to_line_tension_svg, to_quiver_svg, to_summary_json, vector_field_csv,
};
use tfm_pipeline::{CorrelationConfig, Mask, MaskRole, MaskSet, SpatialFilter, TfmConfig};

const ROWS: usize = 256;
const COLS: usize = 320;

#[allow(clippy::cast_precision_loss)]
fn beads() -> Vec<(f64, f64)> {
    let mut state = 11u64;
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..ROWS * COLS / 30)
        .map(|_| {
            (
                next().mul_add(ROWS as f64 + 20.0, -10.0),
                next().mul_add(COLS as f64 + 20.0, -10.0),
            )
        })
        .collect()
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn render(beads: &[(f64, f64)]) -> Array2<f64> {
    let mut image = Array2::zeros((ROWS, COLS));
    for &(by, bx) in beads {
        let r0 = (by - 6.0).floor().max(0.0) as usize;
        let r1 = ((by + 6.0).ceil().max(0.0) as usize).min(ROWS);
        let c0 = (bx - 6.0).floor().max(0.0) as usize;
        let c1 = ((bx + 6.0).ceil().max(0.0) as usize).min(COLS);
        for r in r0..r1 {
            for c in c0..c1 {
                let d2 = (r as f64 - by).powi(2) + (c as f64 - bx).powi(2);
                image[[r, c]] += (-d2 / 4.5).exp();
            }
        }
    }
    image
}

fn contract((y, x): (f64, f64)) -> (f64, f64) {
    let (dy, dx) = (y - 128.0, x - 160.0);
    let weight = 0.066 * (-(dx * dx + dy * dy) / 5000.0).exp();
    (y - weight * dy, x - weight * dx)
}

fn rect(top: usize, bottom: usize, left: usize, right: usize) -> Mask {
    Mask::new(Array2::from_shape_fn((ROWS, COLS), |(r, c)| {
        (top..bottom).contains(&r) && (left..right).contains(&c)
    }))
}

fn masks() -> MaskSet {
    let borders = Mask::new(Array2::from_shape_fn((ROWS, COLS), |(r, c)| {
        let rows = (90..=166).contains(&r);
        let cols = (100..=220).contains(&c);
        (rows && [100, 140, 180, 220].contains(&c)) || (cols && (r == 90 || r == 166))
    }));
    MaskSet::new()
        .with(MaskRole::ForceMeasurement, rect(60, 196, 80, 240))
        .with(MaskRole::FemDomain, rect(40, 216, 56, 264))
        .with(MaskRole::Borders, borders)
}

#[test]
fn colony_exports() {
    let rest = beads();
    let displaced: Vec<(f64, f64)> = rest.iter().copied().map(contract).collect();
    let config = TfmConfig {
        correlation: CorrelationConfig {
            window_size: 32,
            overlap: 16,
            ..CorrelationConfig::default()
        },
        traction_filter: SpatialFilter::Gaussian { sigma: 1.0 },
        ..TfmConfig::default()
    };
    let result = tfm_pipeline::process(render(&rest), render(&displaced), masks(), config)
        .expect("pipeline should succeed");
    let shape = result.traction.shape();

    let summary: serde_json::Value =
        serde_json::from_str(&to_summary_json("01", &result).unwrap()).unwrap();
    assert_eq!(summary["frame"], "01");
    assert!(summary["strain_energy"].as_f64().unwrap() > 0.0);
    assert!(summary["average_line_tension"].as_f64().unwrap() > 0.0);
    assert_eq!(summary["config"]["correlation"]["window_size"], 32);

    let frames = [FrameSummary::new("01", &result)];
    let batch = to_batch_json(&frames, &result.config).unwrap();
    assert!(batch.contains("\"frames\""));

    let traction_csv = vector_field_csv(&result.traction);
    assert_eq!(traction_csv.lines().count(), shape.len() + 1);
    let stress_csv = scalar_field_csv(
        &result.mean_normal_stress,
        result.traction.pixel_size(),
        "mean_normal_stress",
    );
    assert_eq!(stress_csv.lines().count(), shape.len() + 1);
    let tension_csv = line_tension_csv(&result.line_tension, result.traction.pixel_size());
    let samples: usize = result
        .line_tension
        .borders
        .values()
        .map(|b| b.points.len())
        .sum();
    assert_eq!(tension_csv.lines().count(), samples + 1);

    let quiver = to_quiver_svg(
        &result.traction,
        Some(&result.force_mask),
        &QuiverStyle::default(),
        &SvgMetadata {
            title: Some("01 tractions"),
            ..SvgMetadata::default()
        },
    )
    .unwrap();
    assert!(quiver.matches("class=\"arrow\"").count() > 0);
    assert!(quiver.trim_end().ends_with("</svg>"));

    let tension = to_line_tension_svg(&result.line_tension, shape, &SvgMetadata::default()).unwrap();
    assert_eq!(
        tension.matches("data-edge=\"true\"").count(),
        result.line_tension.edge_borders.len()
    );
    assert_eq!(
        tension.matches("data-border=").count(),
        result.line_tension.borders.len()
    );
}
