//! SVG plots of traction fields and line tension.
//!
//! Both plots are drawn in field grid coordinates: every grid cell is
//! [`CELL_SIZE`] SVG units wide and grid point `(row, col)` sits at the
//! center of its cell. Documents are built with the [`svg`] crate, which
//! takes care of XML escaping and path data formatting.
//!
//! Colors come from a perceptually ordered five-stop ramp (dark blue to
//! yellow). A color bar with the minimum and maximum value is drawn
//! below the plot.
//!
//! Optional [`SvgMetadata`] embeds `<title>` and `<desc>` elements and
//! the run configuration as JSON.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Description, Element, Group, Path, Rectangle, Title};
use svg::node::{Node, Text};

use tfm_pipeline::{GridShape, LineTension, Mask, Point, VectorField};

use crate::ExportError;

/// SVG units per field grid cell.
pub const CELL_SIZE: f64 = 24.0;

/// Height of the color bar area below the plot.
const LEGEND_HEIGHT: f64 = 40.0;

/// Number of boxes in the color bar.
const LEGEND_STEPS: usize = 16;

/// Color ramp stops, evenly spaced from 0 to 1.
const RAMP: [(f64, f64, f64); 5] = [
    (68.0, 1.0, 84.0),
    (59.0, 82.0, 139.0),
    (33.0, 145.0, 140.0),
    (94.0, 201.0, 98.0),
    (253.0, 231.0, 37.0),
];

/// Metadata to embed in the SVG document.
///
/// All fields are optional. Text values are XML-escaped by the `svg`
/// crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`. Typically the frame name.
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized [`TfmConfig`](tfm_pipeline::TfmConfig), emitted inside
    /// a `<metadata>` element wrapped in a namespaced `<tfm:config>`
    /// element.
    pub config_json: Option<&'a str>,
}

/// How a quiver plot draws its arrows.
#[derive(Debug, Clone, PartialEq)]
pub struct QuiverStyle {
    /// Length of the longest arrow in grid cells.
    pub scale: f64,
    /// Unit shown next to the color bar values.
    pub unit: String,
}

impl Default for QuiverStyle {
    fn default() -> Self {
        Self {
            scale: 0.9,
            unit: "Pa".to_string(),
        }
    }
}

/// Map `t` in `[0, 1]` onto the color ramp.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn ramp_color(t: f64) -> String {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (RAMP.len() - 1) as f64;
    let i = (pos.floor() as usize).min(RAMP.len() - 2);
    let f = pos - i as f64;
    let (r0, g0, b0) = RAMP[i];
    let (r1, g1, b1) = RAMP[i + 1];
    let mix = |a: f64, b: f64| (f.mul_add(b - a, a)).round() as u8;
    format!("#{:02x}{:02x}{:02x}", mix(r0, r1), mix(g0, g1), mix(b0, b1))
}

/// Position of `value` on the `[min, max]` scale. A degenerate scale
/// maps everything to the middle.
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max > min {
        (value - min) / (max - min)
    } else {
        0.5
    }
}

/// Center of grid point `(row, col)` in SVG units.
#[allow(clippy::cast_precision_loss)]
fn cell_center(row: usize, col: usize) -> (f64, f64) {
    ((col as f64 + 0.5) * CELL_SIZE, (row as f64 + 0.5) * CELL_SIZE)
}

/// A document sized for a field of `shape` plus the color bar, with the
/// metadata elements and a white background.
#[allow(clippy::cast_precision_loss)]
fn document(shape: GridShape, metadata: &SvgMetadata<'_>) -> (Document, f64, f64) {
    let width = shape.cols as f64 * CELL_SIZE;
    let plot_height = shape.rows as f64 * CELL_SIZE;
    let height = plot_height + LEGEND_HEIGHT;
    let mut doc = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0.0, 0.0, width, height));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }
    if let Some(config_json) = metadata.config_json {
        let mut config_el = Element::new("tfm:config");
        config_el.assign("xmlns:tfm", "https://github.com/tfm-rs/tfm/ns/1");
        config_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(config_el);
        doc = doc.add(metadata_el);
    }

    doc = doc.add(
        Rectangle::new()
            .set("width", width)
            .set("height", height)
            .set("fill", "white"),
    );
    (doc, width, plot_height)
}

/// A `<text>` element.
fn label(x: f64, y: f64, anchor: &str, content: &str) -> Element {
    let mut text = Element::new("text");
    text.assign("x", x);
    text.assign("y", y);
    text.assign("font-size", 11);
    text.assign("font-family", "sans-serif");
    text.assign("text-anchor", anchor);
    text.append(Text::new(content));
    text
}

/// Color bar spanning the plot width with `min` and `max` labels.
#[allow(clippy::cast_precision_loss)]
fn color_bar(width: f64, top: f64, min: f64, max: f64, unit: &str) -> Group {
    let bar_width = width * 0.5;
    let left = (width - bar_width) / 2.0;
    let step = bar_width / LEGEND_STEPS as f64;
    let mut group = Group::new().set("id", "color-bar");
    for i in 0..LEGEND_STEPS {
        let t = (i as f64 + 0.5) / LEGEND_STEPS as f64;
        group = group.add(
            Rectangle::new()
                .set("x", (i as f64).mul_add(step, left))
                .set("y", top + 8.0)
                .set("width", step)
                .set("height", 10.0)
                .set("fill", ramp_color(t)),
        );
    }
    group
        .add(label(left - 4.0, top + 17.0, "end", &format!("{min:.3e} {unit}")))
        .add(label(left + bar_width + 4.0, top + 17.0, "start", &format!("{max:.3e} {unit}")))
}

fn finish(doc: &Document) -> String {
    // The svg crate omits the XML declaration.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}

/// Draw a vector field as arrows colored by their length.
///
/// Arrows start at their grid point and are scaled so the longest one
/// is [`QuiverStyle::scale`] grid cells long. When `mask` is given,
/// only grid points inside it are drawn. A field of zero vectors
/// yields a plot without arrows.
///
/// # Errors
///
/// Returns [`ExportError::EmptyField`] for a field without grid points,
/// [`ExportError::InvalidParameter`] for a non-positive scale and
/// [`ExportError::MaskShape`] if `mask` is not on the field grid.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use tfm_pipeline::VectorField;
/// use tfm_export::{QuiverStyle, SvgMetadata, to_quiver_svg};
///
/// let field = VectorField::new(array![[100.0, 0.0]], array![[0.0, 50.0]], 8.0).unwrap();
/// let metadata = SvgMetadata { title: Some("frame 01"), ..SvgMetadata::default() };
/// let svg = to_quiver_svg(&field, None, &QuiverStyle::default(), &metadata).unwrap();
/// assert!(svg.contains("<title>frame 01</title>"));
/// assert_eq!(svg.matches("class=\"arrow\"").count(), 2);
/// ```
pub fn to_quiver_svg(
    field: &VectorField,
    mask: Option<&Mask>,
    style: &QuiverStyle,
    metadata: &SvgMetadata<'_>,
) -> Result<String, ExportError> {
    let shape = field.shape();
    if shape.is_empty() {
        return Err(ExportError::EmptyField("vector field"));
    }
    if !(style.scale.is_finite() && style.scale > 0.0) {
        return Err(ExportError::InvalidParameter {
            name: "scale",
            value: style.scale,
        });
    }
    if let Some(m) = mask
        && m.shape() != shape
    {
        return Err(ExportError::MaskShape {
            expected: shape,
            found: m.shape(),
        });
    }

    let magnitude = field.magnitude();
    let inside = |row: usize, col: usize| mask.is_none_or(|m| m.get(row, col));
    let (min, max) = magnitude
        .indexed_iter()
        .filter(|((r, c), _)| inside(*r, *c))
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), (_, &m)| (lo.min(m), hi.max(m)));
    let min = if min.is_finite() { min } else { 0.0 };

    let (mut doc, width, plot_height) = document(shape, metadata);
    let mut arrows = Group::new()
        .set("id", "arrows")
        .set("fill", "none")
        .set("stroke-width", 1.5)
        .set("stroke-linecap", "round");
    if max > 0.0 {
        let length = style.scale * CELL_SIZE / max;
        for ((row, col), &m) in magnitude.indexed_iter() {
            if m <= 0.0 || !inside(row, col) {
                continue;
            }
            let (x0, y0) = cell_center(row, col);
            let dx = field.u()[[row, col]] * length;
            let dy = field.v()[[row, col]] * length;
            arrows = arrows.add(
                Path::new()
                    .set("class", "arrow")
                    .set("d", arrow_data(x0, y0, dx, dy))
                    .set("stroke", ramp_color(normalize(m, min, max))),
            );
        }
    }
    doc = doc
        .add(arrows)
        .add(color_bar(width, plot_height, min, max, &style.unit));
    Ok(finish(&doc))
}

/// Shaft from `(x0, y0)` along `(dx, dy)` with a two-stroke head.
fn arrow_data(x0: f64, y0: f64, dx: f64, dy: f64) -> Data {
    let (x1, y1) = (x0 + dx, y0 + dy);
    let len = dx.hypot(dy);
    let head = (len * 0.3).min(CELL_SIZE * 0.25);
    let (ux, uy) = (dx / len, dy / len);
    let back = (x1 - head * ux, y1 - head * uy);
    let side = (-uy * head * 0.5, ux * head * 0.5);
    Data::new()
        .move_to((x0, y0))
        .line_to((x1, y1))
        .move_to((back.0 + side.0, back.1 + side.1))
        .line_to((x1, y1))
        .line_to((back.0 - side.0, back.1 - side.1))
}

/// Field grid position in SVG units.
fn point_to_svg(p: Point) -> (f64, f64) {
    ((p.x + 0.5) * CELL_SIZE, (p.y + 0.5) * CELL_SIZE)
}

/// Draw every border as a chain of segments colored by the tension
/// magnitude between consecutive samples.
///
/// All borders share one color scale, running from the smallest to the
/// largest magnitude over every border ([`LineTension::min_magnitude`]
/// and [`LineTension::max_magnitude`]), so colors compare across
/// borders. Edge borders are drawn dashed.
///
/// # Errors
///
/// Returns [`ExportError::EmptyField`] if `shape` has no grid points.
pub fn to_line_tension_svg(
    tension: &LineTension,
    shape: GridShape,
    metadata: &SvgMetadata<'_>,
) -> Result<String, ExportError> {
    if shape.is_empty() {
        return Err(ExportError::EmptyField("field grid"));
    }
    let (min, max) = (tension.min_magnitude, tension.max_magnitude);
    let (mut doc, width, plot_height) = document(shape, metadata);

    let mut borders = Group::new()
        .set("id", "borders")
        .set("fill", "none")
        .set("stroke-width", 4)
        .set("stroke-linecap", "round");
    for (id, border) in &tension.borders {
        let mut group = Group::new().set("data-border", *id);
        if tension.edge_borders.contains(id) {
            group = group
                .set("data-edge", "true")
                .set("stroke-dasharray", "6 4");
        }
        let magnitudes: Vec<f64> = border.magnitudes().collect();
        for (pair, m) in border.points.windows(2).zip(magnitudes.windows(2)) {
            let data = Data::new()
                .move_to(point_to_svg(pair[0]))
                .line_to(point_to_svg(pair[1]));
            let mean = f64::midpoint(m[0], m[1]);
            group = group.add(
                Path::new()
                    .set("d", data)
                    .set("stroke", ramp_color(normalize(mean, min, max))),
            );
        }
        borders = borders.add(group);
    }
    doc = doc
        .add(borders)
        .add(color_bar(width, plot_height, min, max, "N/m"));
    Ok(finish(&doc))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use ndarray::{Array2, array};
    use tfm_pipeline::BorderTension;

    use super::*;

    fn straight_border(magnitudes: &[f64]) -> BorderTension {
        #[allow(clippy::cast_precision_loss)]
        let points = (0..magnitudes.len())
            .map(|i| Point::new(1.0 + i as f64, 2.0))
            .collect();
        BorderTension {
            points,
            tension: magnitudes.iter().map(|&m| [0.0, m]).collect(),
            normal_component: magnitudes.to_vec(),
            shear_component: vec![0.0; magnitudes.len()],
            normals: vec![[0.0, 1.0]; magnitudes.len()],
        }
    }

    #[test]
    fn ramp_endpoints() {
        assert_eq!(ramp_color(0.0), "#440154");
        assert_eq!(ramp_color(1.0), "#fde725");
        assert_eq!(ramp_color(0.5), "#21918c");
        assert_eq!(ramp_color(f64::NAN), "#440154");
        assert_eq!(ramp_color(7.0), "#fde725");
    }

    #[test]
    fn degenerate_scale_maps_to_middle() {
        assert!((normalize(3.0, 3.0, 3.0) - 0.5).abs() < f64::EPSILON);
        assert!((normalize(2.0, 1.0, 3.0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn quiver_skips_masked_and_zero_vectors() {
        let field = VectorField::new(
            array![[1.0, 0.0, 2.0], [0.0, -1.0, 0.5]],
            array![[0.0, 0.0, 1.0], [1.0, 0.0, 0.5]],
            4.0,
        )
        .unwrap();
        let all = to_quiver_svg(&field, None, &QuiverStyle::default(), &SvgMetadata::default())
            .unwrap();
        assert_eq!(all.matches("class=\"arrow\"").count(), 5);

        let mask = Mask::new(array![[true, true, false], [true, true, true]]);
        let masked = to_quiver_svg(
            &field,
            Some(&mask),
            &QuiverStyle::default(),
            &SvgMetadata::default(),
        )
        .unwrap();
        assert_eq!(masked.matches("class=\"arrow\"").count(), 4);
        assert!(masked.starts_with("<?xml"));
        assert!(masked.contains("id=\"color-bar\""));
    }

    #[test]
    fn quiver_of_zero_field_has_no_arrows() {
        let field = VectorField::zeros(GridShape::new(3, 4), 2.0);
        let svg =
            to_quiver_svg(&field, None, &QuiverStyle::default(), &SvgMetadata::default()).unwrap();
        assert!(!svg.contains("class=\"arrow\""));
        assert!(svg.contains("width=\"96\""));
    }

    #[test]
    fn quiver_rejects_bad_input() {
        let empty = VectorField::new(Array2::zeros((0, 3)), Array2::zeros((0, 3)), 1.0).unwrap();
        assert!(matches!(
            to_quiver_svg(&empty, None, &QuiverStyle::default(), &SvgMetadata::default()),
            Err(ExportError::EmptyField(_))
        ));

        let field = VectorField::zeros(GridShape::new(2, 2), 1.0);
        let style = QuiverStyle {
            scale: 0.0,
            ..QuiverStyle::default()
        };
        assert!(matches!(
            to_quiver_svg(&field, None, &style, &SvgMetadata::default()),
            Err(ExportError::InvalidParameter { name: "scale", .. })
        ));

        let mask = Mask::full(GridShape::new(3, 3));
        assert!(matches!(
            to_quiver_svg(&field, Some(&mask), &QuiverStyle::default(), &SvgMetadata::default()),
            Err(ExportError::MaskShape { .. })
        ));
    }

    #[test]
    fn line_tension_uses_global_scale() {
        let tension = LineTension {
            borders: BTreeMap::from([
                (0, straight_border(&[1.0, 1.0, 1.0])),
                (1, straight_border(&[5.0, 5.0])),
            ]),
            min_magnitude: 1.0,
            max_magnitude: 5.0,
            edge_borders: BTreeSet::from([1]),
            n_cells: 2,
        };
        let svg =
            to_line_tension_svg(&tension, GridShape::new(6, 8), &SvgMetadata::default()).unwrap();
        // Two segments at the bottom of the scale, one at the top.
        assert_eq!(svg.matches("stroke=\"#440154\"").count(), 2);
        assert_eq!(svg.matches("stroke=\"#fde725\"").count(), 1);
        assert_eq!(svg.matches("data-edge=\"true\"").count(), 1);
        assert!(svg.contains("N/m"));
    }

    #[test]
    fn metadata_is_embedded_and_escaped() {
        let metadata = SvgMetadata {
            title: Some("frame <3>"),
            description: Some("E = 49 kPa"),
            config_json: Some(r#"{"pixel_size":0.201}"#),
        };
        let field = VectorField::zeros(GridShape::new(2, 2), 1.0);
        let svg = to_quiver_svg(&field, None, &QuiverStyle::default(), &metadata).unwrap();
        assert!(svg.contains("<title>frame &lt;3&gt;</title>"));
        assert!(svg.contains("<desc>E = 49 kPa</desc>"));
        assert!(svg.contains("<tfm:config"));
        assert!(svg.contains("pixel_size"));
    }
}
