//! CSV dumps of fields and border samples.
//!
//! One row per grid point (or border sample), comma separated, with a
//! header line. Positions are given both as grid indices and in µm from
//! the top-left corner of the field, `x` along columns and `y` down the
//! rows. Numbers use Rust's shortest round-trip formatting.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use std::fmt::Write;

use ndarray::Array2;
use tfm_pipeline::{LineTension, VectorField};

/// Dump a vector field as `row,col,x_um,y_um,u,v`.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use tfm_pipeline::VectorField;
/// use tfm_export::vector_field_csv;
///
/// let field = VectorField::new(array![[1.0, 0.5]], array![[0.0, -2.0]], 4.0).unwrap();
/// let csv = vector_field_csv(&field);
/// assert_eq!(csv, "row,col,x_um,y_um,u,v\n0,0,0,0,1,0\n0,1,4,0,0.5,-2\n");
/// ```
#[must_use]
pub fn vector_field_csv(field: &VectorField) -> String {
    let ps = field.pixel_size();
    let mut out = String::from("row,col,x_um,y_um,u,v\n");
    for ((row, col), &u) in field.u().indexed_iter() {
        let v = field.v()[[row, col]];
        let (x, y) = position(row, col, ps);
        let _ = writeln!(out, "{row},{col},{x},{y},{u},{v}");
    }
    out
}

/// Dump a scalar map as `row,col,x_um,y_um,<name>`.
#[must_use]
pub fn scalar_field_csv(values: &Array2<f64>, pixel_size: f64, name: &str) -> String {
    let mut out = format!("row,col,x_um,y_um,{name}\n");
    for ((row, col), value) in values.indexed_iter() {
        let (x, y) = position(row, col, pixel_size);
        let _ = writeln!(out, "{row},{col},{x},{y},{value}");
    }
    out
}

/// Dump every line tension sample as
/// `border,edge,x_um,y_um,tx,ty,normal,shear`.
///
/// Sample positions are converted from grid units to µm with
/// `field_pixel_size`. Tensions are in N/m.
#[must_use]
pub fn line_tension_csv(tension: &LineTension, field_pixel_size: f64) -> String {
    let mut out = String::from("border,edge,x_um,y_um,tx,ty,normal,shear\n");
    for (id, border) in &tension.borders {
        let edge = tension.edge_borders.contains(id);
        let rows = border
            .points
            .iter()
            .zip(&border.tension)
            .zip(border.normal_component.iter().zip(&border.shear_component));
        for ((point, [tx, ty]), (normal, shear)) in rows {
            let x = point.x * field_pixel_size;
            let y = point.y * field_pixel_size;
            let _ = writeln!(out, "{id},{edge},{x},{y},{tx},{ty},{normal},{shear}");
        }
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn position(row: usize, col: usize, pixel_size: f64) -> (f64, f64) {
    (col as f64 * pixel_size, row as f64 * pixel_size)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use ndarray::array;
    use tfm_pipeline::{BorderTension, Point};

    use super::*;

    #[test]
    fn scalar_field_header_names_the_column() {
        let csv = scalar_field_csv(&array![[0.25], [1e-3]], 2.0, "mean_normal_stress");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "row,col,x_um,y_um,mean_normal_stress");
        assert_eq!(lines[1], "0,0,0,0,0.25");
        assert_eq!(lines[2], "1,0,0,2,0.001");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn line_tension_rows_mark_edge_borders() {
        let border = BorderTension {
            points: vec![Point::new(1.0, 2.0), Point::new(1.5, 2.0)],
            tension: vec![[0.5, 0.0], [0.25, 0.0]],
            normal_component: vec![0.5, 0.25],
            shear_component: vec![0.0, 0.0],
            normals: vec![[1.0, 0.0], [1.0, 0.0]],
        };
        let tension = LineTension {
            borders: BTreeMap::from([(0, border.clone()), (3, border)]),
            min_magnitude: 0.25,
            max_magnitude: 0.5,
            edge_borders: BTreeSet::from([3]),
            n_cells: 2,
        };
        let csv = line_tension_csv(&tension, 10.0);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "0,false,10,20,0.5,0,0.5,0");
        assert_eq!(lines[4], "3,true,15,20,0.25,0,0.25,0");
    }
}
