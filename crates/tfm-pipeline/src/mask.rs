//! Binary masks marking the areas analysed by each stage.
//!
//! Masks are drawn on the bead image grid and must be resampled to the
//! deformation field grid before they are combined with fields. Region
//! labelling goes through [`imageproc::region_labelling`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::mode::MaskRole;
use crate::types::{GridShape, PipelineError, Stage};

/// How a mask is mapped onto a grid of a different size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleMethod {
    /// Each target cell takes the source pixel under its center.
    #[default]
    Nearest,
    /// Each target cell is set when at least half of the source pixels
    /// it covers are set.
    Area,
}

/// A boolean grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    data: Array2<bool>,
}

impl Mask {
    /// Wrap a boolean grid.
    #[must_use]
    pub const fn new(data: Array2<bool>) -> Self {
        Self { data }
    }

    /// A mask with every cell set.
    #[must_use]
    pub fn full(shape: GridShape) -> Self {
        Self::new(Array2::from_elem(shape.dim(), true))
    }

    /// A mask with every cell set except for a frame of `margin` cells.
    #[must_use]
    pub fn full_with_margin(shape: GridShape, margin: usize) -> Self {
        Self::new(Array2::from_shape_fn(shape.dim(), |(r, c)| {
            r >= margin
                && c >= margin
                && r + margin < shape.rows
                && c + margin < shape.cols
        }))
    }

    /// The underlying grid.
    #[must_use]
    pub const fn data(&self) -> &Array2<bool> {
        &self.data
    }

    /// Consumes the mask and returns its grid.
    #[must_use]
    pub fn into_data(self) -> Array2<bool> {
        self.data
    }

    /// Grid shape.
    #[must_use]
    pub fn shape(&self) -> GridShape {
        GridShape::of(&self.data)
    }

    /// Whether the cell at `(row, col)` is set. Out-of-range cells are not.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data.get((row, col)).copied().unwrap_or(false)
    }

    /// Number of set cells.
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    /// Returns `true` if no cell is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&b| b)
    }

    /// Cells set in both masks.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if the shapes differ.
    pub fn intersection(&self, other: &Self) -> Result<Self, PipelineError> {
        self.expect_shape(other.shape(), Stage::Input, "mask")?;
        let mut data = self.data.clone();
        data.zip_mut_with(&other.data, |a, &b| *a = *a && b);
        Ok(Self::new(data))
    }

    /// Check that the mask lies on the given grid.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] naming `stage` and `what`.
    pub fn expect_shape(
        &self,
        expected: GridShape,
        stage: Stage,
        what: &'static str,
    ) -> Result<(), PipelineError> {
        let found = self.shape();
        if found == expected {
            Ok(())
        } else {
            Err(PipelineError::ShapeMismatch {
                stage,
                what,
                expected,
                found,
            })
        }
    }

    /// Set every unset region that does not touch the grid frame.
    #[must_use]
    pub fn fill_holes(&self) -> Self {
        let complement = self.data.mapv(|b| !b);
        let (labels, count) = label(&complement, Connectivity::Four);
        let outside = frame_labels(&labels);
        if count == outside.len() {
            return self.clone();
        }
        Self::new(Array2::from_shape_fn(self.data.dim(), |ix| {
            self.data[ix] || !outside.contains(&labels[ix])
        }))
    }

    /// Number of 8-connected regions of set cells.
    #[must_use]
    pub fn regions(&self) -> usize {
        label(&self.data, Connectivity::Eight).1
    }

    /// Map the mask onto a grid of another shape.
    #[must_use]
    pub fn resample(&self, shape: GridShape, method: ResampleMethod) -> Self {
        let src = self.shape();
        if src == shape || src.is_empty() {
            return if src == shape {
                self.clone()
            } else {
                Self::new(Array2::from_elem(shape.dim(), false))
            };
        }
        match method {
            ResampleMethod::Nearest => Self::new(Array2::from_shape_fn(shape.dim(), |(r, c)| {
                self.data[[
                    nearest_index(r, src.rows, shape.rows),
                    nearest_index(c, src.cols, shape.cols),
                ]]
            })),
            ResampleMethod::Area => Self::new(Array2::from_shape_fn(shape.dim(), |(r, c)| {
                let (r0, r1) = covered_range(r, src.rows, shape.rows);
                let (c0, c1) = covered_range(c, src.cols, shape.cols);
                let view = self.data.slice(ndarray::s![r0..r1, c0..c1]);
                let set = view.iter().filter(|&&b| b).count();
                2 * set >= view.len()
            })),
        }
    }

    /// Enforce the contract of an area mask: non-empty and a single
    /// connected region. Returns the mask with its holes filled.
    ///
    /// Border masks are validated by the border extractor instead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyMask`] or
    /// [`PipelineError::FragmentedMask`].
    pub fn validate(&self, role: MaskRole) -> Result<Self, PipelineError> {
        if self.is_empty() {
            return Err(PipelineError::EmptyMask { role });
        }
        let regions = self.regions();
        if regions > 1 {
            return Err(PipelineError::FragmentedMask { role, regions });
        }
        Ok(self.fill_holes())
    }
}

/// Source index under the center of target cell `i`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn nearest_index(i: usize, src: usize, dst: usize) -> usize {
    let pos = (i as f64 + 0.5) * src as f64 / dst as f64;
    (pos.floor() as usize).min(src - 1)
}

/// Half-open source range covered by target cell `i`, at least one cell.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn covered_range(i: usize, src: usize, dst: usize) -> (usize, usize) {
    let scale = src as f64 / dst as f64;
    let start = ((i as f64 * scale).floor() as usize).min(src - 1);
    let end = (((i + 1) as f64 * scale).ceil() as usize).clamp(start + 1, src);
    (start, end)
}

/// Convert a grid to a single-channel image; `true` becomes 255.
#[allow(clippy::cast_possible_truncation)]
fn to_image(data: &Array2<bool>) -> GrayImage {
    let (rows, cols) = data.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([if data[[y as usize, x as usize]] { 255 } else { 0 }])
    })
}

/// Label the connected regions of set cells.
///
/// Returns the label grid (0 for unset cells, regions numbered from 1)
/// and the number of regions.
pub(crate) fn label(data: &Array2<bool>, connectivity: Connectivity) -> (Array2<u32>, usize) {
    relabel(&connected_components(&to_image(data), connectivity, Luma([0u8])))
}

/// Label the connected regions of both set and unset cells, so every
/// cell carries a non-zero label.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn label_all(data: &Array2<bool>, connectivity: Connectivity) -> (Array2<u32>, usize) {
    let (rows, cols) = data.dim();
    let image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([if data[[y as usize, x as usize]] { 2 } else { 1 }])
    });
    relabel(&connected_components(&image, connectivity, Luma([0u8])))
}

/// Copy labels into an array, renumbering them consecutively from 1.
fn relabel(image: &image::ImageBuffer<Luma<u32>, Vec<u32>>) -> (Array2<u32>, usize) {
    let (w, h) = image.dimensions();
    let mut remap: BTreeMap<u32, u32> = BTreeMap::new();
    let mut next = 0u32;
    let labels = Array2::from_shape_fn((h as usize, w as usize), |(r, c)| {
        #[allow(clippy::cast_possible_truncation)]
        let raw = image.get_pixel(c as u32, r as u32).0[0];
        if raw == 0 {
            0
        } else {
            *remap.entry(raw).or_insert_with(|| {
                next += 1;
                next
            })
        }
    });
    (labels, next as usize)
}

/// Non-zero labels that occur on the outermost rows and columns.
pub(crate) fn frame_labels(labels: &Array2<u32>) -> BTreeSet<u32> {
    let (rows, cols) = labels.dim();
    let mut out = BTreeSet::new();
    if rows == 0 || cols == 0 {
        return out;
    }
    for c in 0..cols {
        out.insert(labels[[0, c]]);
        out.insert(labels[[rows - 1, c]]);
    }
    for r in 0..rows {
        out.insert(labels[[r, 0]]);
        out.insert(labels[[r, cols - 1]]);
    }
    out.remove(&0);
    out
}

/// Number of adjacency rings grown from the frame when filling patches.
const PATCH_DEPTH: usize = 2;

/// Turn a cell-area annotation of a confluent layer into a force
/// measurement area.
///
/// Set and unset patches are labelled together. Starting from the set
/// patches that touch the grid frame, neighbouring patches are added
/// ring by ring, at most two rings deep, never crossing into unset
/// patches that touch the frame. The union of all visited patches is
/// returned.
#[must_use]
pub fn fill_patches_for_cell_layer(cell_area: &Mask) -> Mask {
    let (labels, count) = label_all(cell_area.data(), Connectivity::Eight);
    if count == 0 {
        return cell_area.clone();
    }

    let adjacency = label_adjacency(&labels);
    let frame = frame_labels(&labels);
    let mut label_is_set = vec![false; count + 1];
    for (ix, &l) in labels.indexed_iter() {
        if cell_area.data()[ix] {
            label_is_set[l as usize] = true;
        }
    }

    let mut visited: BTreeSet<u32> = frame.clone();
    let mut selected: BTreeSet<u32> = frame
        .iter()
        .copied()
        .filter(|&l| label_is_set[l as usize])
        .collect();
    let mut queue: VecDeque<(u32, usize)> = selected.iter().map(|&l| (l, 0)).collect();

    while let Some((current, depth)) = queue.pop_front() {
        if depth == PATCH_DEPTH {
            continue;
        }
        for &next in adjacency.get(&current).into_iter().flatten() {
            if visited.insert(next) {
                selected.insert(next);
                queue.push_back((next, depth + 1));
            }
        }
    }

    tracing::debug!(
        patches = count,
        selected = selected.len(),
        "filled cell layer patches"
    );
    Mask::new(labels.mapv(|l| selected.contains(&l)))
}

/// Pairs of different labels that share a 4-neighbour edge.
fn label_adjacency(labels: &Array2<u32>) -> BTreeMap<u32, BTreeSet<u32>> {
    let (rows, cols) = labels.dim();
    let mut adjacency: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    let mut link = |a: u32, b: u32| {
        if a != b {
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }
    };
    for r in 0..rows {
        for c in 0..cols {
            if c + 1 < cols {
                link(labels[[r, c]], labels[[r, c + 1]]);
            }
            if r + 1 < rows {
                link(labels[[r, c]], labels[[r + 1, c]]);
            }
        }
    }
    adjacency
}

/// The masks supplied for one frame, keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskSet {
    masks: BTreeMap<MaskRole, Mask>,
}

impl MaskSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the mask for `role`.
    pub fn insert(&mut self, role: MaskRole, mask: Mask) -> Option<Mask> {
        self.masks.insert(role, mask)
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, role: MaskRole, mask: Mask) -> Self {
        self.masks.insert(role, mask);
        self
    }

    /// The mask for `role`, if supplied.
    #[must_use]
    pub fn get(&self, role: MaskRole) -> Option<&Mask> {
        self.masks.get(&role)
    }

    /// The mask for `role`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingInput`] if it was not supplied.
    pub fn require(&self, role: MaskRole) -> Result<&Mask, PipelineError> {
        self.get(role).ok_or(PipelineError::MissingInput { role })
    }

    /// Roles with a mask, in role order.
    #[must_use]
    pub fn roles(&self) -> Vec<MaskRole> {
        self.masks.keys().copied().collect()
    }

    /// Check that every role in `roles` is present.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingInput`] for the first absent role.
    pub fn require_all(&self, roles: &[MaskRole]) -> Result<(), PipelineError> {
        roles.iter().try_for_each(|&role| self.require(role).map(|_| ()))
    }
}
