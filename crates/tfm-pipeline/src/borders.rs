//! Cell border extraction from a hand-drawn border mask.
//!
//! The mask is thinned to a one pixel wide skeleton and dangling spurs
//! are pruned away. Skeleton pixels where three or more branches meet
//! are junctions; the branches between junctions are traced into
//! ordered border segments. Regions enclosed by the skeleton are cells.
//! Segments are mapped onto the field grid and smoothed with a
//! [`BorderSpline`].

use std::collections::{BTreeMap, BTreeSet};

use imageproc::region_labelling::Connectivity;
use ndarray::Array2;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};

use crate::mask::{Mask, frame_labels, label};
use crate::mode::MaskRole;
use crate::spline::BorderSpline;
use crate::types::{GridShape, PipelineError, PipelineWarning, Point, Stage};

/// Identifier of a border segment.
pub type BorderId = usize;

/// Neighbour offsets `(dr, dc)` in ring order N, NE, E, SE, S, SW, W, NW.
const RING: [(isize, isize); 8] = [
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
];

/// Neighbour offsets in the order a trace tries them: edge neighbours
/// before diagonal ones, so staircase corners are not skipped.
const STEPS: [(isize, isize); 8] = [
    (-1, 0),
    (0, 1),
    (1, 0),
    (0, -1),
    (-1, 1),
    (1, 1),
    (1, -1),
    (-1, -1),
];

/// Border extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorderConfig {
    /// Standard deviation, in skeleton pixels, of the Gaussian applied
    /// along each border before the spline is fitted.
    pub smoothing_sigma: f64,
    /// Skeleton end points closer than this many pixels to the image
    /// frame are kept by pruning.
    pub frame_margin: usize,
}

impl BorderConfig {
    /// Default along-border smoothing.
    pub const DEFAULT_SMOOTHING_SIGMA: f64 = 2.0;
    /// Default frame margin.
    pub const DEFAULT_FRAME_MARGIN: usize = 3;

    /// Check the smoothing width.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a negative or
    /// non-finite sigma.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.smoothing_sigma.is_finite() && self.smoothing_sigma >= 0.0 {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(format!(
                "borders.smoothing_sigma must be non-negative, got {}",
                self.smoothing_sigma
            )))
        }
    }
}

impl Default for BorderConfig {
    fn default() -> Self {
        Self {
            smoothing_sigma: Self::DEFAULT_SMOOTHING_SIGMA,
            frame_margin: Self::DEFAULT_FRAME_MARGIN,
        }
    }
}

/// One border segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Border {
    /// Ordered skeleton pixels in field grid coordinates, including the
    /// junction pixels at either end.
    pub points: Vec<Point>,
    /// Cells on either side.
    pub cells: BTreeSet<usize>,
    /// Whether the border touches the region outside all cells.
    pub is_edge: bool,
    /// Whether the border is a closed loop without junctions.
    pub closed: bool,
    /// Smoothed curve through `points`.
    pub spline: BorderSpline,
    /// Arclength of `spline` in field grid units.
    pub length: f64,
}

/// Cell borders, the cells they enclose and how they connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorderGraph {
    /// Every border segment.
    pub borders: BTreeMap<BorderId, Border>,
    /// Junctions and free border ends as nodes (field grid position),
    /// borders as edges.
    pub junctions: UnGraph<Point, BorderId>,
    /// Borders around each cell, cells numbered from 1.
    pub cells: BTreeMap<usize, Vec<BorderId>>,
    /// Borders that touch the outside region.
    pub edge_borders: BTreeSet<BorderId>,
    /// Number of cells enclosed by the borders.
    pub n_cells: usize,
    /// Number of unconnected border networks.
    pub networks: usize,
}

impl BorderGraph {
    /// Borders between two cells, excluding edge borders.
    pub fn interior_borders(&self) -> impl Iterator<Item = (BorderId, &Border)> {
        self.borders
            .iter()
            .filter(|(id, _)| !self.edge_borders.contains(id))
            .map(|(&id, border)| (id, border))
    }

    /// Non-fatal findings of the extraction.
    #[must_use]
    pub fn warnings(&self) -> Vec<PipelineWarning> {
        if self.networks > 1 {
            vec![PipelineWarning::SeparateBorderNetworks {
                count: self.networks,
            }]
        } else {
            Vec::new()
        }
    }
}

fn neighbour<T>(
    data: &Array2<T>,
    (r, c): (usize, usize),
    (dr, dc): (isize, isize),
) -> Option<(usize, usize)> {
    let r = r.checked_add_signed(dr)?;
    let c = c.checked_add_signed(dc)?;
    let (rows, cols) = data.dim();
    (r < rows && c < cols).then_some((r, c))
}

fn ring(data: &Array2<bool>, ix: (usize, usize)) -> [bool; 8] {
    RING.map(|d| neighbour(data, ix, d).is_some_and(|n| data[n]))
}

/// Number of unset-to-set transitions around the ring, i.e. the number
/// of separate branches leaving a pixel.
fn crossings(ring: &[bool; 8]) -> usize {
    (0..8).filter(|&i| !ring[i] && ring[(i + 1) % 8]).count()
}

/// A pixel with at most one branch leaving it.
fn is_end(ring: &[bool; 8]) -> bool {
    crossings(ring) <= 1
}

fn is_junction(ring: &[bool; 8]) -> bool {
    crossings(ring) >= 3
}

/// Zhang–Suen thinning.
pub(crate) fn thin(data: &Array2<bool>) -> Array2<bool> {
    let mut out = data.clone();
    loop {
        let mut changed = false;
        for pass in 0..2 {
            let remove: Vec<(usize, usize)> = out
                .indexed_iter()
                .filter(|&(_, &set)| set)
                .map(|(ix, _)| ix)
                .filter(|&ix| {
                    let p = ring(&out, ix);
                    let set = p.iter().filter(|&&s| s).count();
                    let [n, _, e, _, s, _, w, _] = p;
                    let side = if pass == 0 {
                        !(n && e && s) && !(e && s && w)
                    } else {
                        !(n && e && w) && !(n && s && w)
                    };
                    (2..=6).contains(&set) && crossings(&p) == 1 && side
                })
                .collect();
            changed |= !remove.is_empty();
            for ix in remove {
                out[ix] = false;
            }
        }
        if !changed {
            return out;
        }
    }
}

/// Repeatedly remove skeleton end points away from the frame. Returns
/// the number of removed pixels.
fn prune(skeleton: &mut Array2<bool>, frame_margin: usize) -> usize {
    let (rows, cols) = skeleton.dim();
    let near_frame = |(r, c): (usize, usize)| {
        r < frame_margin || c < frame_margin || r + frame_margin >= rows || c + frame_margin >= cols
    };
    let budget = skeleton.iter().filter(|&&s| s).count();
    let mut removed = 0;
    for _ in 0..budget {
        let ends: Vec<(usize, usize)> = skeleton
            .indexed_iter()
            .filter(|&(ix, &set)| set && !near_frame(ix) && is_end(&ring(skeleton, ix)))
            .map(|(ix, _)| ix)
            .collect();
        if ends.is_empty() {
            break;
        }
        removed += ends.len();
        for ix in ends {
            skeleton[ix] = false;
        }
    }
    removed
}

/// Where a traced segment ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    /// At a junction cluster.
    Junction(u32),
    /// At a free skeleton pixel.
    Free((usize, usize)),
}

struct Trace {
    pixels: Vec<(usize, usize)>,
    start: End,
    end: End,
    closed: bool,
}

struct Tracer<'a> {
    skeleton: &'a Array2<bool>,
    /// Junction cluster id per pixel, 0 off junctions.
    clusters: &'a Array2<u32>,
    visited: Array2<bool>,
}

impl Tracer<'_> {
    fn is_free(&self, ix: (usize, usize)) -> bool {
        self.skeleton[ix] && self.clusters[ix] == 0 && !self.visited[ix]
    }

    fn next_pixel(&self, ix: (usize, usize)) -> Option<(usize, usize)> {
        STEPS
            .iter()
            .filter_map(|&d| neighbour(self.skeleton, ix, d))
            .find(|&n| self.is_free(n))
    }

    fn junction_next_to(&self, ix: (usize, usize), skip: Option<u32>) -> Option<(usize, usize)> {
        STEPS
            .iter()
            .filter_map(|&d| neighbour(self.skeleton, ix, d))
            .find(|&n| self.clusters[n] != 0 && Some(self.clusters[n]) != skip)
    }

    /// Follow the skeleton from `first` until a junction or a dead end.
    /// `origin` is the junction pixel the trace leaves from, if any.
    fn walk(&mut self, origin: Option<(usize, usize)>, first: (usize, usize)) -> Trace {
        let origin_cluster = origin.map(|ix| self.clusters[ix]);
        let start = origin_cluster.map_or(End::Free(first), End::Junction);
        let mut pixels: Vec<(usize, usize)> = origin.into_iter().collect();
        let mut current = first;
        self.visited[current] = true;
        pixels.push(current);
        loop {
            // Stay clear of the origin cluster for the first steps.
            let skip = if pixels.len() <= 3 { origin_cluster } else { None };
            if let Some(j) = self.junction_next_to(current, skip) {
                pixels.push(j);
                return Trace {
                    pixels,
                    start,
                    end: End::Junction(self.clusters[j]),
                    closed: false,
                };
            }
            let Some(next) = self.next_pixel(current) else {
                return Trace {
                    pixels,
                    start,
                    end: End::Free(current),
                    closed: false,
                };
            };
            self.visited[next] = true;
            pixels.push(next);
            current = next;
        }
    }

    fn trace_all(&mut self) -> Vec<Trace> {
        let mut traces = Vec::new();
        let junction_pixels: Vec<(usize, usize)> = self
            .clusters
            .indexed_iter()
            .filter(|&(_, &c)| c != 0)
            .map(|(ix, _)| ix)
            .collect();
        for ix in junction_pixels {
            for d in STEPS {
                if let Some(n) = neighbour(self.skeleton, ix, d)
                    && self.is_free(n)
                {
                    traces.push(self.walk(Some(ix), n));
                }
            }
        }

        let ends: Vec<(usize, usize)> = self
            .skeleton
            .indexed_iter()
            .filter(|&(ix, &set)| set && is_end(&ring(self.skeleton, ix)))
            .map(|(ix, _)| ix)
            .collect();
        for ix in ends {
            if self.is_free(ix) {
                traces.push(self.walk(None, ix));
            }
        }

        // Whatever is left lies on closed loops.
        let rest: Vec<(usize, usize)> = self
            .skeleton
            .indexed_iter()
            .filter(|&(_, &set)| set)
            .map(|(ix, _)| ix)
            .collect();
        for ix in rest {
            if !self.is_free(ix) {
                continue;
            }
            let mut trace = self.walk(None, ix);
            let first = trace.pixels[0];
            if let End::Free(last) = trace.end
                && trace.pixels.len() > 2
                && last.0.abs_diff(first.0) <= 1
                && last.1.abs_diff(first.1) <= 1
            {
                trace.pixels.push(first);
                trace.end = trace.start;
                trace.closed = true;
            }
            traces.push(trace);
        }
        traces
    }
}

/// Cells and outside region bordering a trace.
fn adjacent_cells(
    trace: &Trace,
    clusters: &Array2<u32>,
    regions: &Array2<u32>,
    outside: &BTreeSet<u32>,
    cell_ids: &BTreeMap<u32, usize>,
) -> (BTreeSet<usize>, bool) {
    let mut interior: Vec<(usize, usize)> = trace
        .pixels
        .iter()
        .copied()
        .filter(|&ix| clusters[ix] == 0)
        .collect();
    if trace.closed {
        interior.pop();
    } else if interior.len() > 2 {
        // End pixels can see into a third cell around a junction.
        interior.remove(0);
        interior.pop();
    }
    let mut cells = BTreeSet::new();
    let mut touches_outside = false;
    for ix in interior {
        for d in RING {
            let Some(n) = neighbour(clusters, ix, d).map(|n| regions[n]) else {
                continue;
            };
            if n == 0 {
                continue;
            }
            if outside.contains(&n) {
                touches_outside = true;
            } else if let Some(&cell) = cell_ids.get(&n) {
                cells.insert(cell);
            }
        }
    }
    (cells, touches_outside)
}

/// Extract cell borders from `border_mask` and map them onto a field
/// grid of `field_shape`.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyMask`] for an empty border mask,
/// [`PipelineError::ShapeMismatch`] for an empty field grid,
/// [`PipelineError::InvalidConfig`] for invalid settings and
/// [`PipelineError::NoBorders`] if no border segment survives.
#[allow(clippy::too_many_lines, clippy::cast_precision_loss)]
pub fn find_borders(
    border_mask: &Mask,
    field_shape: GridShape,
    config: &BorderConfig,
) -> Result<BorderGraph, PipelineError> {
    config.validate()?;
    if border_mask.is_empty() {
        return Err(PipelineError::EmptyMask {
            role: MaskRole::Borders,
        });
    }
    if field_shape.is_empty() {
        return Err(PipelineError::ShapeMismatch {
            stage: Stage::Borders,
            what: "field grid",
            expected: border_mask.shape(),
            found: field_shape,
        });
    }

    let mut skeleton = thin(border_mask.data());
    let pruned = prune(&mut skeleton, config.frame_margin);

    let junction_mask = Array2::from_shape_fn(skeleton.dim(), |ix| {
        skeleton[ix] && is_junction(&ring(&skeleton, ix))
    });
    let (clusters, n_clusters) = label(&junction_mask, Connectivity::Eight);

    let (regions, _) = label(&skeleton.mapv(|s| !s), Connectivity::Four);
    let outside = frame_labels(&regions);
    let cell_ids: BTreeMap<u32, usize> = regions
        .iter()
        .copied()
        .filter(|&l| l != 0 && !outside.contains(&l))
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .enumerate()
        .map(|(i, l)| (l, i + 1))
        .collect();
    let n_cells = cell_ids.len();

    let mut tracer = Tracer {
        skeleton: &skeleton,
        clusters: &clusters,
        visited: Array2::from_elem(skeleton.dim(), false),
    };
    let traces = tracer.trace_all();

    let mask_shape = border_mask.shape();
    let scale_x = field_shape.cols as f64 / mask_shape.cols as f64;
    let scale_y = field_shape.rows as f64 / mask_shape.rows as f64;
    let to_field = |(r, c): (usize, usize)| {
        Point::new(
            (c as f64 + 0.5).mul_add(scale_x, -0.5),
            (r as f64 + 0.5).mul_add(scale_y, -0.5),
        )
    };

    // Junction cluster centers on the field grid.
    let mut cluster_sums = vec![(0.0, 0.0, 0usize); n_clusters + 1];
    for (ix, &cluster) in clusters.indexed_iter() {
        if cluster != 0 {
            let p = to_field(ix);
            let entry = &mut cluster_sums[cluster as usize];
            *entry = (entry.0 + p.x, entry.1 + p.y, entry.2 + 1);
        }
    }

    let mut junctions = UnGraph::<Point, BorderId>::new_undirected();
    let mut junction_nodes: BTreeMap<u32, NodeIndex> = BTreeMap::new();
    let mut node_for = |end: End, graph: &mut UnGraph<Point, BorderId>| match end {
        End::Junction(cluster) => *junction_nodes.entry(cluster).or_insert_with(|| {
            let (sx, sy, n) = cluster_sums[cluster as usize];
            graph.add_node(Point::new(sx / n as f64, sy / n as f64))
        }),
        End::Free(ix) => graph.add_node(to_field(ix)),
    };

    let mut borders = BTreeMap::new();
    let mut cells: BTreeMap<usize, Vec<BorderId>> =
        (1..=n_cells).map(|cell| (cell, Vec::new())).collect();
    let mut edge_borders = BTreeSet::new();
    for trace in &traces {
        let points: Vec<Point> = trace.pixels.iter().map(|&ix| to_field(ix)).collect();
        let Some(spline) = BorderSpline::fit(&points, config.smoothing_sigma) else {
            continue;
        };
        let id = borders.len();
        let (adjacent, is_edge) = adjacent_cells(trace, &clusters, &regions, &outside, &cell_ids);

        let a = node_for(trace.start, &mut junctions);
        let b = if trace.closed {
            a
        } else {
            node_for(trace.end, &mut junctions)
        };
        junctions.add_edge(a, b, id);

        for &cell in &adjacent {
            cells.entry(cell).or_default().push(id);
        }
        if is_edge {
            edge_borders.insert(id);
        }
        borders.insert(
            id,
            Border {
                points,
                cells: adjacent,
                is_edge,
                closed: trace.closed,
                length: spline.length(),
                spline,
            },
        );
    }

    if borders.is_empty() {
        return Err(PipelineError::NoBorders);
    }
    let networks = petgraph::algo::connected_components(&junctions);

    tracing::debug!(
        skeleton_pixels = skeleton.iter().filter(|&&s| s).count(),
        pruned,
        junctions = n_clusters,
        borders = borders.len(),
        edge_borders = edge_borders.len(),
        n_cells,
        networks,
        "borders extracted"
    );
    Ok(BorderGraph {
        borders,
        junctions,
        cells,
        edge_borders,
        n_cells,
        networks,
    })
}
