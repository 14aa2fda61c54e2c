//! Scattered-point interpolation onto a target grid.
//!
//! Reproduces the pipeline's station-field interpolation: a Delaunay
//! triangulation of the sample points evaluated at every target cell
//! center. `Linear` uses barycentric interpolation per triangle, `Cubic` a
//! per-triangle cubic Bezier patch with least-squares vertex gradients,
//! `Nearest` the closest sample point. Linear and cubic leave cells outside
//! the convex hull as NaN; `fill_gaps` then substitutes a fill value and
//! smooths the whole grid with a Gaussian blur (sigma 1.5), matching the
//! source heuristic. Everything is deterministic for fixed inputs: points
//! are inserted in input order and no randomness is involved.

use crate::types::{GridSpec, InterpMethod, Raster, RadarError, RadarResult};
use ndarray::{Array2, Zip};
use std::collections::HashMap;

/// One scattered sample: location in grid CRS plus a scalar value.
#[derive(Debug, Clone, Copy)]
pub struct SamplePoint {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// Minimum number of samples for a determined interpolation problem.
pub const MIN_POINTS: usize = 3;

/// Delaunay-based interpolator over a fixed set of sample points.
pub struct ScatteredInterpolator {
    points: Vec<SamplePoint>,
    triangles: Vec<[usize; 3]>,
    /// Per-vertex value gradients, estimated once, used by the cubic patch.
    gradients: Vec<(f64, f64)>,
}

impl ScatteredInterpolator {
    /// Build the triangulation. Fails with `InsufficientData` for fewer
    /// than three points; callers recover with a constant-field fallback.
    pub fn new(points: Vec<SamplePoint>) -> RadarResult<Self> {
        if points.len() < MIN_POINTS {
            return Err(RadarError::InsufficientData {
                needed: MIN_POINTS,
                got: points.len(),
            });
        }

        let triangles = delaunay(&points);
        log::debug!(
            "Triangulated {} points into {} triangles",
            points.len(),
            triangles.len()
        );

        let gradients = estimate_gradients(&points, &triangles);

        Ok(Self {
            points,
            triangles,
            gradients,
        })
    }

    /// Evaluate the interpolant at every cell center of the target grid.
    pub fn interpolate(&self, target: &GridSpec, method: InterpMethod) -> Raster {
        let (height, width) = target.shape();
        let mut data = Array2::<f32>::zeros((height, width));
        let transform = target.transform;

        Zip::indexed(&mut data).par_for_each(|(row, col), out| {
            let (x, y) = transform.cell_center(row, col);
            *out = match method {
                InterpMethod::Linear => self.eval_linear(x, y),
                InterpMethod::Cubic => self.eval_cubic(x, y),
                InterpMethod::Nearest => self.eval_nearest(x, y),
            };
        });

        Raster {
            spec: target.clone(),
            data,
        }
    }

    fn eval_linear(&self, x: f64, y: f64) -> f32 {
        match self.locate(x, y) {
            Some((tri, w)) => {
                let [a, b, c] = self.triangles[tri];
                (w[0] * self.points[a].value
                    + w[1] * self.points[b].value
                    + w[2] * self.points[c].value) as f32
            }
            None => f32::NAN,
        }
    }

    fn eval_nearest(&self, x: f64, y: f64) -> f32 {
        let mut best = 0usize;
        let mut best_d = f64::INFINITY;
        for (i, p) in self.points.iter().enumerate() {
            let d = (p.x - x) * (p.x - x) + (p.y - y) * (p.y - y);
            if d < best_d {
                best_d = d;
                best = i;
            }
        }
        self.points[best].value as f32
    }

    /// Cubic Bezier triangle (Farin construction) from vertex values and
    /// estimated gradients.
    fn eval_cubic(&self, x: f64, y: f64) -> f32 {
        let (tri, w) = match self.locate(x, y) {
            Some(found) => found,
            None => return f32::NAN,
        };
        let [ia, ib, ic] = self.triangles[tri];
        let (pa, pb, pc) = (self.points[ia], self.points[ib], self.points[ic]);
        let (ga, gb, gc) = (self.gradients[ia], self.gradients[ib], self.gradients[ic]);

        let dot = |g: (f64, f64), from: SamplePoint, to: SamplePoint| {
            (g.0 * (to.x - from.x) + g.1 * (to.y - from.y)) / 3.0
        };

        // Corner and edge control values.
        let b300 = pa.value;
        let b030 = pb.value;
        let b003 = pc.value;
        let b210 = pa.value + dot(ga, pa, pb);
        let b201 = pa.value + dot(ga, pa, pc);
        let b120 = pb.value + dot(gb, pb, pa);
        let b021 = pb.value + dot(gb, pb, pc);
        let b102 = pc.value + dot(gc, pc, pa);
        let b012 = pc.value + dot(gc, pc, pb);
        let edge_mean = (b210 + b201 + b120 + b021 + b102 + b012) / 6.0;
        let corner_mean = (b300 + b030 + b003) / 3.0;
        let b111 = edge_mean + (edge_mean - corner_mean) / 2.0;

        let (u, v, t) = (w[0], w[1], w[2]);
        let value = b300 * u * u * u
            + b030 * v * v * v
            + b003 * t * t * t
            + 3.0 * b210 * u * u * v
            + 3.0 * b201 * u * u * t
            + 3.0 * b120 * u * v * v
            + 3.0 * b021 * v * v * t
            + 3.0 * b102 * u * t * t
            + 3.0 * b012 * v * t * t
            + 6.0 * b111 * u * v * t;
        value as f32
    }

    /// Find the triangle containing (x, y) and its barycentric weights.
    fn locate(&self, x: f64, y: f64) -> Option<(usize, [f64; 3])> {
        const EPS: f64 = -1e-9;
        for (i, tri) in self.triangles.iter().enumerate() {
            let a = self.points[tri[0]];
            let b = self.points[tri[1]];
            let c = self.points[tri[2]];
            let denom = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
            if denom.abs() < f64::MIN_POSITIVE {
                continue;
            }
            let w0 = ((b.y - c.y) * (x - c.x) + (c.x - b.x) * (y - c.y)) / denom;
            let w1 = ((c.y - a.y) * (x - c.x) + (a.x - c.x) * (y - c.y)) / denom;
            let w2 = 1.0 - w0 - w1;
            if w0 >= EPS && w1 >= EPS && w2 >= EPS {
                return Some((i, [w0, w1, w2]));
            }
        }
        None
    }
}

/// Incremental Bowyer-Watson Delaunay triangulation. Points are inserted
/// in input order; super-triangle vertices are stripped at the end.
fn delaunay(points: &[SamplePoint]) -> Vec<[usize; 3]> {
    let n = points.len();

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let span = (max_x - min_x).max(max_y - min_y).max(1.0);
    let cx = (min_x + max_x) / 2.0;
    let cy = (min_y + max_y) / 2.0;

    // Working vertex list: the input points plus three far-away vertices.
    let mut verts: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
    verts.push((cx - 20.0 * span, cy - span));
    verts.push((cx, cy + 20.0 * span));
    verts.push((cx + 20.0 * span, cy - span));

    let mut triangles: Vec<[usize; 3]> = vec![orient_ccw(&verts, [n, n + 1, n + 2])];

    for point_idx in 0..n {
        let p = verts[point_idx];

        // Triangles whose circumcircle contains the new point.
        let mut bad = Vec::new();
        for (ti, tri) in triangles.iter().enumerate() {
            if in_circumcircle(&verts, *tri, p) {
                bad.push(ti);
            }
        }

        // Boundary of the cavity: edges used by exactly one bad triangle.
        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
        for &ti in &bad {
            let [a, b, c] = triangles[ti];
            for (u, v) in [(a, b), (b, c), (c, a)] {
                let key = (u.min(v), u.max(v));
                *edge_count.entry(key).or_insert(0) += 1;
            }
        }

        for &ti in bad.iter().rev() {
            triangles.swap_remove(ti);
        }

        for ((u, v), count) in edge_count {
            if count == 1 {
                triangles.push(orient_ccw(&verts, [u, v, point_idx]));
            }
        }
    }

    triangles
        .into_iter()
        .filter(|tri| tri.iter().all(|&v| v < n))
        .collect()
}

fn orient_ccw(verts: &[(f64, f64)], tri: [usize; 3]) -> [usize; 3] {
    let (ax, ay) = verts[tri[0]];
    let (bx, by) = verts[tri[1]];
    let (cx, cy) = verts[tri[2]];
    let area2 = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
    if area2 < 0.0 {
        [tri[0], tri[2], tri[1]]
    } else {
        tri
    }
}

fn in_circumcircle(verts: &[(f64, f64)], tri: [usize; 3], p: (f64, f64)) -> bool {
    let (ax, ay) = verts[tri[0]];
    let (bx, by) = verts[tri[1]];
    let (cx, cy) = verts[tri[2]];
    let (dx, dy) = p;

    let (ax, ay) = (ax - dx, ay - dy);
    let (bx, by) = (bx - dx, by - dy);
    let (cx, cy) = (cx - dx, cy - dy);

    let det = (ax * ax + ay * ay) * (bx * cy - cx * by)
        - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);
    det > 0.0
}

/// Per-vertex gradient of the sampled field: weighted least-squares plane
/// fit over the Delaunay neighbors of each vertex.
fn estimate_gradients(points: &[SamplePoint], triangles: &[[usize; 3]]) -> Vec<(f64, f64)> {
    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); points.len()];
    for tri in triangles {
        for (u, v) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            if !neighbors[u].contains(&v) {
                neighbors[u].push(v);
            }
            if !neighbors[v].contains(&u) {
                neighbors[v].push(u);
            }
        }
    }

    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut sxx = 0.0_f64;
            let mut sxy = 0.0_f64;
            let mut syy = 0.0_f64;
            let mut sxz = 0.0_f64;
            let mut syz = 0.0_f64;
            for &j in &neighbors[i] {
                let q = points[j];
                let dx = q.x - p.x;
                let dy = q.y - p.y;
                let dz = q.value - p.value;
                let w = 1.0 / (dx * dx + dy * dy).max(f64::MIN_POSITIVE);
                sxx += w * dx * dx;
                sxy += w * dx * dy;
                syy += w * dy * dy;
                sxz += w * dx * dz;
                syz += w * dy * dz;
            }
            let det = sxx * syy - sxy * sxy;
            if det.abs() < 1e-12 {
                (0.0, 0.0)
            } else {
                ((syy * sxz - sxy * syz) / det, (sxx * syz - sxy * sxz) / det)
            }
        })
        .collect()
}

/// Gap filling for interpolation holes: when the raster contains NaN
/// cells, substitute `fill_value` everywhere NaN and smooth the entire
/// grid with a separable Gaussian blur, sigma 1.5 (reflect boundaries).
/// Reproduces the source behavior as-is; the blur has no correctness
/// criterion beyond producing a plausible continuous surface.
pub fn fill_gaps(raster: &Raster, fill_value: f32) -> Raster {
    if raster.data.iter().all(|v| v.is_finite()) {
        return raster.clone();
    }
    log::info!("Filling interpolation gaps (fill {}, Gaussian sigma 1.5)", fill_value);

    let filled = raster
        .data
        .mapv(|v| if v.is_finite() { v } else { fill_value });
    let blurred = gaussian_blur(&filled, 1.5);

    Raster {
        spec: raster.spec.clone(),
        data: blurred,
    }
}

/// Separable Gaussian blur with reflect boundary handling, kernel radius
/// `4 * sigma` rounded, matching the common truncation.
fn gaussian_blur(data: &Array2<f32>, sigma: f64) -> Array2<f32> {
    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    for i in -radius..=radius {
        kernel.push((-((i * i) as f64) / (2.0 * sigma * sigma)).exp());
    }
    let total: f64 = kernel.iter().sum();
    let kernel: Vec<f64> = kernel.into_iter().map(|k| k / total).collect();

    let (height, width) = data.dim();
    let reflect = |i: isize, n: isize| -> usize {
        let mut i = i;
        while i < 0 || i >= n {
            if i < 0 {
                i = -i - 1;
            }
            if i >= n {
                i = 2 * n - i - 1;
            }
        }
        i as usize
    };

    // Horizontal pass.
    let mut tmp = Array2::<f32>::zeros((height, width));
    for row in 0..height {
        for col in 0..width {
            let mut acc = 0.0_f64;
            for (k, &kv) in kernel.iter().enumerate() {
                let src = reflect(col as isize + k as isize - radius, width as isize);
                acc += kv * data[[row, src]] as f64;
            }
            tmp[[row, col]] = acc as f32;
        }
    }

    // Vertical pass.
    let mut out = Array2::<f32>::zeros((height, width));
    for row in 0..height {
        for col in 0..width {
            let mut acc = 0.0_f64;
            for (k, &kv) in kernel.iter().enumerate() {
                let src = reflect(row as isize + k as isize - radius, height as isize);
                acc += kv * tmp[[src, col]] as f64;
            }
            out[[row, col]] = acc as f32;
        }
    }

    out
}
