use crate::{
    mesh::Point,
    metric::{AnisoMetric, AnisoMetric2d, AnisoMetric3d, Metric},
    Idx,
};
use nalgebra::{Matrix2, Matrix3};
use std::fmt::Debug;

const SQRT_3: f64 = 1.732_050_807_568_877_2;
const SQRT_6: f64 = std::f64::consts::SQRT_2 * SQRT_3;

/// Simplex defined by the coordinates of its vertices and the metric at each vertex
pub trait GElem<const D: usize, M: Metric<D>>: Clone + Copy + Debug + Send {
    type Face: GElem<D, M>;
    type BCoords: AsRef<[f64]> + Debug;
    /// Volume of the unit-length equilateral element
    const IDEAL_VOL: f64;

    fn from_verts<I: Iterator<Item = (Point<D>, M)>>(points_n_metrics: I) -> Self;

    /// Build the element (point, face[0], face[1], ...)
    fn from_vert_and_face(point: &Point<D>, metric: &M, face: &Self::Face) -> Self;

    /// Signed volume (area in 2d, length for edges)
    fn vol(&self) -> f64;

    fn center(&self) -> Point<D> {
        (0..self.n_verts()).map(|i| self.vert(i)).sum::<Point<D>>() / f64::from(self.n_verts())
    }

    fn n_verts(&self) -> Idx;

    /// Element quality in metric space
    /// ```math
    /// q(K) = \frac{(|K|_{\mathcal M} / |K_{eq}|)^{2/d}}{\frac{1}{n_e}\sum_e ||e||_{\mathcal M}^2}
    /// ```
    /// where $`|K|_{\mathcal M}`$ is the physical volume divided by the smallest of the
    /// vertex metric volumes. $`q = 1`$ for the unit equilateral element and $`q \le 0`$
    /// for inverted elements.
    fn quality(&self) -> f64;

    fn vert(&self, i: Idx) -> Point<D>;

    /// Point from its barycentric coordinates
    fn point(&self, x: &[f64]) -> Point<D> {
        (0..self.n_verts())
            .zip(x.iter())
            .map(|(i, &w)| w * self.vert(i))
            .sum()
    }

    /// Barycentric coordinates of `p`. For a triangle in 3d or an edge in 2d / 3d, these
    /// are the coordinates of the orthogonal projection of `p` on the element's span.
    fn bcoords(&self, p: &Point<D>) -> Self::BCoords;

    /// Normal scaled by the element's volume (only for faces, i.e. `DIM = D - 1`)
    fn scaled_normal(&self) -> Point<D>;

    fn normal(&self) -> Point<D> {
        let mut n = self.scaled_normal();
        n.normalize_mut();
        n
    }

    /// i-th face, oriented outwards
    fn gface(&self, i: Idx) -> Self::Face;
}

/// Closest point to `p` on a simplex, by recursion on its faces
pub fn closest_point<const D: usize, M: Metric<D>, G: GElem<D, M>>(ge: &G, p: &Point<D>) -> Point<D> {
    if ge.n_verts() == 1 {
        return ge.vert(0);
    }
    let b = ge.bcoords(p);
    let b = b.as_ref();
    if b.iter().all(|&x| x >= 0.0) {
        return ge.point(b);
    }
    let mut res = ge.vert(0);
    let mut d_min = f64::MAX;
    for i_face in 0..ge.n_verts() {
        if b[i_face as usize] >= 0.0 {
            continue;
        }
        let pt = closest_point(&ge.gface(i_face), p);
        let d = (pt - p).norm_squared();
        if d < d_min {
            d_min = d;
            res = pt;
        }
    }
    res
}

/// Sum of the squared metric-space lengths of the edges `(i, j)` of the points
fn sum_sq_lengths<const D: usize, M: Metric<D>>(m: &M, points: &[Point<D>]) -> (f64, usize) {
    let mut l = 0.0;
    let mut n = 0;
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            l += m.length(&(points[j] - points[i])).powi(2);
            n += 1;
        }
    }
    (l, n)
}

#[derive(Clone, Copy, Debug)]
pub struct GTetrahedron<const D: usize, M: Metric<D>> {
    points: [Point<D>; 4],
    metrics: [M; 4],
}

impl<const D: usize, M: Metric<D>> GTetrahedron<D, M> {
    // Jacobian of the reference to equilateral transformation
    const J_EQ: Matrix3<f64> = Matrix3::new(
        1.0,
        -1. / SQRT_3,
        -1. / SQRT_6,
        0.,
        2. / SQRT_3,
        -1.0 / SQRT_6,
        0.,
        0.,
        3. / SQRT_6,
    );

    /// Jacobian of the transformation from the reference to the current element
    pub fn jacobian(&self) -> Matrix3<f64> {
        let p = &self.points;
        Matrix3::from_fn(|i, j| p[j + 1][i] - p[0][i])
    }

    /// Metric for which the element is the unit equilateral tetrahedron, i.e.
    /// $`(J J^T)^{-1}`$ where $`J`$ maps the unit equilateral element to the current one.
    /// `None` for degenerate elements.
    pub fn implied_metric(&self) -> Option<AnisoMetric3d> {
        let j = self.jacobian() * Self::J_EQ;
        let m = j * j.transpose();
        m.try_inverse().map(AnisoMetric3d::from_mat)
    }

    fn signed_vol(p: &[Point<D>; 4]) -> f64 {
        let e1 = p[1] - p[0];
        let e2 = p[2] - p[0];
        let e3 = p[3] - p[0];
        e1.cross(&e2).dot(&e3) / 6.0
    }
}

impl<const D: usize, M: Metric<D>> GElem<D, M> for GTetrahedron<D, M> {
    type Face = GTriangle<D, M>;
    type BCoords = [f64; 4];
    const IDEAL_VOL: f64 = 1.0 / (6.0 * std::f64::consts::SQRT_2);

    fn n_verts(&self) -> Idx {
        4
    }

    fn vert(&self, i: Idx) -> Point<D> {
        self.points[i as usize]
    }

    fn from_verts<I: Iterator<Item = (Point<D>, M)>>(mut points_n_metrics: I) -> Self {
        debug_assert_eq!(D, 3);
        let p: [_; 4] = std::array::from_fn(|_| points_n_metrics.next().unwrap());
        Self {
            points: p.map(|x| x.0),
            metrics: p.map(|x| x.1),
        }
    }

    fn from_vert_and_face(point: &Point<D>, metric: &M, face: &Self::Face) -> Self {
        Self {
            points: [*point, face.points[0], face.points[1], face.points[2]],
            metrics: [*metric, face.metrics[0], face.metrics[1], face.metrics[2]],
        }
    }

    fn vol(&self) -> f64 {
        Self::signed_vol(&self.points)
    }

    fn quality(&self) -> f64 {
        let vol = self.vol();
        if vol < 0.0 {
            return -1.0;
        }
        let m = M::min_metric(self.metrics.iter());
        let (l, n) = sum_sq_lengths(m, &self.points);
        let l = l / n as f64;
        let vol = vol / m.vol() / Self::IDEAL_VOL;
        f64::powf(vol, 2. / 3.) / l
    }

    fn bcoords(&self, p: &Point<D>) -> Self::BCoords {
        let vol = self.vol();
        std::array::from_fn(|i| {
            let mut pts = self.points;
            pts[i] = *p;
            Self::signed_vol(&pts) / vol
        })
    }

    fn scaled_normal(&self) -> Point<D> {
        unreachable!();
    }

    fn gface(&self, i: Idx) -> Self::Face {
        let idx = match i {
            0 => [1, 2, 3],
            1 => [2, 0, 3],
            2 => [0, 1, 3],
            3 => [0, 2, 1],
            _ => unreachable!(),
        };
        GTriangle {
            points: idx.map(|j| self.points[j]),
            metrics: idx.map(|j| self.metrics[j]),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GTriangle<const D: usize, M: Metric<D>> {
    points: [Point<D>; 3],
    metrics: [M; 3],
}

impl<const D: usize, M: Metric<D>> GTriangle<D, M> {
    // Jacobian of the reference to equilateral transformation
    const J_EQ: Matrix2<f64> = Matrix2::new(1.0, -1. / SQRT_3, 0., 2. / SQRT_3);

    pub fn jacobian(&self) -> Matrix2<f64> {
        let p = &self.points;
        Matrix2::from_fn(|i, j| p[j + 1][i] - p[0][i])
    }

    /// Metric for which the element is the unit equilateral triangle (2d only)
    pub fn implied_metric(&self) -> Option<AnisoMetric2d> {
        let j = self.jacobian() * Self::J_EQ;
        let m = j * j.transpose();
        m.try_inverse().map(AnisoMetric2d::from_mat)
    }

    fn signed_area(p0: &Point<D>, p1: &Point<D>, p2: &Point<D>) -> f64 {
        let e1 = p1 - p0;
        let e2 = p2 - p0;
        if D == 2 {
            0.5 * (e1[0] * e2[1] - e1[1] * e2[0])
        } else {
            0.5 * e1.cross(&e2).norm()
        }
    }
}

impl<const D: usize, M: Metric<D>> GElem<D, M> for GTriangle<D, M> {
    type Face = GEdge<D, M>;
    type BCoords = [f64; 3];
    const IDEAL_VOL: f64 = SQRT_3 / 4.;

    fn n_verts(&self) -> Idx {
        3
    }

    fn vert(&self, i: Idx) -> Point<D> {
        self.points[i as usize]
    }

    fn from_verts<I: Iterator<Item = (Point<D>, M)>>(mut points_n_metrics: I) -> Self {
        let p: [_; 3] = std::array::from_fn(|_| points_n_metrics.next().unwrap());
        Self {
            points: p.map(|x| x.0),
            metrics: p.map(|x| x.1),
        }
    }

    fn from_vert_and_face(point: &Point<D>, metric: &M, face: &Self::Face) -> Self {
        Self {
            points: [*point, face.points[0], face.points[1]],
            metrics: [*metric, face.metrics[0], face.metrics[1]],
        }
    }

    /// Signed in 2d (< 0 if not properly oriented)
    fn vol(&self) -> f64 {
        let [p0, p1, p2] = &self.points;
        Self::signed_area(p0, p1, p2)
    }

    fn quality(&self) -> f64 {
        let m = M::min_metric(self.metrics.iter());
        let (l, n) = sum_sq_lengths(m, &self.points);
        let l = l / n as f64;
        let vol = self.vol() / m.vol() / Self::IDEAL_VOL;
        vol / l
    }

    fn bcoords(&self, p: &Point<D>) -> Self::BCoords {
        let [p0, p1, p2] = &self.points;
        if D == 2 {
            let vol = self.vol();
            [
                Self::signed_area(p, p1, p2) / vol,
                Self::signed_area(p0, p, p2) / vol,
                Self::signed_area(p0, p1, p) / vol,
            ]
        } else {
            let u = p1 - p0;
            let v = p2 - p0;
            let n = u.cross(&v);
            let w = p - p0;
            let nrm = n.norm_squared();
            let gamma = u.cross(&w).dot(&n) / nrm;
            let beta = w.cross(&v).dot(&n) / nrm;
            [1.0 - beta - gamma, beta, gamma]
        }
    }

    fn scaled_normal(&self) -> Point<D> {
        assert_eq!(D, 3);
        let e0 = self.points[1] - self.points[0];
        let e1 = self.points[2] - self.points[0];
        0.5 * e0.cross(&e1)
    }

    fn gface(&self, i: Idx) -> Self::Face {
        let idx = match i {
            0 => [1, 2],
            1 => [2, 0],
            2 => [0, 1],
            _ => unreachable!(),
        };
        GEdge {
            points: idx.map(|j| self.points[j]),
            metrics: idx.map(|j| self.metrics[j]),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GEdge<const D: usize, M: Metric<D>> {
    points: [Point<D>; 2],
    metrics: [M; 2],
}

impl<const D: usize, M: Metric<D>> GEdge<D, M> {
    /// Length in metric space
    pub fn length(&self) -> f64 {
        M::edge_length(
            &self.points[0],
            &self.metrics[0],
            &self.points[1],
            &self.metrics[1],
        )
    }
}

impl<const D: usize, M: Metric<D>> GElem<D, M> for GEdge<D, M> {
    type Face = GVertex<D, M>;
    type BCoords = [f64; 2];
    const IDEAL_VOL: f64 = 1.0;

    fn n_verts(&self) -> Idx {
        2
    }

    fn vert(&self, i: Idx) -> Point<D> {
        self.points[i as usize]
    }

    fn from_verts<I: Iterator<Item = (Point<D>, M)>>(mut points_n_metrics: I) -> Self {
        let p: [_; 2] = std::array::from_fn(|_| points_n_metrics.next().unwrap());
        Self {
            points: p.map(|x| x.0),
            metrics: p.map(|x| x.1),
        }
    }

    fn from_vert_and_face(point: &Point<D>, metric: &M, face: &Self::Face) -> Self {
        Self {
            points: [*point, face.points[0]],
            metrics: [*metric, face.metrics[0]],
        }
    }

    fn vol(&self) -> f64 {
        (self.points[1] - self.points[0]).norm()
    }

    fn quality(&self) -> f64 {
        1.0 / self.length()
    }

    fn bcoords(&self, p: &Point<D>) -> Self::BCoords {
        let e = self.points[1] - self.points[0];
        let t = (p - self.points[0]).dot(&e) / e.norm_squared();
        [1.0 - t, t]
    }

    fn scaled_normal(&self) -> Point<D> {
        assert_eq!(D, 2);
        let e0 = self.points[1] - self.points[0];
        let mut n = Point::<D>::zeros();
        n[0] = e0[1];
        n[1] = -e0[0];
        n
    }

    fn gface(&self, i: Idx) -> Self::Face {
        GVertex {
            points: [self.points[1 - i as usize]],
            metrics: [self.metrics[1 - i as usize]],
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GVertex<const D: usize, M: Metric<D>> {
    points: [Point<D>; 1],
    metrics: [M; 1],
}

impl<const D: usize, M: Metric<D>> GElem<D, M> for GVertex<D, M> {
    type Face = Self;
    type BCoords = [f64; 1];
    const IDEAL_VOL: f64 = 1.0;

    fn n_verts(&self) -> Idx {
        1
    }

    fn vert(&self, i: Idx) -> Point<D> {
        self.points[i as usize]
    }

    fn from_verts<I: Iterator<Item = (Point<D>, M)>>(mut points_n_metrics: I) -> Self {
        let (p, m) = points_n_metrics.next().unwrap();
        Self {
            points: [p],
            metrics: [m],
        }
    }

    fn from_vert_and_face(_point: &Point<D>, _metric: &M, _face: &Self::Face) -> Self {
        unreachable!();
    }

    fn vol(&self) -> f64 {
        1.0
    }

    fn quality(&self) -> f64 {
        1.0
    }

    fn bcoords(&self, _p: &Point<D>) -> Self::BCoords {
        [1.0]
    }

    fn scaled_normal(&self) -> Point<D> {
        unreachable!();
    }

    fn gface(&self, _i: Idx) -> Self::Face {
        unreachable!();
    }
}
