use crate::metric_reduction::{control_step, simultaneous_reduction};
use crate::{mesh::Point, min_max_iter, Error, Result};
use crate::{H_MAX, S_MAX, S_MIN, S_RATIO_MAX};
use nalgebra::allocator::Allocator;
use nalgebra::{Const, DefaultAllocator, SMatrix, SVector};
use std::array::IntoIter;
use std::fmt;
use std::fmt::Debug;
use std::fmt::Display;
use std::ops::Index;

/// Riemannian metric at a point in D dimensions, either isotropic (a size) or anisotropic
/// (a symmetric positive definite tensor)
pub trait Metric<const D: usize>:
    Debug + Clone + Copy + IntoIterator<Item = f64> + Default + Display + Send + Sync
{
    /// Number of components
    const N: usize;

    fn from_slice(m: &[f64]) -> Self;

    /// Fail if the metric is not positive definite, or if its sizes / anisotropy are
    /// outside of the allowed bounds
    fn check(&self) -> Result<()>;

    /// Length of vector `e` in metric space
    fn length(&self, e: &Point<D>) -> f64;

    /// Volume of the unit ball, $`\det(\mathcal M)^{-1/2}`$
    fn vol(&self) -> f64;

    /// Weighted interpolation of metrics; the result is a valid metric
    fn interpolate<'a, I: Iterator<Item = (f64, &'a Self)>>(weights_and_metrics: I) -> Self
    where
        Self: 'a;

    /// Characteristic sizes, sorted by increasing value
    fn sizes(&self) -> [f64; D];

    /// Scale the sizes by `s`
    fn scale(&mut self, s: f64);

    /// Scale the sizes by `s` and bound them by `[h_min, h_max]`
    fn scale_with_bounds(&mut self, s: f64, h_min: f64, h_max: f64);

    /// Largest metric that is smaller than both `self` and `other`, i.e. in every direction
    /// the most restrictive size is used
    #[must_use]
    fn intersect(&self, other: &Self) -> Self;

    /// Metric obtained at distance `e` from `self` with a size progression `beta`
    #[must_use]
    fn span(&self, e: &Point<D>, beta: f64) -> Self;

    fn differs_from(&self, other: &Self, tol: f64) -> bool;

    /// Bound the sizes to between `1/f` and `f` times those of `other` in the principal
    /// directions of `other`
    fn control_step(&mut self, other: &Self, f: f64);

    /// Length of edge `p0 -> p1` in metric space when the sizes vary geometrically
    /// along the edge, $`h(t) = h_0^{1-t} h_1^t`$:
    /// ```math
    /// l_\mathcal M(e) = \frac{l_0 - l_1}{\ln(l_0 / l_1)} = \sqrt{l_0 l_1}\,\frac{\sinh(x/2)}{x/2}, \quad x = \ln(l_0 / l_1)
    /// ```
    /// with $`l_i = \sqrt{e^T \mathcal M_i e}`$. The result does not depend on the edge
    /// orientation.
    fn edge_length(p0: &Point<D>, m0: &Self, p1: &Point<D>, m1: &Self) -> f64 {
        let e = p1 - p0;
        let (l0, l1) = (m0.length(&e), m1.length(&e));

        let x = f64::ln(l0 / l1);
        if x.abs() < 1e-3 {
            // sinh(y) / y = 1 + y^2 / 6 + O(y^4)
            f64::sqrt(l0 * l1) * (1.0 + x * x / 24.0)
        } else {
            (l0 - l1) / x
        }
    }

    /// Metric with the smallest volume
    fn min_metric<'a, I: Iterator<Item = &'a Self>>(mut metrics: I) -> &'a Self {
        let mut res = metrics.next().unwrap();
        let mut vol = res.vol();
        for m in metrics {
            let v = m.vol();
            if v < vol {
                res = m;
                vol = v;
            }
        }
        res
    }
}

/// Isotropic metric, stored as the target size `h`
#[derive(Clone, Copy, Debug)]
pub struct IsoMetric<const D: usize>(f64);

impl<const D: usize> IsoMetric<D> {
    #[must_use]
    pub const fn from(h: f64) -> Self {
        Self(h)
    }

    #[must_use]
    pub const fn h(&self) -> f64 {
        self.0
    }
}

impl<const D: usize> Default for IsoMetric<D> {
    fn default() -> Self {
        Self(H_MAX)
    }
}

impl<const D: usize> Metric<D> for IsoMetric<D> {
    const N: usize = 1;

    fn from_slice(m: &[f64]) -> Self {
        Self(m[0])
    }

    fn check(&self) -> Result<()> {
        if !self.0.is_finite() || self.0 <= 0.0 {
            return Err(Error::from(&format!("invalid size h = {}", self.0)));
        }
        Ok(())
    }

    /// $`||e||_2 / h`$
    fn length(&self, e: &Point<D>) -> f64 {
        e.norm() / self.0
    }

    /// $`h^d`$
    fn vol(&self) -> f64 {
        self.0.powi(D as i32)
    }

    /// Sizes are interpolated linearly
    fn interpolate<'a, I: Iterator<Item = (f64, &'a Self)>>(weights_and_metrics: I) -> Self {
        Self(weights_and_metrics.map(|(w, m)| w * m.0).sum())
    }

    fn sizes(&self) -> [f64; D] {
        [self.0; D]
    }

    fn scale(&mut self, s: f64) {
        self.0 *= s;
    }

    fn scale_with_bounds(&mut self, s: f64, h_min: f64, h_max: f64) {
        self.0 = (s * self.0).clamp(h_min, h_max);
    }

    fn intersect(&self, other: &Self) -> Self {
        Self(f64::min(self.0, other.0))
    }

    /// Linear size variation along `e` (F. Alauzet, "Size gradation control of
    /// anisotropic meshes", 2010)
    fn span(&self, e: &Point<D>, beta: f64) -> Self {
        let f = 1. + self.length(e) * f64::ln(beta);
        Self(self.0 * f)
    }

    fn differs_from(&self, other: &Self, tol: f64) -> bool {
        f64::abs(self.0 - other.0) > tol * self.0
    }

    fn control_step(&mut self, other: &Self, f: f64) {
        self.0 = self.0.clamp(other.0 / f, other.0 * f);
    }
}

impl<const D: usize> IntoIterator for IsoMetric<D> {
    type Item = f64;
    type IntoIter = IntoIter<f64, 1>;

    fn into_iter(self) -> Self::IntoIter {
        [self.0].into_iter()
    }
}

impl<const D: usize> Display for IsoMetric<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "h = {:?}", self.0)
    }
}

/// Anisotropic metric, stored as the upper part of the symmetric tensor together with its
/// volume
pub trait AnisoMetric<const D: usize>: Metric<D> + Index<usize, Output = f64>
where
    Const<D>: nalgebra::ToTypenum + nalgebra::DimSub<nalgebra::U1>,
    DefaultAllocator: Allocator<<Const<D> as nalgebra::DimSub<nalgebra::U1>>::Output>,
{
    const N: usize;

    fn slice_to_mat(m: &[f64]) -> SMatrix<f64, D, D>;

    fn from_mat_and_vol(mat: SMatrix<f64, D, D>, vol: f64) -> Self;

    fn as_mat(&self) -> SMatrix<f64, D, D>;

    fn vol_aniso(&self) -> f64;

    fn from_diagonal(s: &[f64]) -> Self;

    fn scale_aniso(&mut self, s: f64);

    /// Clip the eigenvalues to `[S_MIN, S_MAX]` and the anisotropy to `ANISO_MAX`
    fn bound_eigenvalues(eigs: &mut SVector<f64, D>) {
        eigs.iter_mut().for_each(|s| *s = s.clamp(S_MIN, S_MAX));
        let s_min = eigs.max() / S_RATIO_MAX;
        eigs.iter_mut().for_each(|s| *s = s.max(s_min));
    }

    /// Build the metric $`|M|`$ from a symmetric matrix, with bounded eigenvalues
    fn from_mat(mat: SMatrix<f64, D, D>) -> Self {
        let mut eig = mat.symmetric_eigen();
        eig.eigenvalues.iter_mut().for_each(|s| *s = s.abs());
        Self::bound_eigenvalues(&mut eig.eigenvalues);
        let vol = 1. / eig.eigenvalues.product().sqrt();
        Self::from_mat_and_vol(eig.recompose(), vol)
    }

    /// $`\mathcal M = h^{-2} I`$
    fn from_iso(m: &IsoMetric<D>) -> Self {
        let s = 1. / m.h().powi(2);
        Self::from_diagonal(&[s; D])
    }

    /// Eigen-decomposition, apply `f` to the eigenvalues and recompose
    fn map_eigenvalues<F: FnMut(f64) -> f64>(&self, mut f: F) -> Self {
        let mut eig = self.as_mat().symmetric_eigen();
        eig.eigenvalues.iter_mut().for_each(|s| *s = f(*s));
        Self::bound_eigenvalues(&mut eig.eigenvalues);
        let vol = 1. / eig.eigenvalues.product().sqrt();
        Self::from_mat_and_vol(eig.recompose(), vol)
    }

    fn is_diagonal(&self, tol: f64) -> bool {
        let diag = (0..D).map(|i| self[i].abs()).sum::<f64>();
        let off_diag = (D..<Self as AnisoMetric<D>>::N)
            .map(|i| self[i].abs())
            .sum::<f64>();
        off_diag < tol * diag
    }
}

impl<const D: usize, T: AnisoMetric<D>> Metric<D> for T
where
    Const<D>: nalgebra::ToTypenum + nalgebra::DimSub<nalgebra::U1>,
    DefaultAllocator: Allocator<<Const<D> as nalgebra::DimSub<nalgebra::U1>>::Output>,
{
    const N: usize = <Self as AnisoMetric<D>>::N;

    fn from_slice(m: &[f64]) -> Self {
        Self::from_mat(Self::slice_to_mat(m))
    }

    fn check(&self) -> Result<()> {
        let mat = self.as_mat();
        if mat.iter().any(|x| !x.is_finite()) {
            return Err(Error::from("non finite metric"));
        }
        let eig = mat.symmetric_eigen();
        let (s_min, s_max) = min_max_iter(eig.eigenvalues.iter().copied());

        let eps = 1e-8;
        if s_min <= (1.0 - eps) * S_MIN {
            return Err(Error::from(&format!("metric eigenvalue {s_min:.3e} < S_MIN")));
        }
        if s_max >= (1.0 + eps) * S_MAX {
            return Err(Error::from(&format!("metric eigenvalue {s_max:.3e} > S_MAX")));
        }
        if s_max / s_min >= (1.0 + eps) * S_RATIO_MAX {
            return Err(Error::from("metric anisotropy > ANISO_MAX"));
        }
        Ok(())
    }

    /// $`\sqrt{e^T \mathcal M e}`$
    fn length(&self, e: &Point<D>) -> f64 {
        (self.as_mat() * e).dot(e).sqrt()
    }

    fn vol(&self) -> f64 {
        self.vol_aniso()
    }

    /// Log-Euclidean interpolation
    /// ```math
    /// \mathcal M = \exp\left(\sum_i \alpha_i \ln(\mathcal M_i)\right)
    /// ```
    /// which is always positive definite
    fn interpolate<'a, I: Iterator<Item = (f64, &'a Self)>>(weights_and_metrics: I) -> Self
    where
        Self: 'a,
    {
        let mut log_mat = Self::slice_to_mat(&[0.0; 6]);
        for (w, m) in weights_and_metrics {
            let mut eig = m.as_mat().symmetric_eigen();
            eig.eigenvalues
                .iter_mut()
                .for_each(|s| *s = w * s.max(S_MIN).ln());
            log_mat += eig.recompose();
        }

        let mut eig = log_mat.symmetric_eigen();
        eig.eigenvalues.iter_mut().for_each(|s| *s = s.exp());
        Self::bound_eigenvalues(&mut eig.eigenvalues);
        let vol = 1. / eig.eigenvalues.product().sqrt();
        Self::from_mat_and_vol(eig.recompose(), vol)
    }

    /// $`\lambda_i^{-1/2}`$ for the eigenvalues $`\lambda_i`$
    fn sizes(&self) -> [f64; D] {
        let eig = self.as_mat().symmetric_eigen();
        let mut s: [f64; D] = std::array::from_fn(|i| 1. / eig.eigenvalues[i].max(S_MIN).sqrt());
        s.sort_by(f64::total_cmp);
        s
    }

    fn scale(&mut self, s: f64) {
        self.scale_aniso(s);
    }

    fn scale_with_bounds(&mut self, s: f64, h_min: f64, h_max: f64) {
        let f = 1. / (s * s);
        let s_min = 1. / (h_max * h_max);
        let s_max = 1. / (h_min * h_min);
        *self = self.map_eigenvalues(|x| (f * x).clamp(s_min, s_max));
    }

    /// Simultaneous reduction, with shortcuts for diagonal metrics
    fn intersect(&self, other: &Self) -> Self {
        let tol = 1e-8;
        if self.is_diagonal(tol) && other.is_diagonal(tol) {
            let s: [f64; D] = std::array::from_fn(|i| f64::max(self[i], other[i]));
            Self::from_diagonal(&s)
        } else {
            Self::from_mat(simultaneous_reduction(self.as_mat(), other.as_mat()))
        }
    }

    /// Physical-space gradation (F. Alauzet, "Size gradation control of anisotropic
    /// meshes", 2010): every size $`h_i`$ is increased to $`h_i + ||e|| \ln(\beta)`$
    fn span(&self, e: &Point<D>, beta: f64) -> Self {
        let nrm = e.norm();
        self.map_eigenvalues(|s| {
            let eta = 1.0 + f64::sqrt(s) * nrm * f64::ln(beta);
            s / (eta * eta)
        })
    }

    fn differs_from(&self, other: &Self, tol: f64) -> bool {
        self.into_iter()
            .zip(other.into_iter())
            .any(|(x, y)| f64::abs(x - y) > tol * f64::abs(x))
    }

    fn control_step(&mut self, other: &Self, f: f64) {
        if let Some(res) = control_step(other.as_mat(), self.as_mat(), f) {
            *self = Self::from_mat(res);
        }
    }
}

fn fmt_aniso<const D: usize, M: AnisoMetric<D>>(m: &M, f: &mut fmt::Formatter) -> fmt::Result
where
    Const<D>: nalgebra::ToTypenum + nalgebra::DimSub<nalgebra::U1>,
    DefaultAllocator: Allocator<<Const<D> as nalgebra::DimSub<nalgebra::U1>>::Output>,
{
    let mat = m.as_mat();
    writeln!(f, "M = {mat:?}")?;
    let eig = mat.symmetric_eigen();
    for i in 0..D {
        writeln!(
            f,
            "--> h = {}, {:?}",
            1. / eig.eigenvalues[i].sqrt(),
            eig.eigenvectors.column(i).transpose()
        )?;
    }
    writeln!(f, "vol = {}", m.vol())
}

/// Anisotropic metric in 2D; the tensor
/// ```math
/// \begin{bmatrix}
/// x_0 & x_2\\
/// x_2 & x_1\\
/// \end{bmatrix}
/// ```
/// is stored as $`(x_0, x_1, x_2)`$
#[derive(Clone, Copy, Debug)]
pub struct AnisoMetric2d {
    m: [f64; 3],
    v: f64,
}

impl AnisoMetric2d {
    /// Metric with sizes `|s0|` and `|s1|` along the orthogonal directions `s0` and `s1`
    #[must_use]
    pub fn from_sizes(s0: &Point<2>, s1: &Point<2>) -> Self {
        let (n0, n1) = (s0.norm(), s1.norm());
        let (u0, u1) = (s0 / n0, s1 / n1);
        debug_assert!(u0.dot(&u1).abs() < 1e-12);

        let p = SMatrix::<f64, 2, 2>::from_columns(&[u0, u1]);
        let d = SMatrix::<f64, 2, 2>::from_diagonal(&SVector::<f64, 2>::new(
            1. / (n0 * n0),
            1. / (n1 * n1),
        ));
        Self::from_mat(p * d * p.transpose())
    }
}

impl Default for AnisoMetric2d {
    fn default() -> Self {
        Self::from_diagonal(&[S_MIN, S_MIN])
    }
}

impl AnisoMetric<2> for AnisoMetric2d {
    const N: usize = 3;

    fn slice_to_mat(m: &[f64]) -> SMatrix<f64, 2, 2> {
        SMatrix::<f64, 2, 2>::new(m[0], m[2], m[2], m[1])
    }

    fn from_mat_and_vol(mat: SMatrix<f64, 2, 2>, vol: f64) -> Self {
        Self {
            m: [mat[(0, 0)], mat[(1, 1)], mat[(0, 1)]],
            v: vol,
        }
    }

    fn as_mat(&self) -> SMatrix<f64, 2, 2> {
        Self::slice_to_mat(&self.m)
    }

    fn vol_aniso(&self) -> f64 {
        self.v
    }

    fn from_diagonal(s: &[f64]) -> Self {
        Self {
            m: [s[0], s[1], 0.0],
            v: 1. / (s[0] * s[1]).sqrt(),
        }
    }

    fn scale_aniso(&mut self, s: f64) {
        self.m.iter_mut().for_each(|x| *x *= s);
        self.v /= s;
    }
}

impl IntoIterator for AnisoMetric2d {
    type Item = f64;
    type IntoIter = IntoIter<f64, 3>;

    fn into_iter(self) -> Self::IntoIter {
        self.m.into_iter()
    }
}

impl Index<usize> for AnisoMetric2d {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.m[index]
    }
}

impl Display for AnisoMetric2d {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_aniso(self, f)
    }
}

/// Anisotropic metric in 3D; the tensor
/// ```math
/// \begin{bmatrix}
/// x_0& x_3& x_5\\
/// x_3& x_1& x_4\\
/// x_5& x_4& x_2\\
/// \end{bmatrix}
/// ```
/// is stored as $`(x_0, \dots, x_5)`$
#[derive(Clone, Copy, Debug)]
pub struct AnisoMetric3d {
    m: [f64; 6],
    v: f64,
}

impl AnisoMetric3d {
    /// Metric with sizes `|s0|`, `|s1|` and `|s2|` along the orthogonal directions `s0`, `s1`
    /// and `s2`
    #[must_use]
    pub fn from_sizes(s0: &Point<3>, s1: &Point<3>, s2: &Point<3>) -> Self {
        let n = [s0.norm(), s1.norm(), s2.norm()];
        let u = [s0 / n[0], s1 / n[1], s2 / n[2]];
        debug_assert!(u[0].dot(&u[1]).abs() < 1e-12);
        debug_assert!(u[0].dot(&u[2]).abs() < 1e-12);
        debug_assert!(u[1].dot(&u[2]).abs() < 1e-12);

        let p = SMatrix::<f64, 3, 3>::from_columns(&u);
        let d = SMatrix::<f64, 3, 3>::from_diagonal(&SVector::<f64, 3>::from_fn(|i, _| {
            1. / (n[i] * n[i])
        }));
        Self::from_mat(p * d * p.transpose())
    }
}

impl Default for AnisoMetric3d {
    fn default() -> Self {
        Self::from_diagonal(&[S_MIN, S_MIN, S_MIN])
    }
}

impl AnisoMetric<3> for AnisoMetric3d {
    const N: usize = 6;

    fn slice_to_mat(m: &[f64]) -> SMatrix<f64, 3, 3> {
        SMatrix::<f64, 3, 3>::new(m[0], m[3], m[5], m[3], m[1], m[4], m[5], m[4], m[2])
    }

    fn from_mat_and_vol(mat: SMatrix<f64, 3, 3>, vol: f64) -> Self {
        Self {
            m: [
                mat[(0, 0)],
                mat[(1, 1)],
                mat[(2, 2)],
                mat[(0, 1)],
                mat[(1, 2)],
                mat[(0, 2)],
            ],
            v: vol,
        }
    }

    fn as_mat(&self) -> SMatrix<f64, 3, 3> {
        Self::slice_to_mat(&self.m)
    }

    fn vol_aniso(&self) -> f64 {
        self.v
    }

    fn from_diagonal(s: &[f64]) -> Self {
        Self {
            m: [s[0], s[1], s[2], 0.0, 0.0, 0.0],
            v: 1. / (s[0] * s[1] * s[2]).sqrt(),
        }
    }

    fn scale_aniso(&mut self, s: f64) {
        self.m.iter_mut().for_each(|x| *x *= s);
        self.v /= s.powf(1.5);
    }
}

impl IntoIterator for AnisoMetric3d {
    type Item = f64;
    type IntoIter = IntoIter<f64, 6>;

    fn into_iter(self) -> Self::IntoIter {
        self.m.into_iter()
    }
}

impl Index<usize> for AnisoMetric3d {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.m[index]
    }
}

impl Display for AnisoMetric3d {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_aniso(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::{AnisoMetric, AnisoMetric2d, AnisoMetric3d, IsoMetric, Metric};
    use crate::{mesh::Point, Result, S_RATIO_MAX};
    use nalgebra::SMatrix;

    #[test]
    fn test_aniso_2d() -> Result<()> {
        let m = AnisoMetric2d::from_sizes(&Point::<2>::new(1.0, 0.), &Point::<2>::new(0., 0.1));

        m.check()?;
        assert!(f64::abs(m.vol() - 0.1) < 1e-12);
        assert!(f64::abs(m.length(&Point::<2>::new(1.0, 0.0)) - 1.0) < 1e-12);
        assert!(f64::abs(m.length(&Point::<2>::new(0.0, 1.0)) - 10.) < 1e-12);
        assert!(f64::abs(m.length(&Point::<2>::new(1.0, 1.0)) - f64::sqrt(101.)) < 1e-12);

        let s = m.sizes();
        assert!(f64::abs(s[0] - 0.1) < 1e-12);
        assert!(f64::abs(s[1] - 1.0) < 1e-12);

        Ok(())
    }

    #[test]
    fn test_aniso_3d() -> Result<()> {
        let m = AnisoMetric3d::from_sizes(
            &Point::<3>::new(1.0, 0., 0.),
            &Point::<3>::new(0., 0.1, 0.),
            &Point::<3>::new(0., 0., 0.01),
        );

        m.check()?;
        assert!(f64::abs(m.vol() - 0.001) < 1e-12);
        assert!(f64::abs(m.length(&Point::<3>::new(0.0, 1.0, 0.)) - 10.) < 1e-12);
        assert!(f64::abs(m.length(&Point::<3>::new(0.0, 0.0, 1.0)) - 100.) < 1e-12);
        assert!(f64::abs(m.length(&Point::<3>::new(1.0, 1.0, 1.0)) - f64::sqrt(10101.)) < 1e-12);

        let s = m.sizes();
        assert!(f64::abs(s[0] - 0.01) < 1e-12);
        assert!(f64::abs(s[1] - 0.1) < 1e-12);
        assert!(f64::abs(s[2] - 1.) < 1e-12);

        Ok(())
    }

    #[test]
    fn test_from_slice() -> Result<()> {
        let m = AnisoMetric2d::from_slice(&[1., 1., 2.]);
        m.check()?;
        assert!(f64::abs(m.vol() - 1.0 / f64::sqrt(3.0)) < 1e-12);

        let m = AnisoMetric3d::from_slice(&[1., 3., 6., 2., 4., 3.]);
        m.check()?;
        assert!(f64::abs(m.vol() - 1.0) < 1e-12);

        Ok(())
    }

    #[test]
    fn test_bounds() -> Result<()> {
        let m = AnisoMetric2d::from_slice(&[1.0, 10.0 * S_RATIO_MAX, 0.0]);
        m.check()?;
        assert!(f64::abs(m[0] - 10.0) < 1e-12);

        let m = AnisoMetric3d::from_slice(&[1.0, 2.0, 10.0 * S_RATIO_MAX, 0.0, 0.0, 0.0]);
        m.check()?;
        assert!(f64::abs(m[0] - 10.0) < 1e-12);
        assert!(f64::abs(m[1] - 10.0) < 1e-12);

        Ok(())
    }

    #[test]
    fn test_check() {
        assert!(IsoMetric::<2>::from(-1.0).check().is_err());
        assert!(IsoMetric::<2>::from(f64::NAN).check().is_err());
        assert!(IsoMetric::<3>::from(0.1).check().is_ok());

        let m = AnisoMetric2d::from_diagonal(&[1.0, 1e-2 / S_RATIO_MAX]);
        assert!(m.check().is_err());
        let m = AnisoMetric2d::from_diagonal(&[1.0, -1.0]);
        assert!(m.check().is_err());
        let m = AnisoMetric3d::from_diagonal(&[1.0, 2.0, f64::NAN]);
        assert!(m.check().is_err());
    }

    #[test]
    fn test_from_iso() {
        let m = AnisoMetric3d::from_iso(&IsoMetric::<3>::from(0.1));
        assert!(f64::abs(m.vol() - 1e-3) < 1e-12);
        let e = Point::<3>::new_random();
        assert!(f64::abs(m.length(&e) - 10. * e.norm()) < 1e-10);
    }

    #[test]
    fn test_interpolate() {
        let m0 = AnisoMetric2d::from_diagonal(&[1.0, 100.0]);
        let m1 = AnisoMetric2d::from_diagonal(&[100.0, 1.0]);
        let m = AnisoMetric2d::interpolate([(0.5, &m0), (0.5, &m1)].into_iter());
        assert!(f64::abs(m[0] - 10.0) < 1e-10);
        assert!(f64::abs(m[1] - 10.0) < 1e-10);
        assert!(f64::abs(m[2]) < 1e-10);

        let m0 = IsoMetric::<2>::from(1.0);
        let m1 = IsoMetric::<2>::from(2.0);
        let m = IsoMetric::<2>::interpolate([(0.25, &m0), (0.75, &m1)].into_iter());
        assert!(f64::abs(m.h() - 1.75) < 1e-12);
    }

    #[test]
    fn test_edge_length() {
        let p0 = Point::<2>::new(0., 0.);
        let p1 = Point::<2>::new(1., 0.);
        let m0 = IsoMetric::<2>::from(0.1);
        let m1 = IsoMetric::<2>::from(0.1);
        assert!(f64::abs(IsoMetric::<2>::edge_length(&p0, &m0, &p1, &m1) - 10.0) < 1e-12);

        // h varies from 0.1 to 0.2: l = int_0^1 1 / (0.1 * 2^t) dt = 10 / (2 ln(2))
        let m1 = IsoMetric::<2>::from(0.2);
        let l = IsoMetric::<2>::edge_length(&p0, &m0, &p1, &m1);
        assert!(f64::abs(l - 5.0 / f64::ln(2.0)) < 1e-12);
        assert!(l < 10.0 && l > 5.0);

        let l_rev = IsoMetric::<2>::edge_length(&p1, &m1, &p0, &m0);
        assert!(f64::abs(l - l_rev) < 1e-12);

        // nearly constant sizes, on both sides of the series expansion
        for dh in [1e-5, -1e-5, 2e-3, -2e-3] {
            let m1 = IsoMetric::<2>::from(0.1 + dh);
            let l = IsoMetric::<2>::edge_length(&p0, &m0, &p1, &m1);
            let l_rev = IsoMetric::<2>::edge_length(&p1, &m1, &p0, &m0);
            let l_ref = (0.1 + dh - 0.1) / (0.1 * (0.1 + dh)) / f64::ln(1.0 + dh / 0.1);
            assert!(f64::abs(l - l_ref) < 1e-9);
            assert!(f64::abs(l - l_rev) < 1e-12);
        }
    }

    #[test]
    fn test_intersection_iso() {
        let eps = 1e-8;
        for _ in 0..100 {
            let h = Point::<2>::new_random();
            let m_a = IsoMetric::<2>::from(h[0]);
            let m_b = IsoMetric::<2>::from(h[1]);
            let m_c = m_a.intersect(&m_b);
            let v = Point::<2>::new_random().normalize();
            assert!(m_c.length(&v) > (1.0 - eps) * m_a.length(&v));
            assert!(m_c.length(&v) > (1.0 - eps) * m_b.length(&v));
        }
    }

    #[test]
    fn test_intersection_2d_aniso() {
        let eps = 1e-8;

        for _ in 0..100 {
            let r = SMatrix::<f64, 2, 2>::new_random();
            let m_a = AnisoMetric2d::from_mat(r.transpose() * r);
            let r = SMatrix::<f64, 2, 2>::new_random();
            let m_b = AnisoMetric2d::from_mat(r.transpose() * r);
            let m_c = m_a.intersect(&m_b);
            assert!(m_c.check().is_ok());

            for _ in 0..100 {
                let v = Point::<2>::new_random().normalize();
                assert!(m_c.length(&v) > (1.0 - eps) * m_a.length(&v));
                assert!(m_c.length(&v) > (1.0 - eps) * m_b.length(&v));
            }
        }
    }

    #[test]
    fn test_intersection_3d_aniso() {
        let eps = 1e-8;

        for _ in 0..100 {
            let r = SMatrix::<f64, 3, 3>::new_random();
            let m_a = AnisoMetric3d::from_mat(r.transpose() * r);
            let r = SMatrix::<f64, 3, 3>::new_random();
            let m_b = AnisoMetric3d::from_mat(r.transpose() * r);
            let m_c = m_a.intersect(&m_b);

            for _ in 0..100 {
                let v = Point::<3>::new_random().normalize();
                assert!(m_c.length(&v) > (1.0 - eps) * m_a.length(&v));
                assert!(m_c.length(&v) > (1.0 - eps) * m_b.length(&v));
            }
        }
    }

    #[test]
    fn test_span_iso() {
        let m = IsoMetric::<2>::from(0.1);
        let e = Point::<2>::new(0.0, 0.1);
        assert!(f64::abs(m.span(&e, 1.2).h() - 0.118) < 0.001);
        assert!(f64::abs(m.span(&e, 2.0).h() - 0.169) < 0.001);
    }

    #[test]
    fn test_span_2d_aniso() {
        let m = AnisoMetric2d::from_sizes(&Point::<2>::new(1.0, 0.), &Point::<2>::new(0., 0.1));

        for (e, beta, h) in [
            (Point::<2>::new(1.0, 0.), 1.2, 1.18),
            (Point::<2>::new(1.0, 0.), 2.0, 1.69),
            (Point::<2>::new(0.0, 0.1), 1.2, 1.18),
            (Point::<2>::new(0.0, 0.1), 2.0, 1.69),
            (Point::<2>::new(0.0, 0.2), 1.2, 0.5 * 1.36),
            (Point::<2>::new(0.0, 0.2), 2.0, 0.5 * 2.38),
        ] {
            let l = m.span(&e, beta).length(&e);
            assert!(f64::abs(1. / l - h) < 0.01);
        }
    }

    #[test]
    fn test_span_3d_aniso() {
        let m = AnisoMetric3d::from_sizes(
            &Point::<3>::new(1.0, 0.0, 0.0),
            &Point::<3>::new(0.0, 0.1, 0.0),
            &Point::<3>::new(0.0, 0.0, 0.01),
        );

        for (e, beta, h) in [
            (Point::<3>::new(1.0, 0.0, 0.0), 1.2, 1.18),
            (Point::<3>::new(0.0, 0.1, 0.0), 2.0, 1.69),
            (Point::<3>::new(0.0, 0.0, 0.01), 1.2, 1.18),
            (Point::<3>::new(0.0, 0.2, 0.0), 2.0, 0.5 * 2.38),
        ] {
            let l = m.span(&e, beta).length(&e);
            assert!(f64::abs(1. / l - h) < 0.01);
        }
    }

    #[test]
    fn test_control_step_iso() {
        let mut m0 = IsoMetric::<2>::from(1.0);
        m0.control_step(&IsoMetric::<2>::from(10.0), 2.0);
        assert!(f64::abs(m0.h() - 5.0) < 1e-12);

        let mut m0 = IsoMetric::<2>::from(1.0);
        m0.control_step(&IsoMetric::<2>::from(0.1), 2.0);
        assert!(f64::abs(m0.h() - 0.2) < 1e-12);

        let mut m0 = IsoMetric::<2>::from(1.0);
        m0.control_step(&IsoMetric::<2>::from(0.8), 2.0);
        assert!(f64::abs(m0.h() - 1.0) < 1e-12);
    }

    #[test]
    fn test_control_step_2d() {
        let ex = Point::<2>::new(1.0, 0.0);
        let ey = Point::<2>::new(0.0, 1.0);

        let mut m0 = AnisoMetric2d::from_sizes(&ex, &ey);
        let m1 = AnisoMetric2d::from_sizes(&(10.0 * ex), &(0.1 * ey));
        m0.control_step(&m1, 2.0);

        let s = m0.sizes();
        assert!(f64::abs(s[0] - 0.2) < 1e-12);
        assert!(f64::abs(s[1] - 5.0) < 1e-12);
    }

    #[test]
    fn test_control_step_3d() {
        let ex = Point::<3>::new(1.0, 0.0, 0.0);
        let ey = Point::<3>::new(0.0, 1.0, 0.0);
        let ez = Point::<3>::new(0.0, 0.0, 1.0);

        let mut m0 = AnisoMetric3d::from_sizes(&ex, &ey, &ez);
        let m1 = AnisoMetric3d::from_sizes(&(10.0 * ex), &(0.1 * ey), &(0.001 * ez));
        m0.control_step(&m1, 2.0);

        let s = m0.sizes();
        assert!(f64::abs(s[0] - 0.002) < 1e-12);
        assert!(f64::abs(s[1] - 0.2) < 1e-12);
        assert!(f64::abs(s[2] - 5.0) < 1e-12);
    }
}
