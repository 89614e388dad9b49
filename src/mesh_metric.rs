use crate::{
    geom_elems::GElem,
    mesh::SimplexMesh,
    metric::{AnisoMetric, AnisoMetric2d, AnisoMetric3d, Metric},
    topo_elems::{Elem, Tetrahedron, Triangle},
    Error, Idx, Result,
};
use log::{debug, info, warn};
use nalgebra::{allocator::Allocator, Const, DefaultAllocator, DimSub, ToTypenum, U1};
use rayon::prelude::*;

/// Default maximum ratio between the target and implied sizes
const DEFAULT_STEP: f64 = 4.0;

impl<const D: usize, E: Elem> SimplexMesh<D, E> {
    /// Minimum size, maximum size and maximum anisotropy of a metric field
    pub fn metric_info<M: Metric<D>>(&self, m: &[M]) -> (f64, f64, f64) {
        m.iter()
            .map(Metric::sizes)
            .fold((f64::MAX, 0.0, 0.0), |(h_min, h_max, aniso), s| {
                (
                    f64::min(h_min, s[0]),
                    f64::max(h_max, s[D - 1]),
                    f64::max(aniso, s[D - 1] / s[0]),
                )
            })
    }

    /// Convert a metric field defined at the elements to the vertices, using the
    /// volume-weighted interpolation of each metric type.
    /// The vertex-to-element connectivity and the volumes are required
    pub fn elem_data_to_vertex_data_metric<M: Metric<D>>(&self, m: &[M]) -> Result<Vec<M>> {
        debug!("Convert metric element data to vertex data");
        let v2e = self.get_vertex_to_elems()?;
        let elem_vol = self.get_elem_volumes()?;
        let vert_vol = self.get_vertex_volumes()?;
        if m.len() != self.n_elems() as usize {
            return Err(Error::from("invalid element metric size"));
        }

        let f = 1.0 / f64::from(E::N_VERTS);
        let res = vert_vol
            .iter()
            .enumerate()
            .map(|(i_vert, &v)| {
                let elems = v2e.row(i_vert as Idx);
                M::interpolate(
                    elems
                        .iter()
                        .map(|&i| (f * elem_vol[i as usize] / v, &m[i as usize])),
                )
            })
            .collect();
        Ok(res)
    }

    /// Convert a metric field defined at the vertices to the elements (equal weights)
    pub fn vertex_data_to_elem_data_metric<M: Metric<D>>(&self, m: &[M]) -> Result<Vec<M>> {
        debug!("Convert metric vertex data to element data");
        if m.len() != self.n_verts() as usize {
            return Err(Error::from("invalid vertex metric size"));
        }

        let f = 1.0 / f64::from(E::N_VERTS);
        Ok(self
            .elems()
            .map(|e| M::interpolate(e.iter().map(|&i| (f, &m[i as usize]))))
            .collect())
    }

    /// Number of elements required to fill the mesh with elements that are unit in metric
    /// space, where `sizes` holds the `D` characteristic sizes at every vertex, bounded by
    /// `[h_min, h_max]`
    /// ```math
    /// \mathcal C = \frac{1}{|K_{eq}|} \int \sqrt{\det(\mathcal M)} dx
    /// ```
    /// The vertex volumes are required
    pub fn complexity_from_sizes<M: Metric<D>>(
        &self,
        sizes: &[f64],
        h_min: f64,
        h_max: f64,
    ) -> Result<f64> {
        let vols = self.get_vertex_volumes()?;
        if sizes.len() != D * vols.len() {
            return Err(Error::from("invalid size field"));
        }
        let ideal_vol = <E::Geom<D, M> as GElem<D, M>>::IDEAL_VOL;

        Ok(vols
            .par_iter()
            .zip(sizes.par_chunks(D))
            .map(|(v, s)| {
                let vol: f64 = s.iter().map(|h| h.clamp(h_min, h_max)).product();
                v / (ideal_vol * vol)
            })
            .sum())
    }

    /// Complexity of a metric field, with sizes bounded by `[h_min, h_max]`
    pub fn complexity<M: Metric<D>>(&self, m: &[M], h_min: f64, h_max: f64) -> Result<f64> {
        let sizes: Vec<_> = m.par_iter().flat_map_iter(Metric::sizes).collect();
        self.complexity_from_sizes::<M>(&sizes, h_min, h_max)
    }

    /// Scale `m` by `alpha` with bounds, intersect with the fixed metric and limit the step
    /// with respect to the implied metric
    fn bounded_metric<M: Metric<D>>(
        m: Option<(f64, &M)>,
        h_min: f64,
        h_max: f64,
        m_fixed: Option<&M>,
        m_implied: Option<&M>,
        step: f64,
    ) -> M {
        let mut res = match (m, m_fixed) {
            (Some((alpha, m)), Some(m_fixed)) => {
                let mut res = *m;
                res.scale_with_bounds(alpha, h_min, h_max);
                res.intersect(m_fixed)
            }
            (Some((alpha, m)), None) => {
                let mut res = *m;
                res.scale_with_bounds(alpha, h_min, h_max);
                res
            }
            (None, Some(m_fixed)) => *m_fixed,
            (None, None) => M::default(),
        };
        if let Some(m_implied) = m_implied {
            res.control_step(m_implied, step);
        }
        res
    }

    /// Scaling factor `alpha` such that the complexity of `alpha * m`, with sizes bounded
    /// by `[h_min, h_max]`, is `n_elems` (within 5%); the sizes are scaled iteratively
    fn scale_factor<M: Metric<D>>(
        &self,
        m: &[M],
        h_min: f64,
        h_max: f64,
        n_elems: Idx,
        max_iter: Idx,
    ) -> Result<f64> {
        let target = f64::from(n_elems);
        let sizes: Vec<_> = m.iter().flat_map(Metric::sizes).collect();
        let mut scaled = sizes.clone();
        let mut scale = 1.0;
        for iter in 0..max_iter {
            scaled
                .iter_mut()
                .zip(sizes.iter())
                .for_each(|(x, &y)| *x = scale * y);
            // the bounds are ignored for the initial guess
            let c = if iter == 0 {
                self.complexity_from_sizes::<M>(&scaled, 0.0, f64::MAX)?
            } else {
                self.complexity_from_sizes::<M>(&scaled, h_min, h_max)?
            };
            debug!("Iteration {iter}: scale = {scale:.3e}, complexity = {c:.3e}");
            if f64::abs(c - target) < 0.05 * target {
                return Ok(scale);
            }
            scale *= f64::powf(c / target, 1. / f64::from(E::DIM));
        }
        Err(Error::from(&format!(
            "unable to scale the metric to {n_elems} elements (h_min = {h_min}, h_max = {h_max})"
        )))
    }

    /// Scale a metric field so that its complexity is `n_elems`:
    ///  - the sizes are bounded by `[h_min, h_max]`,
    ///  - the result is intersected with `fixed_m` if present,
    ///  - the sizes are limited to between `1/step` and `step` times the sizes of
    ///    `implied_m` if present.
    ///
    /// With constraints, the scaling factor is found by bisection. An error is returned if
    /// the constraints alone require more than `n_elems` elements or if no scaling is found
    /// in `max_iter` iterations. `m` is modified in place and the scaling factor is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn scale_metric<M: Metric<D>>(
        &self,
        m: &mut [M],
        h_min: f64,
        h_max: f64,
        n_elems: Idx,
        fixed_m: Option<&[M]>,
        implied_m: Option<&[M]>,
        step: Option<f64>,
        max_iter: Idx,
    ) -> Result<f64> {
        info!("Scale the metric: h_min = {h_min}, h_max = {h_max}, n_elems = {n_elems}");
        let n_verts = self.n_verts() as usize;
        if m.len() != n_verts
            || fixed_m.is_some_and(|x| x.len() != n_verts)
            || implied_m.is_some_and(|x| x.len() != n_verts)
        {
            return Err(Error::from("invalid metric size"));
        }

        let mut scale = self.scale_factor(m, h_min, h_max, n_elems, max_iter)?;

        if fixed_m.is_none() && implied_m.is_none() {
            m.iter_mut()
                .for_each(|x| x.scale_with_bounds(scale, h_min, h_max));
            return Ok(scale);
        }

        let step = step.unwrap_or(DEFAULT_STEP);
        let target = f64::from(n_elems);
        let fixed = |i: usize| fixed_m.map(|x| &x[i]);
        let implied = |i: usize| implied_m.map(|x| &x[i]);

        let constraint: Vec<M> = (0..n_verts)
            .map(|i| Self::bounded_metric(None, h_min, h_max, fixed(i), implied(i), step))
            .collect();
        let c = self.complexity(&constraint, h_min, h_max)?;
        debug!("Complexity of the constraints: {c:.3e}");
        if c > target {
            return Err(Error::from(&format!(
                "the complexity of the constraints is {c:.3e} > {n_elems}"
            )));
        }

        let scaled = |s: f64| -> Vec<M> {
            m.iter()
                .enumerate()
                .map(|(i, x)| {
                    Self::bounded_metric(Some((s, x)), h_min, h_max, fixed(i), implied(i), step)
                })
                .collect()
        };

        // bracket the target complexity
        let mut scale_high = 1.5 * scale;
        let mut scale_low = scale / 1.5;
        let mut bracketed = false;
        for _ in 0..max_iter {
            let c_high = self.complexity(&scaled(scale_high), h_min, h_max)?;
            let c_low = self.complexity(&scaled(scale_low), h_min, h_max)?;
            if c_high < target && c_low > target {
                bracketed = true;
                break;
            }
            if c_high >= target {
                scale_high *= 1.5;
            }
            if c_low <= target {
                scale_low /= 1.5;
            }
        }
        if !bracketed {
            return Err(Error::from("unable to scale the metric (bracketing)"));
        }

        // bisection
        let mut converged = false;
        for iter in 0..max_iter {
            scale = 0.5 * (scale_low + scale_high);
            let c = self.complexity(&scaled(scale), h_min, h_max)?;
            debug!("Bisection {iter}: scale = {scale:.3e}, complexity = {c:.3e}");
            if f64::abs(c - target) < 0.05 * target {
                converged = true;
                break;
            }
            if c < target {
                scale_high = scale;
            } else {
                scale_low = scale;
            }
        }
        if !converged {
            return Err(Error::from("unable to scale the metric (bisection)"));
        }

        let res = scaled(scale);
        m.copy_from_slice(&res);
        Ok(scale)
    }

    /// Replace the metric at every vertex by the average of the metrics at the vertex and
    /// its neighbors, ignoring the ones with the smallest and largest volumes.
    /// The vertex-to-vertex connectivity is required
    pub fn smooth_metric<M: Metric<D>>(&self, m: &[M]) -> Result<Vec<M>> {
        info!("Smooth the metric field");
        let v2v = self.get_vertex_to_vertices()?;
        if m.len() != self.n_verts() as usize {
            return Err(Error::from("invalid metric size"));
        }

        let mut ids = Vec::new();
        let res = (0..self.n_verts())
            .map(|i_vert| {
                ids.clear();
                ids.push(i_vert);
                ids.extend_from_slice(v2v.row(i_vert));

                let vol = |i: Idx| m[i as usize].vol();
                let (mut i_min, mut i_max) = (i_vert, i_vert);
                for &i in &ids {
                    if vol(i) < vol(i_min) {
                        i_min = i;
                    }
                    if vol(i) > vol(i_max) {
                        i_max = i;
                    }
                }
                if ids.len() > 2 && i_min != i_max {
                    ids.retain(|&i| i != i_min && i != i_max);
                }
                let w = 1.0 / ids.len() as f64;
                M::interpolate(ids.iter().map(|&i| (w, &m[i as usize])))
            })
            .collect();
        Ok(res)
    }

    /// Gradation along edge `(i0, i1)`, i.e. the size ratio per unit length in metric space
    pub fn edge_gradation<M: Metric<D>>(&self, m: &[M], i0: Idx, i1: Idx) -> f64 {
        let e = self.vert(i1) - self.vert(i0);
        let l0 = m[i0 as usize].length(&e);
        let l1 = m[i1 as usize].length(&e);
        let a = l0 / l1;
        if f64::abs(a - 1.0) < 1e-3 {
            1.0
        } else {
            // metric space length with a linear size variation
            let l = l0 * f64::ln(a) / (a - 1.0);
            f64::max(a, 1.0 / a).powf(1. / l).min(100.0)
        }
    }

    /// Maximum gradation and fraction of the edges with a gradation larger than `target`.
    /// The edges are required
    pub fn gradation<M: Metric<D>>(&self, m: &[M], target: f64) -> Result<(f64, f64)> {
        let edges = self.get_edges()?;
        let (c_max, n) = edges
            .iter()
            .map(|e| self.edge_gradation(m, e[0], e[1]))
            .fold((0.0, 0), |(c_max, n), c| {
                (f64::max(c_max, c), if c > target { n + 1 } else { n })
            });
        Ok((c_max, f64::from(n) / edges.len() as f64))
    }

    /// Limit the gradation of a metric field to `beta` (F. Alauzet, "Size gradation
    /// control of anisotropic meshes", 2010, with physical-space gradation): along every
    /// edge with a too large gradation, each end metric is intersected with the metric
    /// spanned from the other end. The edges are processed by decreasing gradation, and the
    /// process is repeated at most `n_iter` times.
    /// Returns the number of vertices whose metric was modified. The edges are required.
    pub fn apply_metric_gradation<M: Metric<D>>(
        &self,
        m: &mut [M],
        beta: f64,
        n_iter: Idx,
    ) -> Result<Idx> {
        info!("Apply the metric gradation: beta = {beta}, n_iter = {n_iter}");
        let edges = self.get_edges()?;
        if m.len() != self.n_verts() as usize {
            return Err(Error::from("invalid metric size"));
        }

        let mut modified = vec![false; m.len()];
        let mut n_fixed = 0;
        for iter in 0..n_iter {
            let grad: Vec<_> = edges
                .iter()
                .map(|e| self.edge_gradation(m, e[0], e[1]))
                .collect();
            let mut order: Vec<_> = (0..edges.len()).filter(|&i| grad[i] > beta).collect();
            order.sort_by(|&i, &j| grad[j].total_cmp(&grad[i]));

            n_fixed = 0;
            for i_edge in order {
                let [i0, i1] = edges[i_edge].map(|i| i as usize);
                let e = self.vert(i1 as Idx) - self.vert(i0 as Idx);
                let (m0, m1) = (m[i0], m[i1]);
                m[i1] = m1.intersect(&m0.span(&e, beta));
                m[i0] = m0.intersect(&m1.span(&e, beta));
                for (i, old) in [(i0, m0), (i1, m1)] {
                    if old.differs_from(&m[i], 1e-8) {
                        modified[i] = true;
                        n_fixed += 1;
                    }
                }
            }
            debug!("Iteration {iter}: {n_fixed} metrics modified");
            if n_fixed == 0 {
                break;
            }
        }

        if n_fixed > 0 {
            let (c_max, frac) = self.gradation(m, beta)?;
            warn!(
                "Gradation target not reached: max = {c_max:.2}, {:.2}% of the edges above {beta}",
                100.0 * frac
            );
        }

        Ok(modified.iter().filter(|&&x| x).count() as Idx)
    }

    /// Limit the target metric `m` so that, at every vertex, its sizes are between `1/step`
    /// and `step` times those of the implied metric `m_implied`. With `step = 1` the result
    /// is the implied metric, and it tends to `m` when `step` increases.
    pub fn control_step_metric<M: Metric<D>>(
        &self,
        m: &[M],
        m_implied: &[M],
        step: f64,
    ) -> Result<Vec<M>> {
        info!("Control the metric step: step = {step}");
        if m.len() != self.n_verts() as usize || m_implied.len() != m.len() {
            return Err(Error::from("invalid metric size"));
        }
        if step < 1.0 {
            return Err(Error::from(&format!("invalid step {step} < 1")));
        }

        Ok(m.par_iter()
            .zip(m_implied.par_iter())
            .map(|(m, m_i)| {
                let mut res = *m;
                res.control_step(m_i, step);
                res
            })
            .collect())
    }
}

/// Element-implied metric: the metric for which every element is unit equilateral
fn elem_implied_metrics<const D: usize, E: Elem, M: Metric<D>, F>(
    mesh: &SimplexMesh<D, E>,
    f: F,
) -> Result<Vec<M>>
where
    F: Fn(Idx) -> Option<M> + Send + Sync,
{
    let res: Option<Vec<M>> = (0..mesh.n_elems()).into_par_iter().map(f).collect();
    match res {
        Some(res) => Ok(res),
        None => Err(Error::from("degenerate element in the implied metric")),
    }
}

/// Metric that controls the interpolation error in $`L^p`$ norm of a field with hessian
/// $`H`$, up to a global scaling:
/// ```math
/// \mathcal M = \det(|H|)^{-1/(2p + d)} |H|
/// ```
/// where $`|H|`$ has the absolute (bounded) eigenvalues of $`H`$. `p = None` stands for the
/// $`L^\infty`$ norm, i.e. $`\mathcal M = |H|`$.
fn hessian_metrics<const D: usize, M: AnisoMetric<D>>(
    hessian: &[f64],
    p: Option<u32>,
) -> Vec<M>
where
    Const<D>: ToTypenum + DimSub<U1>,
    DefaultAllocator: Allocator<<Const<D> as DimSub<U1>>::Output>,
{
    hessian
        .par_chunks(<M as AnisoMetric<D>>::N)
        .map(|h| {
            let m = M::from_mat(M::slice_to_mat(h));
            p.map_or(m, |p| {
                // det(|H|) = vol^-2
                let fac = m.vol().powf(2.0 / (2.0 * f64::from(p) + D as f64));
                M::from_mat(m.as_mat() * fac)
            })
        })
        .collect()
}

impl SimplexMesh<2, Triangle> {
    /// Metric implied by the mesh at the vertices (log-Euclidean average of the element
    /// metrics). The vertex-to-element connectivity and the volumes are required
    pub fn implied_metric(&self) -> Result<Vec<AnisoMetric2d>> {
        info!("Compute the implied metric");
        let m = elem_implied_metrics(self, |i| self.gelem(self.elem(i)).implied_metric())?;
        self.elem_data_to_vertex_data_metric(&m)
    }

    /// Optimal metric for the $`L^p`$ norm from a vertex hessian field stored as
    /// `[xx, yy, xy]`. It is usually scaled afterwards with `scale_metric`
    pub fn hessian_to_metric(
        &self,
        hessian: &[f64],
        p: Option<u32>,
    ) -> Result<Vec<AnisoMetric2d>> {
        info!("Compute the metric from the hessian, p = {p:?}");
        if hessian.len() != 3 * self.n_verts() as usize {
            return Err(Error::from("invalid hessian size"));
        }
        Ok(hessian_metrics(hessian, p))
    }
}

impl SimplexMesh<3, Tetrahedron> {
    /// Metric implied by the mesh at the vertices (log-Euclidean average of the element
    /// metrics). The vertex-to-element connectivity and the volumes are required
    pub fn implied_metric(&self) -> Result<Vec<AnisoMetric3d>> {
        info!("Compute the implied metric");
        let m = elem_implied_metrics(self, |i| self.gelem(self.elem(i)).implied_metric())?;
        self.elem_data_to_vertex_data_metric(&m)
    }

    /// Optimal metric for the $`L^p`$ norm from a vertex hessian field stored as
    /// `[xx, yy, zz, xy, yz, xz]`
    pub fn hessian_to_metric(
        &self,
        hessian: &[f64],
        p: Option<u32>,
    ) -> Result<Vec<AnisoMetric3d>> {
        info!("Compute the metric from the hessian, p = {p:?}");
        if hessian.len() != 6 * self.n_verts() as usize {
            return Err(Error::from("invalid hessian size"));
        }
        Ok(hessian_metrics(hessian, p))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        max_iter,
        mesh::Point,
        metric::{AnisoMetric, AnisoMetric2d, AnisoMetric3d, IsoMetric, Metric},
        min_iter,
        test_meshes::{test_mesh_2d, test_mesh_3d},
        Idx, Result,
    };
    use nalgebra::Matrix3;

    #[test]
    fn test_complexity_2d() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split();
        let m = vec![IsoMetric::<2>::from(0.1); mesh.n_verts() as usize];
        assert!(mesh.complexity(&m, 0.0, f64::MAX).is_err());

        mesh.compute_volumes();
        let c = mesh.complexity(&m, 0.0, f64::MAX)?;
        assert!(f64::abs(c - 100. * 4. / f64::sqrt(3.0)) < 1e-6);

        let c = mesh.complexity(&m, 0.0, 0.05)?;
        assert!(f64::abs(c - 400. * 4. / f64::sqrt(3.0)) < 1e-6);

        let mut m = m;
        let scale = mesh.scale_metric(&mut m, 0.0, 0.05, 1000, None, None, None, 10)?;
        assert!(scale > 0.0);
        let c = mesh.complexity(&m, 0.0, 0.05)?;
        assert!(f64::abs(c - 1000.) < 100.);

        Ok(())
    }

    #[test]
    fn test_complexity_2d_aniso() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split();
        mesh.compute_volumes();

        let (hx, hy) = (0.5, 4.0);
        let m: Vec<_> = mesh
            .verts()
            .map(|_| AnisoMetric2d::from_sizes(&Point::<2>::new(hx, 0.), &Point::<2>::new(0., hy)))
            .collect();

        let c = mesh.complexity(&m, 0.0, f64::MAX)?;
        assert!(f64::abs(c - 4. / f64::sqrt(3.0) / (hx * hy)) < 1e-6);

        let c = mesh.complexity(&m, 1., 3.)?;
        assert!(f64::abs(c - 4. / f64::sqrt(3.0) / 3.0) < 1e-6);

        let (h_min, h_max, aniso) = mesh.metric_info(&m);
        assert!(f64::abs(h_min - hx) < 1e-12);
        assert!(f64::abs(h_max - hy) < 1e-12);
        assert!(f64::abs(aniso - 8.0) < 1e-10);

        Ok(())
    }

    #[test]
    fn test_complexity_3d() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split();
        mesh.compute_volumes();

        let mut m = vec![IsoMetric::<3>::from(0.1); mesh.n_verts() as usize];

        let c = mesh.complexity(&m, 0.0, f64::MAX)?;
        assert!(f64::abs(c - 1000. * 6. * f64::sqrt(2.0)) < 1e-6);

        let c = mesh.complexity(&m, 0.0, 0.05)?;
        assert!(f64::abs(c - 8000. * 6. * f64::sqrt(2.0)) < 1e-6);

        // h_max is too small
        assert!(mesh
            .scale_metric(&mut m, 0.0, 0.05, 1000, None, None, None, 10)
            .is_err());

        let n_target = (15.0 / f64::powi(0.05, 3)) as Idx;
        let scale = mesh.scale_metric(&mut m, 0.0, 0.05, n_target, None, None, None, 10)?;
        assert!(scale > 0.0);
        let c = mesh.complexity(&m, 0.0, 0.05)?;
        assert!(f64::abs(c - f64::from(n_target)) < 0.1 * f64::from(n_target));

        Ok(())
    }

    #[test]
    fn test_scale_metric_fixed() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split();
        mesh.compute_volumes();

        let mut m = vec![IsoMetric::<3>::from(0.1); mesh.n_verts() as usize];
        let fixed_m: Vec<_> = mesh
            .verts()
            .map(|p| IsoMetric::<3>::from(0.1 + p[0] + p[1]))
            .collect();

        let n_target = (15.0 / f64::powi(0.05, 3)) as Idx;
        let scale =
            mesh.scale_metric(&mut m, 0.0, 0.05, n_target, Some(&fixed_m), None, None, 10)?;
        assert!(scale > 0.0);
        let c = mesh.complexity(&m, 0.0, 0.05)?;
        assert!(f64::abs(c - f64::from(n_target)) < 0.1 * f64::from(n_target));
        for (a, b) in m.iter().zip(fixed_m.iter()) {
            assert!(a.h() < b.h() * (1.0 + 1e-12));
        }

        // the fixed metric alone is too fine
        let fine = vec![IsoMetric::<3>::from(0.01); mesh.n_verts() as usize];
        assert!(mesh
            .scale_metric(&mut m, 0.0, 0.05, n_target, Some(&fine), None, None, 10)
            .is_err());

        Ok(())
    }

    #[test]
    fn test_smooth_2d() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split();

        let mut m = vec![IsoMetric::<2>::from(0.1); mesh.n_verts() as usize];
        m[2] = IsoMetric::<2>::from(0.01);
        m[5] = IsoMetric::<2>::from(1.);

        assert!(mesh.smooth_metric(&m).is_err());
        mesh.compute_vertex_to_vertices();
        let m = mesh.smooth_metric(&m)?;

        let vmin = min_iter(m.iter().map(Metric::vol));
        let vmax = max_iter(m.iter().map(Metric::vol));
        assert!(f64::abs(vmin - 0.01) < 1e-6);
        assert!(f64::abs(vmax - 0.01) < 1e-6);

        Ok(())
    }

    #[test]
    fn test_smooth_3d_aniso() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split();
        mesh.compute_vertex_to_vertices();

        let sizes = |a: f64, b: f64, c: f64| {
            AnisoMetric3d::from_sizes(
                &Point::<3>::new(a, 0.0, 0.0),
                &Point::<3>::new(0.0, b, 0.0),
                &Point::<3>::new(0.0, 0.0, c),
            )
        };
        let mut m = vec![sizes(0.5, 4.0, 0.1); mesh.n_verts() as usize];
        m[2] = sizes(0.05, 4.0, 0.1);
        m[5] = sizes(0.5, 4.0, 1.0);

        let m = mesh.smooth_metric(&m)?;

        let vmin = min_iter(m.iter().map(Metric::vol));
        let vmax = max_iter(m.iter().map(Metric::vol));
        assert!(f64::abs(vmin - 0.2) < 1e-6);
        assert!(f64::abs(vmax - 0.2) < 1e-6);

        Ok(())
    }

    #[test]
    fn test_gradation_2d() -> Result<()> {
        let mut mesh = test_mesh_2d().split();
        mesh.compute_edges();

        let mut m = vec![IsoMetric::<2>::from(0.1); mesh.n_verts() as usize];
        m[0] = IsoMetric::<2>::from(0.0001);

        let beta = 1.2;
        let (c_max, frac) = mesh.gradation(&m, beta)?;
        assert!(c_max > beta);
        assert!(frac > 0.0);

        let n = mesh.apply_metric_gradation(&mut m, beta, 10)?;
        assert!(n > 0);

        let (c_max, frac) = mesh.gradation(&m, beta)?;
        assert!(c_max < 1.001 * beta);
        assert!(frac < 1e-12);

        for &[i0, i1] in mesh.get_edges()? {
            let (i0, i1) = (i0 as usize, i1 as usize);
            let e = mesh.vert(i1 as Idx) - mesh.vert(i0 as Idx);

            let r = 1.0 + m[i0].length(&e) * f64::ln(beta);
            assert!(m[i1].h() < 1.0001 * m[i0].h() * r);

            let r = 1.0 + m[i1].length(&e) * f64::ln(beta);
            assert!(m[i0].h() < 1.0001 * m[i1].h() * r);
        }

        // already graded
        assert_eq!(mesh.apply_metric_gradation(&mut m, beta, 10)?, 0);

        Ok(())
    }

    #[test]
    fn test_control_step_metric() -> Result<()> {
        let mesh = test_mesh_2d().split();
        let n = mesh.n_verts() as usize;
        let m = vec![AnisoMetric2d::from_iso(&IsoMetric::<2>::from(0.01)); n];
        let m_i = vec![AnisoMetric2d::from_iso(&IsoMetric::<2>::from(0.1)); n];

        let check = |res: &[AnisoMetric2d], h: f64| {
            for a in res {
                let s = a.sizes();
                assert!(f64::abs(s[0] - h) < 1e-10);
                assert!(f64::abs(s[1] - h) < 1e-10);
            }
        };

        check(&mesh.control_step_metric(&m, &m_i, 1.0)?, 0.1);
        check(&mesh.control_step_metric(&m, &m_i, 4.0)?, 0.025);
        check(&mesh.control_step_metric(&m, &m_i, 100.0)?, 0.01);

        assert!(mesh.control_step_metric(&m, &m_i, 0.5).is_err());
        assert!(mesh.control_step_metric(&m[1..], &m_i, 2.0).is_err());

        Ok(())
    }

    #[test]
    fn test_implied_metric_2d() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split();
        assert!(mesh.implied_metric().is_err());
        mesh.compute_vertex_to_elems();
        mesh.compute_volumes();

        // elements have the same volume, so the log-Euclidean average preserves the
        // metric volumes
        let m = mesh.implied_metric()?;
        let c = mesh.complexity(&m, 0.0, f64::MAX)?;
        assert!(f64::abs(c - f64::from(mesh.n_elems())) < 1e-6);

        Ok(())
    }

    #[test]
    fn test_implied_metric_3d() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split().split();

        let (h0, h1, h2) = (10., 0.1, 2.);
        let rot = Matrix3::new(
            1. / f64::sqrt(3.),
            1. / f64::sqrt(6.),
            -1. / f64::sqrt(2.),
            1. / f64::sqrt(3.),
            1. / f64::sqrt(6.),
            1. / f64::sqrt(2.),
            1. / f64::sqrt(3.),
            -2. / f64::sqrt(6.),
            0.,
        );
        mesh.mut_verts().for_each(|p| {
            p[0] *= h0;
            p[1] *= h1;
            p[2] *= h2;
            *p = rot * *p;
        });
        mesh.compute_vertex_to_elems();
        mesh.compute_volumes();

        for m in mesh.implied_metric()? {
            let s = m.sizes();
            assert!(s[0] > 0.33 * h1 / 8. && s[0] < 3. * h1 / 8.);
            assert!(s[1] > 0.33 * h2 / 8. && s[1] < 3. * h2 / 8.);
            assert!(s[2] > 0.33 * h0 / 8. && s[2] < 3. * h0 / 8.);
        }

        Ok(())
    }

    #[test]
    fn test_hessian_to_metric_2d() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split();
        mesh.compute_vertex_to_vertices();

        // f = x^2 - 4 y^2, |H| = diag(2, 8)
        let f: Vec<_> = mesh.verts().map(|p| p[0] * p[0] - 4.0 * p[1] * p[1]).collect();
        let hessian = mesh.hessian(&f, 2)?;
        assert!(mesh.hessian_to_metric(&hessian[3..], None).is_err());

        for m in mesh.hessian_to_metric(&hessian, None)? {
            assert!(f64::abs(m[0] - 2.0) < 1e-8);
            assert!(f64::abs(m[1] - 8.0) < 1e-8);
            assert!(f64::abs(m[2]) < 1e-8);
        }

        // det(|H|)^(-1/(2p+2)) = 16^(-1/6)
        let fac = f64::powf(16.0, -1.0 / 6.0);
        for m in mesh.hessian_to_metric(&hessian, Some(2))? {
            assert!(f64::abs(m[0] - 2.0 * fac) < 1e-8);
            assert!(f64::abs(m[1] - 8.0 * fac) < 1e-8);
            assert!(f64::abs(m[2]) < 1e-8);
        }

        Ok(())
    }

    #[test]
    fn test_hessian_to_metric_3d() -> Result<()> {
        let mesh = test_mesh_3d();
        let n = mesh.n_verts() as usize;

        // eigenvalues 1, 2 and 4 in a rotated frame
        let rot = Matrix3::new(
            1. / f64::sqrt(2.),
            -1. / f64::sqrt(2.),
            0.,
            1. / f64::sqrt(2.),
            1. / f64::sqrt(2.),
            0.,
            0.,
            0.,
            1.,
        );
        let h = rot * Matrix3::from_diagonal(&Point::<3>::new(1.0, 2.0, -4.0)) * rot.transpose();
        let h = [h[(0, 0)], h[(1, 1)], h[(2, 2)], h[(0, 1)], h[(1, 2)], h[(0, 2)]];
        let hessian: Vec<_> = (0..n).flat_map(|_| h).collect();

        let metrics = mesh.hessian_to_metric(&hessian, Some(1))?;
        assert_eq!(metrics.len(), n);

        // det(|H|)^(-1/(2p+3)) = 8^(-1/5)
        let fac = f64::powf(8.0, -1.0 / 5.0);
        for m in metrics {
            let s = m.sizes();
            for (x, y) in s.iter().zip([0.5, 1.0 / f64::sqrt(2.0), 1.0]) {
                assert!(f64::abs(x - y / f64::sqrt(fac)) < 1e-8);
            }
        }

        Ok(())
    }
}
