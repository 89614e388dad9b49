use crate::{
    mesh::{Point, SimplexMesh},
    min_max_iter,
    topo_elems::Elem,
    Error, Idx, Result,
};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Fits rejected when the ratio of the extreme diagonal entries of `R` is larger
const MAX_DIAG_RATIO: f64 = 1e8;

/// Sweeps used to fill the vertices where the fit failed
const MAX_FIX_ITER: usize = 3;

/// Off-diagonal entries of a symmetric tensor, in the order used to store metrics
pub const fn sym_off_diagonal(dim: usize) -> &'static [(usize, usize)] {
    match dim {
        2 => &[(0, 1)],
        3 => &[(0, 1), (1, 2), (0, 2)],
        _ => unreachable!(),
    }
}

#[derive(Clone, Copy)]
enum Fit {
    Linear,
    Quadratic,
}

impl Fit {
    const fn n_unknowns(self, dim: usize) -> usize {
        match self {
            Self::Linear => 1 + dim,
            Self::Quadratic => 1 + dim + dim * (dim + 1) / 2,
        }
    }
}

/// Weighted least squares fit of
/// ```math
/// f(p_0 + \delta) - f(p_0) \approx \alpha + g \cdot \delta + \frac{1}{2}\delta^T H \delta
/// ```
/// over the neighbors `others` of `p0`, with weights $`\|\delta\|^{-P}`$ (`P = weight_exp`).
/// An extra row pulls $`\alpha`$ towards 0 with the largest weight.
///
/// The unknowns are $`(\alpha, g, H)`$ with $`H`$ stored as a metric (diagonal first).
/// `None` is returned if there are not enough neighbors or if the system is too
/// ill-conditioned.
fn least_squares<const D: usize>(
    p0: &Point<D>,
    f0: f64,
    others: &[(Point<D>, f64)],
    fit: Fit,
    weight_exp: i32,
) -> Option<DVector<f64>> {
    let n = fit.n_unknowns(D);
    if others.len() < n {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(1 + others.len(), n);
    let mut b = DVector::<f64>::zeros(1 + others.len());
    let mut w_max = 0.0_f64;
    for (i, &(p, f)) in others.iter().enumerate() {
        let dp = p - p0;
        let w = if weight_exp > 0 {
            dp.norm().powi(-weight_exp)
        } else {
            1.0
        };
        w_max = w_max.max(w);

        let irow = i + 1;
        a[(irow, 0)] = w;
        for j in 0..D {
            a[(irow, 1 + j)] = w * dp[j];
        }
        if matches!(fit, Fit::Quadratic) {
            for j in 0..D {
                a[(irow, 1 + D + j)] = 0.5 * w * dp[j] * dp[j];
            }
            for (k, &(j0, j1)) in sym_off_diagonal(D).iter().enumerate() {
                a[(irow, 1 + 2 * D + k)] = w * dp[j0] * dp[j1];
            }
        }
        b[irow] = w * (f - f0);
    }
    a[(0, 0)] = w_max * std::f64::consts::SQRT_2;

    let qr = a.qr();
    let r = qr.r();
    let (d_min, d_max) = min_max_iter(r.diagonal().iter().map(|x| x.abs()));
    if d_max > MAX_DIAG_RATIO * d_min {
        return None;
    }
    r.solve_upper_triangular(&(qr.q().transpose() * b))
}

impl<const D: usize, E: Elem> SimplexMesh<D, E> {
    /// Least squares fits at every vertex. The vertex-to-vertex connectivity is required
    fn vertex_fits(
        &self,
        f: &[f64],
        fit: Fit,
        weight_exp: i32,
    ) -> Result<Vec<Option<DVector<f64>>>> {
        if f.len() != self.n_verts() as usize {
            return Err(Error::from("invalid vertex data size"));
        }
        let v2v = self.get_vertex_to_vertices()?;

        Ok((0..self.n_verts())
            .into_par_iter()
            .map(|i_vert| {
                let others: Vec<_> = v2v
                    .row(i_vert)
                    .iter()
                    .map(|&j| (self.vert(j), f[j as usize]))
                    .collect();
                least_squares(&self.vert(i_vert), f[i_vert as usize], &others, fit, weight_exp)
            })
            .collect())
    }

    /// Use the average over the valid neighbors where no fit could be computed
    fn fix_not_computed(&self, res: &mut [f64], failed: &mut [bool], m: usize) -> Result<()> {
        let v2v = self.get_vertex_to_vertices()?;
        let mut sum = vec![0.0; m];
        for _ in 0..MAX_FIX_ITER {
            if !failed.contains(&true) {
                return Ok(());
            }
            for i_vert in 0..failed.len() {
                if !failed[i_vert] {
                    continue;
                }
                sum.fill(0.0);
                let mut n = 0;
                for &j in v2v.row(i_vert as Idx) {
                    let j = j as usize;
                    if !failed[j] {
                        sum.iter_mut()
                            .zip(&res[m * j..m * (j + 1)])
                            .for_each(|(x, y)| *x += y);
                        n += 1;
                    }
                }
                if n > 0 {
                    let fac = 1.0 / f64::from(n);
                    res[m * i_vert..m * (i_vert + 1)]
                        .iter_mut()
                        .zip(&sum)
                        .for_each(|(x, y)| *x = fac * y);
                    failed[i_vert] = false;
                }
            }
        }
        if failed.contains(&true) {
            Err(Error::from("cannot compute the least squares fit everywhere"))
        } else {
            Ok(())
        }
    }

    /// Extract `m` unknowns starting at `first` from the fits
    fn fit_components(
        &self,
        fits: &[Option<DVector<f64>>],
        first: usize,
        m: usize,
    ) -> Result<Vec<f64>> {
        let mut res = vec![0.0; m * fits.len()];
        let mut failed = vec![false; fits.len()];
        for ((sol, vals), flg) in fits.iter().zip(res.chunks_mut(m)).zip(failed.iter_mut()) {
            match sol {
                Some(sol) => vals.copy_from_slice(&sol.as_slice()[first..first + m]),
                None => *flg = true,
            }
        }

        let n_failed = failed.iter().filter(|&&x| x).count();
        if n_failed > 0 {
            debug!("{n_failed} vertices without a valid fit, use the neighbor average");
            self.fix_not_computed(&mut res, &mut failed, m)?;
        }

        if res.iter().copied().any(f64::is_nan) {
            return Err(Error::from("NaN in the least squares fit"));
        }
        Ok(res)
    }

    /// Smooth a vertex field with a 1st order weighted least squares fit. The original
    /// value is kept where the fit fails.
    pub fn smooth(&self, f: &[f64], weight_exp: i32) -> Result<Vec<f64>> {
        info!("Smooth a field using 1st order least squares (weight = {weight_exp})");
        let fits = self.vertex_fits(f, Fit::Linear, weight_exp)?;

        let res: Vec<_> = fits
            .iter()
            .zip(f)
            .map(|(sol, &f0)| sol.as_ref().map_or(f0, |sol| f0 + sol[0]))
            .collect();
        if res.iter().copied().any(f64::is_nan) {
            return Err(Error::from("NaN in the least squares fit"));
        }
        Ok(res)
    }

    /// Gradient of a vertex field (`D` values per vertex) using a 1st order weighted
    /// least squares fit
    pub fn gradient(&self, f: &[f64], weight_exp: i32) -> Result<Vec<f64>> {
        info!("Compute the gradient using 1st order least squares (weight = {weight_exp})");
        let fits = self.vertex_fits(f, Fit::Linear, weight_exp)?;
        self.fit_components(&fits, 1, D)
    }

    /// Hessian of a vertex field using a 2nd order weighted least squares fit, stored
    /// with the same layout as the metrics: `[xx, yy, xy]` in 2d and
    /// `[xx, yy, zz, xy, yz, xz]` in 3d
    pub fn hessian(&self, f: &[f64], weight_exp: i32) -> Result<Vec<f64>> {
        info!("Compute the hessian using 2nd order least squares (weight = {weight_exp})");
        let fits = self.vertex_fits(f, Fit::Quadratic, weight_exp)?;
        self.fit_components(&fits, 1 + D, D * (D + 1) / 2)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        mesh::Point,
        test_meshes::{test_mesh_2d, test_mesh_3d},
        Result,
    };

    #[test]
    fn test_smooth_2d() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split().split();
        assert!(mesh.smooth(&vec![0.0; mesh.n_verts() as usize], 2).is_err());
        mesh.compute_vertex_to_vertices();

        let f: Vec<_> = mesh.verts().map(|p| p[0] + 2.0 * p[1]).collect();
        let res = mesh.smooth(&f, 2)?;
        for (a, b) in f.iter().zip(res.iter()) {
            assert!(f64::abs(a - b) < 1e-10);
        }

        let f: Vec<_> = mesh.verts().map(|p| p[0] * p[1]).collect();
        let res = mesh.smooth(&f, 2)?;
        for (a, b) in f.iter().zip(res.iter()) {
            assert!(f64::abs(a - b) < 1e-2);
        }

        assert!(mesh.smooth(&f[1..], 2).is_err());

        Ok(())
    }

    #[test]
    fn test_smooth_3d() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split().split();
        mesh.compute_vertex_to_vertices();

        let f: Vec<_> = mesh
            .verts()
            .map(|p| p[0] + 2.0 * p[1] + 3.0 * p[2])
            .collect();
        let res = mesh.smooth(&f, 2)?;
        for (a, b) in f.iter().zip(res.iter()) {
            assert!(f64::abs(a - b) < 1e-10);
        }

        Ok(())
    }

    #[test]
    fn test_gradient_2d_linear() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split().split().split();
        mesh.compute_vertex_to_vertices();

        let f: Vec<_> = mesh.verts().map(|p| p[0] + 2.0 * p[1]).collect();
        for weight_exp in [0, 1, 2] {
            let res = mesh.gradient(&f, weight_exp)?;
            for g in res.chunks(2) {
                assert!(f64::abs(g[0] - 1.) < 1e-10);
                assert!(f64::abs(g[1] - 2.) < 1e-10);
            }
        }

        Ok(())
    }

    fn run_gradient_2d(n: u32) -> Result<f64> {
        let mut mesh = test_mesh_2d();
        for _ in 0..n {
            mesh = mesh.split();
        }
        mesh.compute_vertex_to_vertices();
        mesh.compute_volumes();

        let f: Vec<_> = mesh.verts().map(|p| p[0] * p[1]).collect();
        let res = mesh.gradient(&f, 2)?;

        let v = mesh.get_vertex_volumes()?;
        let nrm = mesh
            .verts()
            .zip(res.chunks(2))
            .zip(v.iter())
            .map(|((p, g), w)| w * (f64::powi(g[0] - p[1], 2) + f64::powi(g[1] - p[0], 2)))
            .sum::<f64>();

        Ok(nrm.sqrt())
    }

    #[test]
    fn test_gradient_2d() -> Result<()> {
        let mut prev = f64::MAX;
        for n in 3..7 {
            let nrm = run_gradient_2d(n)?;
            assert!(nrm < 0.5 * prev);
            prev = nrm;
        }
        Ok(())
    }

    #[test]
    fn test_gradient_3d_linear() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split().split();
        mesh.compute_vertex_to_vertices();

        let f: Vec<_> = mesh
            .verts()
            .map(|p| p[0] + 2.0 * p[1] + 3.0 * p[2])
            .collect();
        let res = mesh.gradient(&f, 2)?;
        for g in res.chunks(3) {
            assert!(f64::abs(g[0] - 1.) < 1e-10);
            assert!(f64::abs(g[1] - 2.) < 1e-10);
            assert!(f64::abs(g[2] - 3.) < 1e-10);
        }

        Ok(())
    }

    fn f_2d(p: Point<2>) -> f64 {
        p[0] * p[0] + 2.0 * p[1] * p[1] + 3.0 * p[0] * p[1]
    }

    #[test]
    fn test_hessian_2d_quadratic() -> Result<()> {
        let mut mesh = test_mesh_2d().split().split();
        assert!(mesh.hessian(&vec![0.0; mesh.n_verts() as usize], 2).is_err());
        mesh.compute_vertex_to_vertices();

        let f: Vec<_> = mesh.verts().map(f_2d).collect();
        let res = mesh.hessian(&f, 2)?;
        for h in res.chunks(3) {
            assert!(f64::abs(h[0] - 2.) < 1e-10);
            assert!(f64::abs(h[1] - 4.) < 1e-10);
            assert!(f64::abs(h[2] - 3.) < 1e-10);
        }

        Ok(())
    }

    #[test]
    fn test_hessian_3d_quadratic() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split().split();
        mesh.compute_vertex_to_vertices();

        let f: Vec<_> = mesh
            .verts()
            .map(|p| {
                p[0] * p[0]
                    + 2.0 * p[1] * p[1]
                    + 3.0 * p[2] * p[2]
                    + 4.0 * p[0] * p[1]
                    + 5.0 * p[1] * p[2]
                    + 6.0 * p[0] * p[2]
            })
            .collect();
        let res = mesh.hessian(&f, 2)?;
        for h in res.chunks(6) {
            for (x, y) in h.iter().zip([2., 4., 6., 4., 5., 6.]) {
                assert!(f64::abs(x - y) < 1e-10);
            }
        }

        Ok(())
    }
}
