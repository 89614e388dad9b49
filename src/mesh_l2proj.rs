use crate::{
    geom_elems::GElem,
    mesh::{Point, SimplexMesh},
    mesh_ls::sym_off_diagonal,
    topo_elems::Elem,
    Error, Result,
};
use log::info;

impl<const D: usize, E: Elem> SimplexMesh<D, E> {
    /// Gradients over element `e` of the P1 interpolants of the `n_comp` vertex fields in
    /// `f`, from the outward scaled normals of its faces:
    /// ```math
    /// \nabla u_K = -\frac{1}{d |K|} \sum_i u_i \, |F_i| n_i
    /// ```
    /// where $`F_i`$ is the face opposite to vertex $`i`$
    fn elem_gradients(&self, e: E, f: &[f64], n_comp: usize) -> Vec<Point<D>> {
        let ge = self.gelem(e);
        let fac = -1.0 / (D as f64 * ge.vol());
        let normals: Vec<_> = (0..E::N_VERTS)
            .map(|i| ge.gface(i).scaled_normal())
            .collect();

        (0..n_comp)
            .map(|k| {
                fac * e
                    .iter()
                    .zip(normals.iter())
                    .map(|(&i_vert, n)| *n * f[n_comp * i_vert as usize + k])
                    .sum::<Point<D>>()
            })
            .collect()
    }

    /// L2 projection on the vertices of the element-wise gradients:
    /// ```math
    /// \nabla u_i = \frac{\sum_{K \ni i} |K| \nabla u_K}{\sum_{K \ni i} |K|}
    /// ```
    /// `n_comp * D` values per vertex, component-major. The volumes are required
    fn l2proj(&self, f: &[f64], n_comp: usize) -> Result<Vec<f64>> {
        if f.len() != n_comp * self.n_verts() as usize {
            return Err(Error::from("invalid vertex data size"));
        }
        let vert_vol = self.get_vertex_volumes()?;

        let m = n_comp * D;
        let mut res = vec![0.0; m * self.n_verts() as usize];
        for e in self.elems() {
            let vol = self.gelem(e).vol();
            let grads = self.elem_gradients(e, f, n_comp);
            for &i_vert in e.iter() {
                let start = m * i_vert as usize;
                res[start..start + m]
                    .iter_mut()
                    .zip(grads.iter().flat_map(|g| g.iter()))
                    .for_each(|(x, y)| *x += vol * y);
            }
        }

        // sum_{K \ni i} |K| = N_VERTS * vert_vol[i]
        let fac = 1.0 / f64::from(E::N_VERTS);
        for (vals, v) in res.chunks_mut(m).zip(vert_vol) {
            vals.iter_mut().for_each(|x| *x *= fac / v);
        }
        Ok(res)
    }

    /// Gradient of a vertex field (`D` values per vertex) as the L2 projection of the
    /// element-wise gradients
    pub fn gradient_l2proj(&self, f: &[f64]) -> Result<Vec<f64>> {
        info!("Compute the gradient using L2 projection");
        self.l2proj(f, 1)
    }

    /// Hessian from a vertex gradient field by a second L2 projection, symmetrized and
    /// stored with the same layout as the metrics.
    /// NB: this does not converge to the hessian near the boundaries
    pub fn hessian_l2proj(&self, gradf: &[f64]) -> Result<Vec<f64>> {
        info!("Compute the hessian using L2 projection");
        let jac = self.l2proj(gradf, D)?;

        let n = D * (D + 1) / 2;
        let mut res = Vec::with_capacity(n * self.n_verts() as usize);
        for h in jac.chunks(D * D) {
            res.extend((0..D).map(|i| h[D * i + i]));
            res.extend(
                sym_off_diagonal(D)
                    .iter()
                    .map(|&(i, j)| 0.5 * (h[D * i + j] + h[D * j + i])),
            );
        }
        Ok(res)
    }
}
