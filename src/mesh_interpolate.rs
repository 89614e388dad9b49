use crate::{
    geom_elems::GElem,
    graph::CSRGraph,
    mesh::{Point, SimplexMesh},
    min_iter,
    topo_elems::Elem,
    Error, Idx, Result,
};
use kdtree::{distance::squared_euclidean, KdTree};
use log::{debug, info};
use rustc_hash::FxHashSet;

/// Barycentric coordinates below `-BCOORDS_EPS` are considered outside of the element
const BCOORDS_EPS: f64 = 1e-10;

/// Nearest vertex lookup based on a kd-tree
pub struct PointIndex<const D: usize> {
    tree: KdTree<f64, Idx, [f64; D]>,
}

impl<const D: usize> PointIndex<D> {
    pub fn new<E: Elem>(mesh: &SimplexMesh<D, E>) -> Result<Self> {
        debug!("Build a kd-tree with {} vertices", mesh.n_verts());
        let mut tree = KdTree::new(D);
        for (i, p) in mesh.verts().enumerate() {
            tree.add(p.into(), i as Idx)?;
        }
        Ok(Self { tree })
    }

    pub fn nearest_vertex(&self, p: &Point<D>) -> Result<Idx> {
        let res = self.tree.nearest(p.as_slice(), 1, &squared_euclidean)?;
        match res.first() {
            Some(&(_, &i)) => Ok(i),
            None => Err(Error::from("empty point index")),
        }
    }
}

impl<const D: usize, E: Elem> SimplexMesh<D, E> {
    fn n_comp(&self, f: &[f64]) -> Result<usize> {
        let n_verts = self.n_verts() as usize;
        if n_verts == 0 || f.len() % n_verts != 0 {
            return Err(Error::from("invalid vertex data size"));
        }
        Ok(f.len() / n_verts)
    }

    /// Element of `elems` where the smallest barycentric coordinate of `p` is the largest
    fn best_elem<I: Iterator<Item = Idx>>(
        &self,
        elems: I,
        p: &Point<D>,
    ) -> Option<(E, Vec<f64>)> {
        elems
            .map(|i_elem| {
                let e = self.elem(i_elem);
                let x = self.gelem(e).bcoords(p).as_ref().to_vec();
                (min_iter(x.iter().copied()), e, x)
            })
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, e, x)| (e, x))
    }

    /// Locate `p` in the elements around `i_vert`, then in the elements around their
    /// vertices
    fn locate(&self, v2e: &CSRGraph, i_vert: Idx, p: &Point<D>) -> Option<(E, Vec<f64>)> {
        let ring = v2e.row(i_vert);
        let best = self.best_elem(ring.iter().copied(), p)?;
        if min_iter(best.1.iter().copied()) > -BCOORDS_EPS {
            return Some(best);
        }

        let ring2: FxHashSet<Idx> = ring
            .iter()
            .flat_map(|&i_elem| self.elem(i_elem).into_iter())
            .flat_map(|j| v2e.row(j).iter().copied())
            .collect();
        self.best_elem(ring2.into_iter(), p)
    }

    /// Linear interpolation of a vertex field of `self` (one or more components per
    /// vertex) at the vertices of `other`. The vertex-to-element connectivity is
    /// required.
    ///
    /// The vertices of `other` that are outside of `self` get the value at the closest
    /// point of the element found (negative barycentric coordinates are clipped). If
    /// `tol` is given, it is an error for a barycentric coordinate to be below `-tol`.
    pub fn interpolate_linear(
        &self,
        index: &PointIndex<D>,
        other: &Self,
        f: &[f64],
        tol: Option<f64>,
    ) -> Result<Vec<f64>> {
        info!(
            "Linear interpolation from {} to {} vertices",
            self.n_verts(),
            other.n_verts()
        );
        let n_comp = self.n_comp(f)?;
        let v2e = self.get_vertex_to_elems()?;

        let mut res = Vec::with_capacity(n_comp * other.n_verts() as usize);
        let mut n_outside = 0;
        for p in other.verts() {
            let i_vert = index.nearest_vertex(&p)?;
            let Some((e, mut x)) = self.locate(v2e, i_vert, &p) else {
                return Err(Error::from("isolated vertex in interpolate_linear"));
            };

            let x_min = min_iter(x.iter().copied());
            if x_min < -BCOORDS_EPS {
                if tol.is_some_and(|tol| x_min < -tol) {
                    return Err(Error::from(&format!(
                        "point {:?} is outside of the mesh",
                        p.as_slice()
                    )));
                }
                n_outside += 1;
            }
            if x_min < 0.0 {
                x.iter_mut().for_each(|w| *w = w.max(0.0));
                let s = x.iter().sum::<f64>();
                x.iter_mut().for_each(|w| *w /= s);
            }

            for j in 0..n_comp {
                res.push(
                    e.iter()
                        .zip(x.iter())
                        .map(|(&i, w)| w * f[n_comp * i as usize + j])
                        .sum(),
                );
            }
        }
        if n_outside > 0 {
            debug!("{n_outside} vertices outside of the mesh");
        }

        Ok(res)
    }

    /// Interpolation of a vertex field of `self` at the vertices of `other` using the
    /// value at the nearest vertex
    pub fn interpolate_nearest(
        &self,
        index: &PointIndex<D>,
        other: &Self,
        f: &[f64],
    ) -> Result<Vec<f64>> {
        info!(
            "Nearest vertex interpolation from {} to {} vertices",
            self.n_verts(),
            other.n_verts()
        );
        let n_comp = self.n_comp(f)?;

        let mut res = Vec::with_capacity(n_comp * other.n_verts() as usize);
        for p in other.verts() {
            let i = index.nearest_vertex(&p)? as usize;
            res.extend_from_slice(&f[n_comp * i..n_comp * (i + 1)]);
        }
        Ok(res)
    }
}
