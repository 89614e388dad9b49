use crate::{
    mesh::{Point, SimplexMesh},
    metric::Metric,
    topo_elems::Elem,
    Error, Idx, Result, Tag,
};
use log::debug;
use minimeshb::{reader::MeshbReader, writer::MeshbWriter};

/// Ordering of the components of a symmetric tensor in the .sol(b) files:
/// `m[i] = sol[order[i]]`. Scalar and vector fields are stored as is.
const fn sol_order(dim: usize, n_comp: usize) -> Option<&'static [usize]> {
    match (dim, n_comp) {
        (_, 1) => Some(&[0]),
        (2, 2) => Some(&[0, 1]),
        (2, 3) => Some(&[0, 2, 1]),
        (3, 3) => Some(&[0, 1, 2]),
        (3, 6) => Some(&[0, 3, 1, 5, 4, 2]),
        _ => None,
    }
}

/// Inverse of `sol_order`
const fn sol_inv_order(dim: usize, n_comp: usize) -> Option<&'static [usize]> {
    match (dim, n_comp) {
        (_, 1) => Some(&[0]),
        (2, 2) => Some(&[0, 1]),
        (2, 3) => Some(&[0, 2, 1]),
        (3, 3) => Some(&[0, 1, 2]),
        (3, 6) => Some(&[0, 2, 5, 1, 4, 3]),
        _ => None,
    }
}

fn write_sol_n<const D: usize, const N: usize>(
    arr: &[f64],
    order: &[usize],
    file_name: &str,
) -> Result<()> {
    let mut writer = MeshbWriter::new(file_name, 2, D as u8)?;
    writer.write_solution(arr.chunks(N).map(|x| {
        let mut res = [0.0; N];
        for (r, &j) in res.iter_mut().zip(order) {
            *r = x[j];
        }
        res
    }))?;
    writer.close();
    Ok(())
}

fn read_sol_n<const N: usize>(mut reader: MeshbReader, order: &[usize]) -> Result<Vec<f64>> {
    let sol = reader.read_solution::<N>()?;
    Ok(sol
        .flat_map(|x| {
            let mut res = [0.0; N];
            for (r, &j) in res.iter_mut().zip(order) {
                *r = x[j];
            }
            res
        })
        .collect())
}

impl<const D: usize, E: Elem> SimplexMesh<D, E> {
    /// Export the mesh to a .mesh (ascii) or .meshb (binary) file
    pub fn write_meshb(&self, file_name: &str) -> Result<()> {
        debug!("Write {file_name}");
        let mut writer = MeshbWriter::new(file_name, 2, D as u8)?;

        writer.write_vertices(self.verts().map(Into::into), (0..self.n_verts()).map(|_| 1))?;

        match E::N_VERTS {
            3 => {
                writer.write_triangles(
                    self.elems()
                        .map(|e| [e[0].into(), e[1].into(), e[2].into()]),
                    self.etags().map(Into::into),
                )?;
                writer.write_edges(
                    self.faces().map(|f| [f[0].into(), f[1].into()]),
                    self.ftags().map(Into::into),
                )?;
            }
            4 => {
                writer.write_tetrahedra(
                    self.elems()
                        .map(|e| [e[0].into(), e[1].into(), e[2].into(), e[3].into()]),
                    self.etags().map(Into::into),
                )?;
                writer.write_triangles(
                    self.faces()
                        .map(|f| [f[0].into(), f[1].into(), f[2].into()]),
                    self.ftags().map(Into::into),
                )?;
            }
            _ => {
                return Err(Error::from(&format!(
                    "cannot write {} meshes",
                    E::NAME
                )))
            }
        }
        writer.close();

        Ok(())
    }

    /// Import a mesh from a .mesh(b) file
    pub fn read_meshb(file_name: &str) -> Result<Self> {
        debug!("Read {file_name}");
        let mut reader = MeshbReader::new(file_name)?;
        if reader.dimension() != D as u8 {
            return Err(Error::from(&format!(
                "{file_name}: invalid dimension {} (expected {D})",
                reader.dimension()
            )));
        }

        let verts: Vec<_> = reader
            .read_vertices::<D>()?
            .map(|(v, _)| Point::<D>::from_iterator(v.iter().copied()))
            .collect();

        let (elems, etags, faces, ftags) = match E::N_VERTS {
            3 => {
                let (elems, etags): (Vec<E>, Vec<Tag>) = reader
                    .read_triangles()?
                    .map(|(e, t)| (E::from_iter(e.iter().map(|&i| i as Idx)), t as Tag))
                    .unzip();
                let (faces, ftags): (Vec<E::Face>, Vec<Tag>) = reader
                    .read_edges()?
                    .map(|(f, t)| (E::Face::from_iter(f.iter().map(|&i| i as Idx)), t as Tag))
                    .unzip();
                (elems, etags, faces, ftags)
            }
            4 => {
                let (elems, etags): (Vec<E>, Vec<Tag>) = reader
                    .read_tetrahedra()?
                    .map(|(e, t)| (E::from_iter(e.iter().map(|&i| i as Idx)), t as Tag))
                    .unzip();
                let (faces, ftags): (Vec<E::Face>, Vec<Tag>) = reader
                    .read_triangles()?
                    .map(|(f, t)| (E::Face::from_iter(f.iter().map(|&i| i as Idx)), t as Tag))
                    .unzip();
                (elems, etags, faces, ftags)
            }
            _ => {
                return Err(Error::from(&format!(
                    "cannot read {} meshes",
                    E::NAME
                )))
            }
        };

        Ok(Self::new(verts, elems, etags, faces, ftags))
    }

    /// Export a vertex field with `arr.len() / n_verts` components per vertex to a
    /// .sol(b) file. Symmetric tensors are reordered to the file convention
    pub fn write_solb(&self, arr: &[f64], file_name: &str) -> Result<()> {
        debug!("Write {file_name}");
        let n_verts = self.n_verts() as usize;
        let n_comp = arr.len() / n_verts;
        if n_comp * n_verts != arr.len() {
            return Err(Error::from(&format!(
                "invalid field size {} for {n_verts} vertices",
                arr.len()
            )));
        }
        let order = sol_order(D, n_comp).ok_or_else(|| {
            Error::from(&format!("{n_comp} components not supported in {D}D"))
        })?;
        match n_comp {
            1 => write_sol_n::<D, 1>(arr, order, file_name),
            2 => write_sol_n::<D, 2>(arr, order, file_name),
            3 => write_sol_n::<D, 3>(arr, order, file_name),
            _ => write_sol_n::<D, 6>(arr, order, file_name),
        }
    }

    /// Import a vertex field from a .sol(b) file; the number of components is also
    /// returned
    pub fn read_solb(file_name: &str) -> Result<(Vec<f64>, usize)> {
        debug!("Read {file_name}");
        let mut reader = MeshbReader::new(file_name)?;
        if reader.dimension() != D as u8 {
            return Err(Error::from(&format!(
                "{file_name}: invalid dimension {} (expected {D})",
                reader.dimension()
            )));
        }
        let n_comp = reader.get_solution_size()?;
        let order = sol_inv_order(D, n_comp).ok_or_else(|| {
            Error::from(&format!("{n_comp} components not supported in {D}D"))
        })?;

        let res = match n_comp {
            1 => read_sol_n::<1>(reader, order)?,
            2 => read_sol_n::<2>(reader, order)?,
            3 => read_sol_n::<3>(reader, order)?,
            _ => read_sol_n::<6>(reader, order)?,
        };

        Ok((res, n_comp))
    }

    /// Export a metric field to a .sol(b) file
    pub fn write_metric<M: Metric<D>>(&self, m: &[M], file_name: &str) -> Result<()> {
        let arr: Vec<f64> = m.iter().copied().flatten().collect();
        self.write_solb(&arr, file_name)
    }

    /// Import a metric field from a .sol(b) file, and check it
    pub fn read_metric<M: Metric<D>>(file_name: &str) -> Result<Vec<M>> {
        let (arr, n_comp) = Self::read_solb(file_name)?;
        if n_comp != M::N {
            return Err(Error::from(&format!(
                "{file_name}: {n_comp} components per vertex, expected {}",
                M::N
            )));
        }
        let res: Vec<M> = arr.chunks(n_comp).map(M::from_slice).collect();
        for m in &res {
            m.check()?;
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        mesh::{Point, SimplexMesh},
        metric::{AnisoMetric2d, AnisoMetric3d, IsoMetric, Metric},
        test_meshes::{test_mesh_2d, test_mesh_3d},
        topo_elems::{Tetrahedron, Triangle},
        Result,
    };
    use tempfile::TempDir;

    #[test]
    fn test_2d() -> Result<()> {
        let dir = TempDir::new()?;
        let mesh = test_mesh_2d().split();

        for ext in ["mesh", "meshb"] {
            let fname = dir.path().join(format!("mesh.{ext}"));
            let fname = fname.to_str().unwrap();
            mesh.write_meshb(fname)?;

            let mesh2 = SimplexMesh::<2, Triangle>::read_meshb(fname)?;
            assert_eq!(mesh2.n_verts(), 9);
            assert_eq!(mesh2.n_faces(), 8);
            assert_eq!(mesh2.n_elems(), 8);
            for (p0, p1) in mesh.verts().zip(mesh2.verts()) {
                assert!((p0 - p1).norm() < 1e-12);
            }
            for (e0, e1) in mesh.elems().zip(mesh2.elems()) {
                assert_eq!(e0, e1);
            }
            assert!(mesh.etags().eq(mesh2.etags()));
            assert!(mesh.ftags().eq(mesh2.ftags()));
        }

        // wrong dimension
        let fname = dir.path().join("mesh.meshb");
        assert!(SimplexMesh::<3, Tetrahedron>::read_meshb(fname.to_str().unwrap()).is_err());

        Ok(())
    }

    #[test]
    fn test_3d() -> Result<()> {
        let dir = TempDir::new()?;
        let mesh = test_mesh_3d().split();

        for ext in ["mesh", "meshb"] {
            let fname = dir.path().join(format!("mesh.{ext}"));
            let fname = fname.to_str().unwrap();
            mesh.write_meshb(fname)?;

            let mesh2 = SimplexMesh::<3, Tetrahedron>::read_meshb(fname)?;
            assert_eq!(mesh2.n_verts(), 26);
            assert_eq!(mesh2.n_faces(), 48);
            assert_eq!(mesh2.n_elems(), 40);
            assert!(f64::abs(mesh2.vol() - 1.0) < 1e-12);
        }

        Ok(())
    }

    #[test]
    fn test_metric_2d() -> Result<()> {
        let dir = TempDir::new()?;
        let mesh = test_mesh_2d().split();

        let m = AnisoMetric2d::from_sizes(&Point::<2>::new(0.5, 0.1), &Point::<2>::new(-0.002, 0.01));
        let m = vec![m; mesh.n_verts() as usize];

        for ext in ["sol", "solb"] {
            let fname = dir.path().join(format!("metric.{ext}"));
            let fname = fname.to_str().unwrap();
            mesh.write_metric(&m, fname)?;

            let (arr, n) = SimplexMesh::<2, Triangle>::read_solb(fname)?;
            assert_eq!(n, 3);
            assert_eq!(arr.len(), 3 * m.len());

            let m2 = SimplexMesh::<2, Triangle>::read_metric::<AnisoMetric2d>(fname)?;
            for (x, y) in m.iter().copied().flatten().zip(m2.iter().copied().flatten()) {
                assert!(f64::abs(x - y) < 1e-10 * f64::abs(x).max(1.0));
            }

            // the number of components does not match
            assert!(SimplexMesh::<2, Triangle>::read_metric::<IsoMetric<2>>(fname).is_err());
        }

        Ok(())
    }

    #[test]
    fn test_metric_3d() -> Result<()> {
        let dir = TempDir::new()?;
        let mesh = test_mesh_3d().split();

        let m: Vec<_> = (0..mesh.n_verts())
            .map(|i| {
                let s = 1.0 + f64::from(i) / 10.0;
                AnisoMetric3d::from_sizes(
                    &Point::<3>::new(0.5 * s, 0., 0.),
                    &Point::<3>::new(0., 0.01, 0.02),
                    &Point::<3>::new(0., -0.2, 0.1),
                )
            })
            .collect();

        let fname = dir.path().join("metric.solb");
        let fname = fname.to_str().unwrap();
        mesh.write_metric(&m, fname)?;
        let m2 = SimplexMesh::<3, Tetrahedron>::read_metric::<AnisoMetric3d>(fname)?;
        assert_eq!(m2.len(), m.len());
        for (a, b) in m.iter().copied().zip(m2.iter().copied()) {
            for (x, y) in a.into_iter().zip(b) {
                assert!(f64::abs(x - y) < 1e-10 * f64::abs(x).max(1.0));
            }
        }

        // scalar field
        let h: Vec<f64> = mesh.verts().map(|p| p[0] + 2.0 * p[2]).collect();
        mesh.write_solb(&h, fname)?;
        let (h2, n) = SimplexMesh::<3, Tetrahedron>::read_solb(fname)?;
        assert_eq!(n, 1);
        for (x, y) in h.iter().zip(h2.iter()) {
            assert!(f64::abs(x - y) < 1e-12);
        }

        assert!(mesh.write_solb(&h[1..], fname).is_err());

        Ok(())
    }
}
