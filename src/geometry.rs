use crate::{
    geom_elems::{closest_point, GElem},
    mesh::{Point, SimplexMesh},
    metric::IsoMetric,
    topo_elems::{get_face_to_elem, Elem},
    topology::Topology,
    Dim, Error, Result, Tag, TopoTag,
};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::f64::consts::PI;

/// Representation of a D-dimensional geometry
pub trait Geometry<const D: usize> {
    /// Check that the geometry is consistent with a Topology
    fn check(&self, topo: &Topology) -> Result<()>;

    /// Project a vertex, associated with a given `TopoTag`, onto the geometry.
    /// The distance between the original vertex and its projection is returned
    fn project(&self, pt: &mut Point<D>, tag: &TopoTag) -> Result<f64>;

    /// Angle (in degrees) between a vector `n` and the normal of the geometry at the
    /// projection of `pt`
    fn angle(&self, pt: &Point<D>, n: &Point<D>, tag: &TopoTag) -> f64;

    /// Maximum angle between the normals of the boundary faces of a mesh and the geometry
    fn max_normal_angle<E: Elem>(&self, mesh: &SimplexMesh<D, E>) -> f64
    where
        Self: Sized,
    {
        mesh.faces()
            .zip(mesh.ftags())
            .map(|(f, tag)| {
                let gf = mesh.gface(f);
                self.angle(&gf.center(), &gf.normal(), &(D as Dim - 1, tag))
            })
            .fold(0.0, f64::max)
    }
}

/// Angle in degrees between the directions of two unit vectors (interfaces are not
/// oriented)
fn angle_deg<const D: usize>(n0: &Point<D>, n1: &Point<D>) -> f64 {
    f64::acos(n0.dot(n1).abs().min(1.0)) * 180. / PI
}

/// No geometric model
pub struct NoGeometry<const D: usize>();

impl<const D: usize> Geometry<D> for NoGeometry<D> {
    fn check(&self, _topo: &Topology) -> Result<()> {
        Ok(())
    }

    fn project(&self, _pt: &mut Point<D>, tag: &TopoTag) -> Result<f64> {
        if tag.0 >= D as Dim {
            return Err(Error::from(&format!("cannot project on {tag:?}")));
        }
        Ok(0.)
    }

    fn angle(&self, _pt: &Point<D>, _n: &Point<D>, _tag: &TopoTag) -> f64 {
        0.
    }
}

/// Piecewise linear representation of a geometry, built from the boundary of a mesh:
/// the boundary faces grouped by tag and the boundary ridges (edges in 3d, corners in 2d)
/// where faces with different tags meet
pub struct LinearGeometry<const D: usize, F: Elem> {
    verts: Vec<Point<D>>,
    faces: FxHashMap<Tag, Vec<F>>,
    ridges: FxHashMap<Tag, Vec<F::Face>>,
}

impl<const D: usize, F: Elem> LinearGeometry<D, F> {
    /// Create a `LinearGeometry` from the boundary faces and the interfaces between
    /// regions with different tags of a mesh. The topology is required
    pub fn new<E: Elem<Face = F>>(mesh: &SimplexMesh<D, E>) -> Result<Self> {
        debug!("Build a linear geometry from the mesh boundary");
        let topo = mesh.get_topology()?;
        let (face_dim, ridge_dim) = (D as Dim - 1, D as Dim - 2);

        let tagged: FxHashMap<F, (F, Tag)> = mesh
            .faces()
            .zip(mesh.ftags())
            .map(|(f, t)| (f.sorted(), (f, t)))
            .collect();
        let etags: Vec<_> = mesh.etags().collect();

        let mut faces: FxHashMap<Tag, Vec<F>> = FxHashMap::default();
        for (f, elems) in get_face_to_elem(mesh.elems()) {
            let parents: FxHashSet<Tag> = elems.iter().map(|&i| etags[i as usize]).collect();
            let (face, tag) = if let Some(&x) = tagged.get(&f) {
                x
            } else if elems.len() == 1 || parents.len() > 1 {
                let node = topo
                    .get_from_parents_iter(face_dim, parents.iter().copied())
                    .ok_or_else(|| Error::from(&format!("untagged face {f:?}")))?;
                (f, node.tag.1)
            } else {
                continue;
            };
            faces.entry(tag).or_default().push(face);
        }

        let mut ridge_tags: FxHashMap<F::Face, FxHashSet<Tag>> = FxHashMap::default();
        for (&tag, fs) in &faces {
            for f in fs {
                for i in 0..F::N_FACES {
                    ridge_tags.entry(f.face(i).sorted()).or_default().insert(tag);
                }
            }
        }

        let mut ridges: FxHashMap<Tag, Vec<F::Face>> = FxHashMap::default();
        for (r, tags) in ridge_tags {
            if tags.len() < 2 {
                continue;
            }
            let node = topo
                .get_from_parents_iter(ridge_dim, tags.iter().copied())
                .ok_or_else(|| Error::from(&format!("no entity of dim {ridge_dim} for {tags:?}")))?;
            ridges.entry(node.tag.1).or_default().push(r);
        }

        Ok(Self {
            verts: mesh.verts().collect(),
            faces,
            ridges,
        })
    }

    fn gelem<G: Elem>(&self, e: G) -> G::Geom<D, IsoMetric<D>> {
        let m = IsoMetric::<D>::from(1.0);
        G::Geom::from_verts(e.iter().map(|&i| (self.verts[i as usize], m)))
    }

    /// Closest point on a set of elements, with its distance and the element
    fn closest<G: Elem>(&self, elems: &[G], pt: &Point<D>) -> Option<(f64, Point<D>, G)> {
        elems
            .iter()
            .map(|&e| {
                let p = closest_point(&self.gelem(e), pt);
                ((p - pt).norm(), p, e)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}

impl<const D: usize, F: Elem> Geometry<D> for LinearGeometry<D, F> {
    fn check(&self, topo: &Topology) -> Result<()> {
        let dim = D as Dim;
        for (d, tags) in [
            (dim - 1, self.faces.keys().copied().collect::<Vec<_>>()),
            (dim - 2, self.ridges.keys().copied().collect::<Vec<_>>()),
        ] {
            for tag in tags {
                if topo.get((d, tag)).is_none() {
                    return Err(Error::from(&format!(
                        "LinearGeometry: tag {:?} not found in the topology",
                        (d, tag)
                    )));
                }
            }
        }
        if self.faces.len() != topo.ntags(dim - 1) {
            return Err(Error::from(&format!(
                "LinearGeometry: invalid # of tags (geometry: {}, topology: {})",
                self.faces.len(),
                topo.ntags(dim - 1)
            )));
        }
        Ok(())
    }

    fn project(&self, pt: &mut Point<D>, tag: &TopoTag) -> Result<f64> {
        let dim = D as Dim;
        let res = if tag.0 == dim - 1 {
            self.faces
                .get(&tag.1)
                .and_then(|f| self.closest(f, pt))
                .map(|(d, p, _)| (d, p))
        } else if tag.0 == dim - 2 {
            self.ridges
                .get(&tag.1)
                .and_then(|r| self.closest(r, pt))
                .map(|(d, p, _)| (d, p))
        } else if tag.0 >= 0 && tag.0 < dim - 2 {
            // corners in 3d
            return Ok(0.);
        } else {
            None
        };

        match res {
            Some((d, p)) => {
                *pt = p;
                Ok(d)
            }
            None => Err(Error::from(&format!("unable to project on {tag:?}"))),
        }
    }

    fn angle(&self, pt: &Point<D>, n: &Point<D>, tag: &TopoTag) -> f64 {
        if tag.0 != D as Dim - 1 {
            return 0.0;
        }
        self.faces
            .get(&tag.1)
            .and_then(|f| self.closest(f, pt))
            .map_or(0.0, |(_, _, f)| angle_deg(n, &self.gelem(f).normal()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Geometry, LinearGeometry, NoGeometry};
    use crate::{
        mesh::Point,
        test_meshes::{test_mesh_2d, test_mesh_3d},
        Result,
    };

    #[test]
    fn test_no_geometry() -> Result<()> {
        let geom = NoGeometry::<2>();
        let mut p = Point::<2>::new(0.3, 0.2);
        assert!(f64::abs(geom.project(&mut p, &(1, 1))?) < 1e-12);
        assert!((p - Point::<2>::new(0.3, 0.2)).norm() < 1e-12);
        assert!(geom.project(&mut p, &(2, 1)).is_err());
        Ok(())
    }

    #[test]
    fn test_linear_2d() -> Result<()> {
        let mut mesh = test_mesh_2d().split();
        mesh.compute_topology()?;
        let geom = LinearGeometry::new(&mesh)?;
        geom.check(mesh.get_topology()?)?;

        // edge y = 0 has tag 1
        let mut p = Point::<2>::new(0.25, -0.5);
        let d = geom.project(&mut p, &(1, 1))?;
        assert!(f64::abs(d - 0.5) < 1e-12);
        assert!((p - Point::<2>::new(0.25, 0.)).norm() < 1e-12);

        // corner (1, 0) between tags 1 and 2
        let tag = mesh.get_topology()?.get_from_parents(0, &[1, 2]).unwrap().tag;
        let mut p = Point::<2>::new(0.9, 0.2);
        geom.project(&mut p, &tag)?;
        assert!((p - Point::<2>::new(1., 0.)).norm() < 1e-12);

        assert!(geom.project(&mut p, &(1, 12)).is_err());
        assert!(geom.max_normal_angle(&mesh) < 1e-6);

        Ok(())
    }

    #[test]
    fn test_linear_3d() -> Result<()> {
        let mut mesh = test_mesh_3d().split();
        mesh.add_boundary_faces()?;
        mesh.compute_topology()?;
        let geom = LinearGeometry::new(&mesh)?;
        geom.check(mesh.get_topology()?)?;

        // face x = 1 has tag 5
        let mut p = Point::<3>::new(2., 0.5, 0.5);
        let d = geom.project(&mut p, &(2, 5))?;
        assert!(f64::abs(d - 1.) < 1e-12);
        assert!((p - Point::<3>::new(1., 0.5, 0.5)).norm() < 1e-12);

        // face y = 1 has tag 4
        let mut p = Point::<3>::new(0.5, 0.75, 0.5);
        let d = geom.project(&mut p, &(2, 4))?;
        assert!(f64::abs(d - 0.25) < 1e-12);
        assert!((p - Point::<3>::new(0.5, 1., 0.5)).norm() < 1e-12);

        // edge x = 1, y = 1
        let tag = mesh.get_topology()?.get_from_parents(1, &[4, 5]).unwrap().tag;
        let mut p = Point::<3>::new(0.8, 0.9, 0.3);
        geom.project(&mut p, &tag)?;
        assert!((p - Point::<3>::new(1., 1., 0.3)).norm() < 1e-12);

        assert!(geom.max_normal_angle(&mesh) < 1e-6);

        Ok(())
    }
}
