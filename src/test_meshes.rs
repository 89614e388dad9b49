use crate::{
    geometry::Geometry,
    mesh::{Point, SimplexMesh},
    topo_elems::{Elem, Tetrahedron, Triangle},
    topology::Topology,
    Dim, Error, Idx, Result, Tag, TopoTag,
};

/// Boundary of a quadrilateral `0-1-2-3`
const QUAD_BDY: [[Idx; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];

fn build<const D: usize, const N: usize, const M: usize, E: Elem>(
    coords: &[[f64; D]],
    elems: &[[Idx; N]],
    etags: &[Tag],
    faces: &[[Idx; M]],
    ftags: &[Tag],
) -> SimplexMesh<D, E> {
    SimplexMesh::new(
        coords.iter().map(|&c| Point::<D>::from(c)).collect(),
        elems.iter().map(|e| E::from_slice(e)).collect(),
        etags.to_vec(),
        faces.iter().map(|f| E::Face::from_slice(f)).collect(),
        ftags.to_vec(),
    )
}

/// Unit square split along its diagonal, one element tag and one face tag per side
#[must_use]
pub fn test_mesh_2d() -> SimplexMesh<2, Triangle> {
    build(
        &[[0., 0.], [1., 0.], [1., 1.], [0., 1.]],
        &[[0, 1, 2], [0, 2, 3]],
        &[1, 2],
        &QUAD_BDY,
        &[1, 2, 3, 4],
    )
}

/// Two flat triangles sharing the edge `1-3`
#[must_use]
pub fn test_mesh_2d_two_tris() -> SimplexMesh<2, Triangle> {
    build(
        &[[0., 0.], [1., 0.5], [0., 1.], [-1., 0.5]],
        &[[0, 1, 3], [3, 1, 2]],
        &[1, 1],
        &QUAD_BDY,
        &[1, 1, 2, 2],
    )
}

/// Gaussian size field in 2d, smallest at (0.5, 0.35)
#[must_use]
pub fn h_2d(p: &Point<2>) -> f64 {
    let (h_lo, h_hi) = (0.03, 0.3);
    let r2 = (p[0] - 0.5).powi(2) + (p[1] - 0.35).powi(2);
    h_lo + (h_hi - h_lo) * (1.0 - f64::exp(-r2 / 0.0625))
}

/// Coarse mesh of the domain described by `GeomHalfCircle2d`
#[must_use]
pub fn test_mesh_moon_2d() -> SimplexMesh<2, Triangle> {
    build(
        &[[-1., 0.], [0., 0.5], [1., 0.], [0., 1.]],
        &[[0, 1, 3], [1, 2, 3]],
        &[1, 1],
        &QUAD_BDY,
        &[1, 1, 2, 2],
    )
}

/// Analytical geometry of a 2d domain bounded by two circle arcs
pub struct GeomHalfCircle2d();

impl Geometry<2> for GeomHalfCircle2d {
    fn check(&self, topo: &Topology) -> Result<()> {
        let ntags = [1, 2, 1];
        let tags: [TopoTag; 4] = [(2, 1), (1, 1), (1, 2), (0, 1)];

        for (dim, n) in ntags.iter().enumerate() {
            if *n != topo.ntags(dim as Dim) {
                return Err(Error::from(&format!("Invalid # of tags for dim {dim}")));
            }
        }
        for tag in tags {
            if topo.get(tag).is_none() {
                return Err(Error::from(&format!("Tag {tag:?} not found in topo")));
            }
        }
        Ok(())
    }

    fn project(&self, pt: &mut Point<2>, tag: &TopoTag) -> Result<f64> {
        let p = *pt;
        match *tag {
            // inner arc, centered at (0, -0.75)
            (1, 1) => {
                let c = Point::<2>::new(0.0, -0.75);
                *pt = c + 1.25 * (p - c) / (p - c).norm();
            }
            // outer arc
            (1, 2) => *pt = p / p.norm(),
            (0, 1) => *pt = Point::<2>::new(p[0].signum(), 0.0),
            _ => return Err(Error::from(&format!("cannot project on {tag:?}"))),
        }
        Ok((*pt - p).norm())
    }

    fn angle(&self, _pt: &Point<2>, _n: &Point<2>, _tag: &TopoTag) -> f64 {
        0.0
    }
}

/// Unit tetrahedron
#[must_use]
pub fn test_mesh_3d_single_tet() -> SimplexMesh<3, Tetrahedron> {
    build(
        &[[0., 0., 0.], [1., 0., 0.], [0., 1., 0.], [0., 0., 1.]],
        &[[0, 1, 2, 3]],
        &[1],
        &[[0, 1, 2], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        &[1, 2, 3, 4],
    )
}

/// Two flat tetrahedra sharing the face `0-1-3`
#[must_use]
pub fn test_mesh_3d_two_tets() -> SimplexMesh<3, Tetrahedron> {
    build(
        &[
            [0., 0., 0.],
            [1., 0., 0.],
            [0.5, 0.1, 0.],
            [0., 0., 1.],
            [0.5, -0.1, 0.],
        ],
        &[[0, 1, 2, 3], [0, 4, 1, 3]],
        &[1, 1],
        &[
            [0, 1, 2],
            [1, 2, 3],
            [2, 0, 3],
            [0, 4, 1],
            [4, 1, 3],
            [0, 4, 3],
        ],
        &[1, 2, 3, 1, 2, 3],
    )
}

/// Unit cube split into 5 tetrahedra, one face tag per side
#[must_use]
pub fn test_mesh_3d() -> SimplexMesh<3, Tetrahedron> {
    let coords = [
        [0., 0., 0.],
        [1., 0., 0.],
        [1., 1., 0.],
        [0., 1., 0.],
        [0., 0., 1.],
        [1., 0., 1.],
        [1., 1., 1.],
        [0., 1., 1.],
    ];
    let sides = [
        [[0, 1, 2], [0, 2, 3]],
        [[5, 6, 7], [5, 7, 4]],
        [[0, 1, 5], [0, 5, 4]],
        [[2, 6, 7], [2, 7, 3]],
        [[1, 2, 5], [2, 6, 5]],
        [[0, 3, 7], [0, 7, 4]],
    ];
    let faces: Vec<[Idx; 3]> = sides.iter().flatten().copied().collect();
    let ftags: Vec<Tag> = (1..=6).flat_map(|t| [t, t]).collect();

    build(
        &coords,
        &[
            [0, 1, 2, 5],
            [0, 2, 7, 5],
            [0, 2, 3, 7],
            [0, 5, 7, 4],
            [2, 7, 5, 6],
        ],
        &[1; 5],
        &faces,
        &ftags,
    )
}

/// Gaussian size field in 3d, smallest at (0.5, 0.35, 0.35)
#[must_use]
pub fn h_3d(p: &Point<3>) -> f64 {
    let (h_lo, h_hi) = (0.1, 0.3);
    let r2 = (p[0] - 0.5).powi(2) + (p[1] - 0.35).powi(2) + (p[2] - 0.35).powi(2);
    h_lo + (h_hi - h_lo) * (1.0 - f64::exp(-r2 / 0.0625))
}
