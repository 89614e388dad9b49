use crate::{
    geom_elems::{GEdge, GElem, GTetrahedron, GTriangle, GVertex},
    metric::Metric,
    Idx,
};
use core::hash::Hash;
use core::slice::Iter;
use rustc_hash::FxHashMap;
use std::fmt::Debug;
use std::ops::{Index, IndexMut};

/// Simplex connectivity (element-to-vertex)
pub trait Elem:
    Clone
    + Copy
    + Eq
    + PartialEq
    + Hash
    + IntoIterator<Item = Idx>
    + Index<usize, Output = Idx>
    + IndexMut<usize, Output = Idx>
    + Default
    + Debug
    + Send
    + Sync
{
    const N_VERTS: Idx;
    const N_FACES: Idx;
    const N_EDGES: Idx;
    const DIM: Idx;
    const NAME: &'static str;
    /// Type for the element faces
    type Face: Elem;
    /// Type for the element geometry
    type Geom<const D: usize, M: Metric<D>>: GElem<D, M>;

    fn iter(&self) -> Iter<Idx>;
    fn from_slice(s: &[Idx]) -> Self;
    fn from_iter<I: Iterator<Item = Idx>>(s: I) -> Self;
    /// Sort the vertices by increasing order (the orientation is lost)
    fn sort(&mut self);
    /// Get the i-th face (opposite to the i-th vertex), oriented outwards
    fn face(&self, i: Idx) -> Self::Face;
    fn edge(&self, i: Idx) -> [Idx; 2];

    /// Local index of vertex `i`, if present
    fn vertex_index(&self, i: Idx) -> Option<Idx> {
        self.iter().position(|&j| j == i).map(|j| j as Idx)
    }

    /// Build the element `(i, f[0], f[1], ...)`
    fn from_vertex_and_face(i: Idx, f: &Self::Face) -> Self {
        let mut e = Self::default();
        e[0] = i;
        for j in 1..(Self::N_VERTS as usize) {
            e[j] = f[j - 1];
        }
        e
    }

    fn contains_vertex(&self, i: Idx) -> bool {
        self.iter().any(|&x| x == i)
    }

    fn contains_edge(&self, edg: [Idx; 2]) -> bool {
        self.contains_vertex(edg[0]) && self.contains_vertex(edg[1])
    }

    #[must_use]
    fn sorted(&self) -> Self {
        let mut r = *self;
        r.sort();
        r
    }

    fn sorted_edge(&self, i: Idx) -> [Idx; 2] {
        let mut e = self.edge(i);
        e.sort_unstable();
        e
    }
}

macro_rules! simplex {
    ($name:ident, $n:literal) => {
        #[derive(Clone, Copy, Hash, Debug, Eq, PartialEq, Default)]
        pub struct $name([Idx; $n]);

        impl $name {
            fn vertices(&self) -> &[Idx; $n] {
                &self.0
            }
        }

        impl IntoIterator for $name {
            type Item = Idx;
            type IntoIter = std::array::IntoIter<Idx, $n>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }

        impl Index<usize> for $name {
            type Output = Idx;

            fn index(&self, index: usize) -> &Self::Output {
                &self.0[index]
            }
        }

        impl IndexMut<usize> for $name {
            fn index_mut(&mut self, index: usize) -> &mut Self::Output {
                &mut self.0[index]
            }
        }
    };
}

macro_rules! simplex_common {
    ($n:literal) => {
        fn iter(&self) -> Iter<Idx> {
            self.vertices().iter()
        }

        fn from_slice(s: &[Idx]) -> Self {
            let mut res = Self([0; $n]);
            res.0.copy_from_slice(&s[..$n]);
            res
        }

        fn from_iter<I: Iterator<Item = Idx>>(mut s: I) -> Self {
            Self(std::array::from_fn(|_| s.next().unwrap()))
        }

        fn sort(&mut self) {
            self.0.sort_unstable();
        }
    };
}

simplex!(Tetrahedron, 4);
simplex!(Triangle, 3);
simplex!(Edge, 2);
simplex!(Vertex, 1);

impl Tetrahedron {
    #[must_use]
    pub const fn new(i0: Idx, i1: Idx, i2: Idx, i3: Idx) -> Self {
        Self([i0, i1, i2, i3])
    }
}

impl Triangle {
    #[must_use]
    pub const fn new(i0: Idx, i1: Idx, i2: Idx) -> Self {
        Self([i0, i1, i2])
    }
}

impl Edge {
    #[must_use]
    pub const fn new(i0: Idx, i1: Idx) -> Self {
        Self([i0, i1])
    }
}

impl Vertex {
    #[must_use]
    pub const fn new(i0: Idx) -> Self {
        Self([i0])
    }
}

impl Elem for Tetrahedron {
    const N_VERTS: Idx = 4;
    const N_FACES: Idx = 4;
    const N_EDGES: Idx = 6;
    const DIM: Idx = 3;
    const NAME: &'static str = "Tetrahedron";
    type Face = Triangle;
    type Geom<const D: usize, M: Metric<D>> = GTetrahedron<D, M>;

    simplex_common!(4);

    fn face(&self, i: Idx) -> Self::Face {
        let [a, b, c, d] = self.0;
        match i {
            0 => Triangle([b, c, d]),
            1 => Triangle([c, a, d]),
            2 => Triangle([a, b, d]),
            3 => Triangle([a, c, b]),
            _ => unreachable!(),
        }
    }

    fn edge(&self, i: Idx) -> [Idx; 2] {
        let [a, b, c, d] = self.0;
        match i {
            0 => [a, b],
            1 => [b, c],
            2 => [c, a],
            3 => [a, d],
            4 => [b, d],
            5 => [c, d],
            _ => unreachable!(),
        }
    }
}

impl Elem for Triangle {
    const N_VERTS: Idx = 3;
    const N_FACES: Idx = 3;
    const N_EDGES: Idx = 3;
    const DIM: Idx = 2;
    const NAME: &'static str = "Triangle";
    type Face = Edge;
    type Geom<const D: usize, M: Metric<D>> = GTriangle<D, M>;

    simplex_common!(3);

    fn face(&self, i: Idx) -> Self::Face {
        let [a, b, c] = self.0;
        match i {
            0 => Edge([b, c]),
            1 => Edge([c, a]),
            2 => Edge([a, b]),
            _ => unreachable!(),
        }
    }

    fn edge(&self, i: Idx) -> [Idx; 2] {
        let [a, b, c] = self.0;
        match i {
            0 => [a, b],
            1 => [b, c],
            2 => [c, a],
            _ => unreachable!(),
        }
    }
}

impl Elem for Edge {
    const N_VERTS: Idx = 2;
    const N_FACES: Idx = 2;
    const N_EDGES: Idx = 1;
    const DIM: Idx = 1;
    const NAME: &'static str = "Edge";
    type Face = Vertex;
    type Geom<const D: usize, M: Metric<D>> = GEdge<D, M>;

    simplex_common!(2);

    fn face(&self, i: Idx) -> Self::Face {
        Vertex([self.0[1 - i as usize]])
    }

    fn edge(&self, i: Idx) -> [Idx; 2] {
        debug_assert_eq!(i, 0);
        self.0
    }
}

/// The faces and edges of a `Vertex` are not defined
impl Elem for Vertex {
    const N_VERTS: Idx = 1;
    const N_FACES: Idx = 0;
    const N_EDGES: Idx = 0;
    const DIM: Idx = 0;
    const NAME: &'static str = "Vertex";
    type Face = Self;
    type Geom<const D: usize, M: Metric<D>> = GVertex<D, M>;

    simplex_common!(1);

    fn face(&self, _i: Idx) -> Self::Face {
        unreachable!();
    }

    fn edge(&self, _i: Idx) -> [Idx; 2] {
        unreachable!();
    }
}

/// Map the (sorted) faces to the indices of the elements they belong to
pub fn get_face_to_elem<E: Elem, I: Iterator<Item = E>>(elems: I) -> FxHashMap<E::Face, Vec<Idx>> {
    let mut map: FxHashMap<E::Face, Vec<Idx>> = FxHashMap::default();
    for (i_elem, elem) in elems.enumerate() {
        for i_face in 0..E::N_FACES {
            let f = elem.face(i_face).sorted();
            map.entry(f).or_default().push(i_elem as Idx);
        }
    }
    map
}
