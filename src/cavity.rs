use crate::{
    geom_elems::GElem,
    geometry::Geometry,
    mesh::Point,
    metric::Metric,
    remesher::{ElemInfo, Remesher},
    topo_elems::Elem,
    Dim, Error, Idx, Result, Tag, TopoTag,
};
use log::trace;
use std::cmp::{min, Ordering};
use std::iter::once;

/// Entity from which a cavity is built
#[derive(Debug, Clone, Copy)]
pub enum Seed {
    No,
    Vertex(Idx),
    Edge([Idx; 2]),
}

fn contains_seed<F: Elem>(seed: Seed, f: &F) -> bool {
    match seed {
        Seed::No => false,
        Seed::Vertex(i) => f.contains_vertex(i),
        Seed::Edge(edg) => f.contains_edge(edg),
    }
}

/// Result of the validity check of a filled cavity
#[derive(Debug, Clone, Copy)]
pub enum CavityCheckStatus {
    LongEdge(f64),
    ShortEdge(f64),
    Invalid,
    LowQuality(f64),
    Ok(f64),
}

/// Local cavity built from a mesh entity (vertex or edge)
/// Vertices and elements are copied from the remesher and stored using a local numbering
#[derive(Debug)]
pub struct Cavity<const D: usize, E: Elem, M: Metric<D>> {
    /// Conversion from local to global vertex indices
    pub local2global: Vec<Idx>,
    /// Coordinates of the vertices
    pub points: Vec<Point<D>>,
    /// Metric field at the vertices
    pub metrics: Vec<M>,
    /// TopoTag of the vertices
    pub tags: Vec<TopoTag>,
    /// Elements stored using the local vertex numbering
    pub elems: Vec<E>,
    /// Element tags
    pub etags: Vec<Tag>,
    /// Global element IDs
    pub global_elem_ids: Vec<Idx>,
    /// Faces shared by the cavity with the rest of the mesh, with the tag of the cavity
    /// element they belong to. Faces that contain the seed are not included.
    pub faces: Vec<(E::Face, Tag)>,
    /// Tagged faces (boundary or interface) that contain the seed
    pub tagged_faces: Vec<(E::Face, Tag)>,
    /// Faces of the tagged faces that do not contain the seed
    pub tagged_bdys: Vec<(<E::Face as Elem>::Face, Tag)>,
    pub seed: Seed,
    /// Minimum element quality in the cavity
    pub q_min: f64,
    /// Minimum edge length in the cavity
    pub l_min: f64,
    /// Maximum edge length in the cavity
    pub l_max: f64,
}

impl<const D: usize, E: Elem, M: Metric<D>> Default for Cavity<D, E, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize, E: Elem, M: Metric<D>> Cavity<D, E, M> {
    /// Create a new (empty) cavity
    #[must_use]
    pub const fn new() -> Self {
        Self {
            local2global: Vec::new(),
            points: Vec::new(),
            metrics: Vec::new(),
            tags: Vec::new(),
            elems: Vec::new(),
            etags: Vec::new(),
            global_elem_ids: Vec::new(),
            faces: Vec::new(),
            tagged_faces: Vec::new(),
            tagged_bdys: Vec::new(),
            seed: Seed::No,
            q_min: f64::INFINITY,
            l_min: f64::INFINITY,
            l_max: 0.0,
        }
    }

    /// Clear the cavity data
    pub fn clear(&mut self) {
        self.local2global.clear();
        self.points.clear();
        self.metrics.clear();
        self.tags.clear();
        self.elems.clear();
        self.etags.clear();
        self.global_elem_ids.clear();
        self.faces.clear();
        self.tagged_faces.clear();
        self.tagged_bdys.clear();
        self.seed = Seed::No;
        self.q_min = f64::INFINITY;
        self.l_min = f64::INFINITY;
        self.l_max = 0.0;
    }

    /// Get the local vertex index from a global vertex index
    #[must_use]
    pub fn get_local_index(&self, i: Idx) -> Option<Idx> {
        self.local2global
            .iter()
            .position(|&j| j == i)
            .map(|j| j as Idx)
    }

    /// Intersect two sorted slices
    fn intersection(a: &[Idx], b: &[Idx]) -> Vec<Idx> {
        let mut result = Vec::with_capacity(min(a.len(), b.len()));
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    result.push(a[i]);
                    i += 1;
                    j += 1;
                }
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
            }
        }
        result
    }

    /// Build the cavity of all the elements that contain edge `edg`
    pub fn init_from_edge<G: Geometry<D>>(
        &mut self,
        edg: [Idx; 2],
        r: &Remesher<D, E, M, G>,
    ) -> Result<()> {
        let global_elems =
            Self::intersection(r.vertex_elements(edg[0])?, r.vertex_elements(edg[1])?);
        if global_elems.is_empty() {
            return Err(Error::from(&format!("empty cavity for edge {edg:?}")));
        }
        self.compute(r, &global_elems, Seed::Edge(edg))
    }

    /// Build the cavity of all the elements that contain vertex `i`
    pub fn init_from_vertex<G: Geometry<D>>(
        &mut self,
        i: Idx,
        r: &Remesher<D, E, M, G>,
    ) -> Result<()> {
        let global_elems = r.vertex_elements(i)?;
        if global_elems.is_empty() {
            return Err(Error::from(&format!("empty cavity for vertex {i}")));
        }
        self.compute(r, global_elems, Seed::Vertex(i))
    }

    /// Coordinates and metric of the barycenter of the seed vertices
    #[must_use]
    pub fn seed_barycenter(&self) -> (Point<D>, M) {
        match self.seed {
            Seed::No => unreachable!(),
            Seed::Vertex(i) => (self.points[i as usize], self.metrics[i as usize]),
            Seed::Edge([i0, i1]) => {
                let (i0, i1) = (i0 as usize, i1 as usize);
                (
                    0.5 * (self.points[i0] + self.points[i1]),
                    M::interpolate([(0.5, &self.metrics[i0]), (0.5, &self.metrics[i1])].into_iter()),
                )
            }
        }
    }

    fn add_elem<G: Geometry<D>>(&mut self, r: &Remesher<D, E, M, G>, e: &ElemInfo<E>) -> Result<()> {
        let mut local = E::default();

        self.q_min = self.q_min.min(e.q);
        for (k, j) in e.el.iter().copied().enumerate() {
            if let Some(idx) = self.get_local_index(j) {
                local[k] = idx;
            } else {
                let (p, tag, m) = r
                    .get_vertex(j)
                    .ok_or_else(|| Error::from(&format!("vertex {j} not found")))?;
                self.local2global.push(j);
                local[k] = (self.local2global.len() - 1) as Idx;
                self.points.push(p);
                self.metrics.push(m);
                self.tags.push(tag);
            }
        }
        for i_edge in 0..E::N_EDGES {
            let [i0, i1] = local.edge(i_edge);
            let (i0, i1) = (i0 as usize, i1 as usize);
            let l = M::edge_length(
                &self.points[i0],
                &self.metrics[i0],
                &self.points[i1],
                &self.metrics[i1],
            );
            self.l_min = self.l_min.min(l);
            self.l_max = self.l_max.max(l);
        }
        self.elems.push(local);
        self.etags.push(e.tag);
        Ok(())
    }

    fn compute<G: Geometry<D>>(
        &mut self,
        r: &Remesher<D, E, M, G>,
        global_elems: &[Idx],
        seed: Seed,
    ) -> Result<()> {
        self.clear();

        for &i_global in global_elems {
            let e = r
                .get_elem(i_global)
                .ok_or_else(|| Error::from(&format!("element {i_global} not found")))?;
            self.global_elem_ids.push(i_global);
            self.add_elem(r, &e)?;
        }

        let local = |i: Idx| {
            self.get_local_index(i)
                .ok_or_else(|| Error::from(&format!("seed vertex {i} not in the cavity")))
        };
        self.seed = match seed {
            Seed::No => Seed::No,
            Seed::Vertex(i) => Seed::Vertex(local(i)?),
            Seed::Edge([i0, i1]) => Seed::Edge([local(i0)?, local(i1)?]),
        };

        self.compute_faces(r);
        trace!("Cavity built: {self:?}");
        Ok(())
    }

    fn compute_faces<G: Geometry<D>>(&mut self, r: &Remesher<D, E, M, G>) {
        let seed = self.seed;
        for (e, &etag) in self.elems.iter().zip(self.etags.iter()) {
            for i_face in 0..E::N_FACES {
                let f = e.face(i_face);
                if !contains_seed(seed, &f) {
                    self.faces.push((f, etag));
                    continue;
                }
                let Some(ftag) = r.face_tag(&self.global_elem(&f)) else {
                    continue;
                };
                let sorted = f.sorted();
                if self.tagged_faces.iter().any(|(x, _)| x.sorted() == sorted) {
                    continue;
                }
                self.tagged_faces.push((f, ftag));
                for i_bdy in 0..E::Face::N_FACES {
                    let b = f.face(i_bdy);
                    let sorted = b.sorted();
                    if !contains_seed(seed, &b)
                        && !self.tagged_bdys.iter().any(|(x, _)| x.sorted() == sorted)
                    {
                        self.tagged_bdys.push((b, ftag));
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn n_verts(&self) -> Idx {
        self.points.len() as Idx
    }

    #[must_use]
    pub fn n_elems(&self) -> Idx {
        self.elems.len() as Idx
    }

    /// Get the i-th geometrical element
    #[must_use]
    pub fn gelem(&self, i: Idx) -> E::Geom<D, M> {
        <E::Geom<D, M> as GElem<D, M>>::from_verts(
            self.elems[i as usize]
                .iter()
                .map(|&j| (self.points[j as usize], self.metrics[j as usize])),
        )
    }

    /// Convert an element (or face) from local to global vertex numbering
    #[must_use]
    pub fn global_elem<F: Elem>(&self, f: &F) -> F {
        F::from_iter(f.iter().map(|&i| self.local2global[i as usize]))
    }

    /// Tagged faces that contain the seed, using the global numbering
    pub fn global_tagged_faces(&self) -> impl Iterator<Item = (E::Face, Tag)> + '_ {
        self.tagged_faces
            .iter()
            .map(|(f, t)| (self.global_elem(f), *t))
    }
}

/// How a cavity is filled: from one of its vertices, from one of its vertices moved to a
/// new location or from a new vertex created at the center of the seed edge
#[derive(Debug, Clone, Copy)]
pub enum FilledCavityType<const D: usize, M: Metric<D>> {
    ExistingVertex(Idx),
    MovedVertex((Idx, Point<D>, M)),
    EdgeCenter(([Idx; 2], Point<D>, M)),
}

/// Cavity reconstructed by connecting a vertex to its faces
pub struct FilledCavity<'a, const D: usize, E: Elem, M: Metric<D>> {
    pub cavity: &'a Cavity<D, E, M>,
    pub ftype: FilledCavityType<D, M>,
}

impl<'a, const D: usize, E: Elem, M: Metric<D>> FilledCavity<'a, D, E, M> {
    #[must_use]
    pub const fn new(cavity: &'a Cavity<D, E, M>, ftype: FilledCavityType<D, M>) -> Self {
        Self { cavity, ftype }
    }

    /// Whether a face is used to build the new elements
    fn keeps<F: Elem>(&self, f: &F) -> bool {
        match self.ftype {
            FilledCavityType::ExistingVertex(i) | FilledCavityType::MovedVertex((i, _, _)) => {
                !f.contains_vertex(i)
            }
            FilledCavityType::EdgeCenter((edg, _, _)) => !f.contains_edge(edg),
        }
    }

    /// The filled cavity would contain the same elements
    #[must_use]
    pub fn is_same(&self) -> bool {
        if let FilledCavityType::ExistingVertex(i) = self.ftype {
            self.cavity.elems.iter().all(|e| e.contains_vertex(i))
        } else {
            false
        }
    }

    /// Faces used to build the new elements, with the tags of these elements
    pub fn faces(&self) -> impl Iterator<Item = (E::Face, Tag)> + '_ {
        self.cavity
            .faces
            .iter()
            .copied()
            .filter(move |(f, _)| self.keeps(f))
    }

    /// Faces used to build the new tagged faces
    pub fn tagged_faces_boundary(
        &self,
    ) -> impl Iterator<Item = (<E::Face as Elem>::Face, Tag)> + '_ {
        self.cavity
            .tagged_bdys
            .iter()
            .copied()
            .filter(move |(b, _)| self.keeps(b))
    }

    /// Faces used to build the new tagged faces (global numbering)
    pub fn tagged_faces_boundary_global(
        &self,
    ) -> impl Iterator<Item = (<E::Face as Elem>::Face, Tag)> + '_ {
        self.tagged_faces_boundary()
            .map(|(b, t)| (self.cavity.global_elem(&b), t))
    }

    /// Check that the new tagged faces do not already exist (collapse only)
    pub fn check_tagged_faces<G: Geometry<D>>(&self, r: &Remesher<D, E, M, G>) -> bool {
        let FilledCavityType::ExistingVertex(i) = self.ftype else {
            return true;
        };
        let i = self.cavity.local2global[i as usize];
        self.tagged_faces_boundary_global()
            .all(|(b, _)| r.face_tag(&E::Face::from_vertex_and_face(i, &b)).is_none())
    }

    /// Location and metric of the vertex used to fill the cavity
    fn point(&self) -> (Point<D>, M) {
        match self.ftype {
            FilledCavityType::ExistingVertex(i) => (
                self.cavity.points[i as usize],
                self.cavity.metrics[i as usize],
            ),
            FilledCavityType::MovedVertex((_, p, m)) | FilledCavityType::EdgeCenter((_, p, m)) => {
                (p, m)
            }
        }
    }

    /// Check the edge lengths and the element qualities of the filled cavity. If all the
    /// new edges lengths are in `[l_min, l_max]` and all the new qualities are above
    /// `q_min`, the minimum quality is returned.
    #[must_use]
    pub fn check(&self, l_min: f64, l_max: f64, q_min: f64) -> CavityCheckStatus {
        let (p0, m0) = self.point();
        let mut min_quality = f64::INFINITY;
        for (f, _) in self.faces() {
            for &i in f.iter() {
                let (pi, mi) = (
                    &self.cavity.points[i as usize],
                    &self.cavity.metrics[i as usize],
                );
                let l = M::edge_length(&p0, &m0, pi, mi);
                if l < l_min {
                    trace!("cavity check failed: short edge ({l:.2e} < {l_min:.2e})");
                    return CavityCheckStatus::ShortEdge(l);
                }
                if l > l_max {
                    trace!("cavity check failed: long edge ({l:.2e} > {l_max:.2e})");
                    return CavityCheckStatus::LongEdge(l);
                }
            }

            let ge = <E::Geom<D, M> as GElem<D, M>>::from_verts(once((p0, m0)).chain(
                f.iter()
                    .map(|&j| (self.cavity.points[j as usize], self.cavity.metrics[j as usize])),
            ));
            let q = ge.quality();
            if q <= 0.0 {
                trace!("cavity check failed: invalid element");
                return CavityCheckStatus::Invalid;
            } else if q <= q_min {
                trace!("cavity check failed: low quality ({q:.2e} < {q_min:.2e})");
                return CavityCheckStatus::LowQuality(q);
            }
            min_quality = f64::min(min_quality, q);
        }
        CavityCheckStatus::Ok(min_quality)
    }

    /// Check that the angle between the normals of the new tagged faces and the normal given
    /// by the geometry is below a threshold
    pub fn check_boundary_normals<G: Geometry<D>>(&self, geom: &G, threshold_degrees: f64) -> bool {
        let (p0, m0) = self.point();
        let face_dim = E::Face::DIM as Dim;
        for (b, tag) in self.tagged_faces_boundary() {
            let gf = <<E::Face as Elem>::Geom<D, M> as GElem<D, M>>::from_verts(
                once((p0, m0)).chain(b.iter().map(|&j| {
                    (self.cavity.points[j as usize], self.cavity.metrics[j as usize])
                })),
            );
            let a = geom.angle(&gf.center(), &gf.normal(), &(face_dim, tag));
            if a > threshold_degrees {
                trace!("normal check failed: {a:.1} > {threshold_degrees:.1} on face tag {tag}");
                return false;
            }
        }
        true
    }
}
