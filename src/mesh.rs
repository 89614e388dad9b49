use crate::{
    geom_elems::GElem,
    graph::CSRGraph,
    metric::IsoMetric,
    topo_elems::{get_face_to_elem, Elem},
    topology::Topology,
    Error, Idx, Result, Tag, TopoTag,
};
use log::{debug, info, warn};
use nalgebra::SVector;
use rustc_hash::{FxHashMap, FxHashSet};

pub type Point<const D: usize> = SVector<f64, D>;

/// Simplex mesh in D dimensions with elements of type `E`
///
/// Only the vertices, elements, faces and tags are authoritative. The connectivities,
/// volumes and topology are derived data: they are computed on request, must be cleared
/// (`clear_all`) whenever the mesh is modified and their getters fail when they are not
/// available.
#[derive(Debug, Clone)]
pub struct SimplexMesh<const D: usize, E: Elem> {
    verts: Vec<Point<D>>,
    elems: Vec<E>,
    etags: Vec<Tag>,
    faces: Vec<E::Face>,
    ftags: Vec<Tag>,
    faces_to_elems: Option<FxHashMap<E::Face, Vec<Idx>>>,
    vertex_to_elems: Option<CSRGraph>,
    edges: Option<Vec<[Idx; 2]>>,
    vertex_to_vertices: Option<CSRGraph>,
    elem_vol: Option<Vec<f64>>,
    vert_vol: Option<Vec<f64>>,
    topo: Option<Topology>,
    vtags: Option<Vec<TopoTag>>,
}

impl<const D: usize, E: Elem> SimplexMesh<D, E> {
    #[must_use]
    pub fn new(
        verts: Vec<Point<D>>,
        elems: Vec<E>,
        etags: Vec<Tag>,
        faces: Vec<E::Face>,
        ftags: Vec<Tag>,
    ) -> Self {
        info!(
            "Create a SimplexMesh with {} {}D vertices / {} {} / {} {}",
            verts.len(),
            D,
            elems.len(),
            E::NAME,
            faces.len(),
            E::Face::NAME
        );
        Self {
            verts,
            elems,
            etags,
            faces,
            ftags,
            faces_to_elems: None,
            vertex_to_elems: None,
            edges: None,
            vertex_to_vertices: None,
            elem_vol: None,
            vert_vol: None,
            topo: None,
            vtags: None,
        }
    }

    #[must_use]
    pub fn n_verts(&self) -> Idx {
        self.verts.len() as Idx
    }

    #[must_use]
    pub fn n_elems(&self) -> Idx {
        self.elems.len() as Idx
    }

    #[must_use]
    pub fn n_faces(&self) -> Idx {
        self.faces.len() as Idx
    }

    #[must_use]
    pub fn vert(&self, idx: Idx) -> Point<D> {
        self.verts[idx as usize]
    }

    pub fn verts(&self) -> impl ExactSizeIterator<Item = Point<D>> + Clone + '_ {
        self.verts.iter().copied()
    }

    /// Mutable access to the vertex coordinates; the derived data is cleared
    pub fn mut_verts(&mut self) -> impl Iterator<Item = &mut Point<D>> {
        self.clear_all();
        self.verts.iter_mut()
    }

    #[must_use]
    pub fn elem(&self, idx: Idx) -> E {
        self.elems[idx as usize]
    }

    pub fn elems(&self) -> impl ExactSizeIterator<Item = E> + Clone + '_ {
        self.elems.iter().copied()
    }

    pub fn etags(&self) -> impl ExactSizeIterator<Item = Tag> + Clone + '_ {
        self.etags.iter().copied()
    }

    pub fn mut_etags(&mut self) -> impl Iterator<Item = &mut Tag> {
        self.clear_all();
        self.etags.iter_mut()
    }

    #[must_use]
    pub fn face(&self, idx: Idx) -> E::Face {
        self.faces[idx as usize]
    }

    pub fn faces(&self) -> impl ExactSizeIterator<Item = E::Face> + Clone + '_ {
        self.faces.iter().copied()
    }

    pub fn ftags(&self) -> impl ExactSizeIterator<Item = Tag> + Clone + '_ {
        self.ftags.iter().copied()
    }

    pub fn mut_ftags(&mut self) -> impl Iterator<Item = &mut Tag> {
        self.clear_all();
        self.ftags.iter_mut()
    }

    /// Geometric element (with a unit isotropic metric)
    #[must_use]
    pub fn gelem(&self, e: E) -> E::Geom<D, IsoMetric<D>> {
        let m = IsoMetric::<D>::from(1.0);
        E::Geom::from_verts(e.iter().map(|&i| (self.vert(i), m)))
    }

    pub fn gelems(&self) -> impl ExactSizeIterator<Item = E::Geom<D, IsoMetric<D>>> + '_ {
        self.elems().map(|e| self.gelem(e))
    }

    #[must_use]
    pub fn gface(&self, f: E::Face) -> <E::Face as Elem>::Geom<D, IsoMetric<D>> {
        let m = IsoMetric::<D>::from(1.0);
        <E::Face as Elem>::Geom::from_verts(f.iter().map(|&i| (self.vert(i), m)))
    }

    pub fn elem_vols(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.gelems().map(|ge| ge.vol())
    }

    pub fn elem_centers(&self) -> impl ExactSizeIterator<Item = Point<D>> + '_ {
        self.gelems().map(|ge| ge.center())
    }

    pub fn face_centers(&self) -> impl ExactSizeIterator<Item = Point<D>> + '_ {
        self.faces().map(|f| self.gface(f).center())
    }

    #[must_use]
    pub fn vol(&self) -> f64 {
        self.elem_vols().sum()
    }

    /// Clear all the derived data
    pub fn clear_all(&mut self) {
        self.faces_to_elems = None;
        self.vertex_to_elems = None;
        self.edges = None;
        self.vertex_to_vertices = None;
        self.elem_vol = None;
        self.vert_vol = None;
        self.topo = None;
        self.vtags = None;
    }

    pub fn compute_face_to_elems(&mut self) -> &FxHashMap<E::Face, Vec<Idx>> {
        debug!("Compute the face to element connectivity");
        self.faces_to_elems
            .insert(get_face_to_elem(self.elems.iter().copied()))
    }

    pub fn clear_face_to_elems(&mut self) {
        self.faces_to_elems = None;
    }

    pub fn get_face_to_elems(&self) -> Result<&FxHashMap<E::Face, Vec<Idx>>> {
        match self.faces_to_elems.as_ref() {
            Some(x) => Ok(x),
            None => Err(Error::from("face to element connectivity not computed")),
        }
    }

    pub fn compute_vertex_to_elems(&mut self) -> &CSRGraph {
        debug!("Compute the vertex to element connectivity");
        self.vertex_to_elems
            .insert(CSRGraph::transpose(self.verts.len(), &self.elems))
    }

    pub fn clear_vertex_to_elems(&mut self) {
        self.vertex_to_elems = None;
    }

    pub fn get_vertex_to_elems(&self) -> Result<&CSRGraph> {
        match self.vertex_to_elems.as_ref() {
            Some(x) => Ok(x),
            None => Err(Error::from("vertex to element connectivity not computed")),
        }
    }

    /// Compute the (sorted) mesh edges
    pub fn compute_edges(&mut self) -> &Vec<[Idx; 2]> {
        debug!("Compute the edges");
        let mut edgs = FxHashSet::default();
        for e in &self.elems {
            for i_edg in 0..E::N_EDGES {
                edgs.insert(e.sorted_edge(i_edg));
            }
        }
        let mut edgs: Vec<_> = edgs.into_iter().collect();
        edgs.sort_unstable();
        self.edges.insert(edgs)
    }

    pub fn clear_edges(&mut self) {
        self.edges = None;
    }

    pub fn get_edges(&self) -> Result<&[[Idx; 2]]> {
        match self.edges.as_deref() {
            Some(x) => Ok(x),
            None => Err(Error::from("edges not computed")),
        }
    }

    /// Compute the vertex-to-vertex connectivity, computing the edges if needed
    pub fn compute_vertex_to_vertices(&mut self) -> &CSRGraph {
        debug!("Compute the vertex to vertex connectivity");
        if self.edges.is_none() {
            self.compute_edges();
        }
        let g = CSRGraph::from_edges(self.verts.len(), self.edges.as_ref().unwrap());
        self.vertex_to_vertices.insert(g)
    }

    pub fn clear_vertex_to_vertices(&mut self) {
        self.vertex_to_vertices = None;
    }

    pub fn get_vertex_to_vertices(&self) -> Result<&CSRGraph> {
        match self.vertex_to_vertices.as_ref() {
            Some(x) => Ok(x),
            None => Err(Error::from("vertex to vertex connectivity not computed")),
        }
    }

    /// Compute the element volumes and the vertex (dual cell) volumes
    /// sum(elem_vol) = sum(vert_vol)
    pub fn compute_volumes(&mut self) {
        debug!("Compute the vertex & element volumes");
        let elem_vol: Vec<f64> = self.elem_vols().collect();
        let mut vert_vol = vec![0.0; self.verts.len()];
        let fac = 1.0 / f64::from(E::N_VERTS);
        for (e, v) in self.elems.iter().zip(elem_vol.iter()) {
            for &i in e.iter() {
                vert_vol[i as usize] += fac * v;
            }
        }
        self.elem_vol = Some(elem_vol);
        self.vert_vol = Some(vert_vol);
    }

    pub fn clear_volumes(&mut self) {
        self.elem_vol = None;
        self.vert_vol = None;
    }

    pub fn get_elem_volumes(&self) -> Result<&[f64]> {
        match self.elem_vol.as_deref() {
            Some(x) => Ok(x),
            None => Err(Error::from("element volumes not computed")),
        }
    }

    pub fn get_vertex_volumes(&self) -> Result<&[f64]> {
        match self.vert_vol.as_deref() {
            Some(x) => Ok(x),
            None => Err(Error::from("vertex volumes not computed")),
        }
    }

    /// Compute the tag topology and the topological tag of every vertex
    pub fn compute_topology(&mut self) -> Result<&Topology> {
        let (topo, vtags) = Topology::from_mesh(self)?;
        self.vtags = Some(vtags);
        Ok(self.topo.insert(topo))
    }

    pub fn clear_topology(&mut self) {
        self.topo = None;
        self.vtags = None;
    }

    pub fn get_topology(&self) -> Result<&Topology> {
        match self.topo.as_ref() {
            Some(x) => Ok(x),
            None => Err(Error::from("topology not computed")),
        }
    }

    pub fn get_vertex_tags(&self) -> Result<&[TopoTag]> {
        match self.vtags.as_deref() {
            Some(x) => Ok(x),
            None => Err(Error::from("topology not computed")),
        }
    }

    /// Convert a field defined at the elements (P0) to a field defined at the vertices (P1)
    /// using a volume-weighted average. For metric fields, use `elem_data_to_vertex_data_metric`.
    /// The vertex-to-element connectivity and the volumes are required.
    pub fn elem_data_to_vertex_data(&self, v: &[f64]) -> Result<Vec<f64>> {
        debug!("Convert element data to vertex data");
        let v2e = self.get_vertex_to_elems()?;
        let elem_vol = self.get_elem_volumes()?;
        let vert_vol = self.get_vertex_volumes()?;

        let n_elems = self.elems.len();
        if n_elems == 0 || v.len() % n_elems != 0 {
            return Err(Error::from("invalid element data size"));
        }
        let n_comp = v.len() / n_elems;
        let mut res = vec![0.; n_comp * self.verts.len()];

        let f = 1.0 / f64::from(E::N_VERTS);
        for (i_vert, vals) in res.chunks_mut(n_comp).enumerate() {
            for &i_elem in v2e.row(i_vert as Idx) {
                let w = f * elem_vol[i_elem as usize] / vert_vol[i_vert];
                let start = n_comp * i_elem as usize;
                for (x, y) in vals.iter_mut().zip(&v[start..start + n_comp]) {
                    *x += w * y;
                }
            }
        }
        Ok(res)
    }

    /// Convert a field defined at the vertices (P1) to a field defined at the elements (P0)
    /// For metric fields, use `vertex_data_to_elem_data_metric`
    pub fn vertex_data_to_elem_data(&self, v: &[f64]) -> Result<Vec<f64>> {
        debug!("Convert vertex data to element data");
        let n_verts = self.verts.len();
        if n_verts == 0 || v.len() % n_verts != 0 {
            return Err(Error::from("invalid vertex data size"));
        }
        let n_comp = v.len() / n_verts;
        let mut res = vec![0.; n_comp * self.elems.len()];

        let f = 1. / f64::from(E::N_VERTS);
        for (e, vals) in self.elems.iter().zip(res.chunks_mut(n_comp)) {
            for &i_vert in e.iter() {
                let start = n_comp * i_vert as usize;
                for (x, y) in vals.iter_mut().zip(&v[start..start + n_comp]) {
                    *x += f * y;
                }
            }
        }
        Ok(res)
    }

    /// Compute the boundary faces, oriented outwards, and the tagged internal faces.
    /// Boundary faces that are not tagged get a new tag, also returned.
    /// The face-to-element connectivity is required.
    pub fn boundary_faces(&self) -> Result<(Vec<E::Face>, Vec<Tag>, Tag)> {
        debug!("Compute and orient the boundary faces");
        let f2e = self.get_face_to_elems()?;

        let tagged_faces: FxHashMap<E::Face, Tag> = self
            .faces()
            .zip(self.ftags())
            .map(|(f, t)| (f.sorted(), t))
            .collect();
        let new_faces_tag = self.ftags().max().unwrap_or(0) + 1;

        let mut bdy = Vec::new();
        let mut bdy_tags = Vec::new();

        for (f, elems) in f2e {
            if elems.len() == 1 {
                let elem = self.elem(elems[0]);
                let oriented = (0..E::N_FACES)
                    .map(|i| elem.face(i))
                    .find(|x| x.sorted() == *f)
                    .ok_or_else(|| Error::from("inconsistent face to element connectivity"))?;
                bdy.push(oriented);
                bdy_tags.push(*tagged_faces.get(f).unwrap_or(&new_faces_tag));
            } else if let Some(&tag) = tagged_faces.get(f) {
                bdy.push(*f);
                bdy_tags.push(tag);
            }
        }

        Ok((bdy, bdy_tags, new_faces_tag))
    }

    /// Add the missing boundary faces and orient all the boundary faces outwards.
    /// Return the number of faces that were added
    pub fn add_boundary_faces(&mut self) -> Result<Idx> {
        debug!("Add the missing boundary faces & orient all faces outwards");
        if self.faces_to_elems.is_none() {
            self.compute_face_to_elems();
        }
        let (faces, ftags, new_tag) = self.boundary_faces()?;
        let n_untagged = ftags.iter().filter(|&&x| x == new_tag).count();
        if n_untagged > 0 {
            warn!("Added {n_untagged} untagged faces with tag={new_tag}");
        }
        self.faces = faces;
        self.ftags = ftags;
        self.clear_topology();
        Ok(n_untagged as Idx)
    }

    /// Check the mesh consistency:
    ///  - all the indices are valid
    ///  - all the elements have a positive volume
    ///  - all the boundary faces are tagged
    pub fn check(&self) -> Result<()> {
        let n_verts = self.n_verts();
        if self.etags.len() != self.elems.len() || self.ftags.len() != self.faces.len() {
            return Err(Error::from("invalid number of tags"));
        }
        for (i_elem, e) in self.elems.iter().enumerate() {
            if e.iter().any(|&i| i >= n_verts) {
                return Err(Error::from(&format!("invalid vertex index in element {i_elem}")));
            }
        }
        for (i_face, f) in self.faces.iter().enumerate() {
            if f.iter().any(|&i| i >= n_verts) {
                return Err(Error::from(&format!("invalid vertex index in face {i_face}")));
            }
        }
        for (i_elem, v) in self.elem_vols().enumerate() {
            if v <= 0.0 {
                return Err(Error::from(&format!(
                    "element {i_elem} has a non positive volume {v:.3e}"
                )));
            }
        }

        let tagged: FxHashSet<E::Face> = self.faces().map(|f| f.sorted()).collect();
        let f2e = get_face_to_elem(self.elems.iter().copied());
        for (f, elems) in &f2e {
            if elems.len() == 1 && !tagged.contains(f) {
                return Err(Error::from(&format!("boundary face {f:?} is not tagged")));
            }
            if elems.len() > 2 {
                return Err(Error::from(&format!("face {f:?} belongs to > 2 elements")));
            }
        }
        Ok(())
    }

    /// Uniform refinement: every edge is split at its midpoint
    #[must_use]
    pub fn split(&self) -> Self {
        info!("Split all the elements uniformly");

        let mut edges: FxHashMap<[Idx; 2], Idx> = FxHashMap::default();
        let mut verts = self.verts.clone();
        for e in &self.elems {
            for i in 0..E::N_EDGES {
                let edg = e.sorted_edge(i);
                edges.entry(edg).or_insert_with(|| {
                    verts.push(0.5 * (self.vert(edg[0]) + self.vert(edg[1])));
                    (verts.len() - 1) as Idx
                });
            }
        }

        let mid = |i: Idx, j: Idx| {
            let edg = if i < j { [i, j] } else { [j, i] };
            edges[&edg]
        };

        let (elems, etags) = split_elems(&self.elems, &self.etags, mid);
        let (faces, ftags) = split_elems(&self.faces, &self.ftags, mid);

        Self::new(verts, elems, etags, faces, ftags)
    }
}

/// Split simplices given the index of the edge midpoints
fn split_elems<E: Elem, F: Fn(Idx, Idx) -> Idx>(elems: &[E], etags: &[Tag], mid: F) -> (Vec<E>, Vec<Tag>) {
    let n = match E::N_VERTS {
        2 => 2,
        3 => 4,
        4 => 8,
        _ => unreachable!(),
    };
    let mut new_elems = Vec::with_capacity(n * elems.len());
    let mut new_tags = Vec::with_capacity(n * elems.len());

    for (e, &tag) in elems.iter().zip(etags.iter()) {
        match E::N_VERTS {
            2 => {
                let i = mid(e[0], e[1]);
                new_elems.push(E::from_slice(&[e[0], i]));
                new_elems.push(E::from_slice(&[i, e[1]]));
            }
            3 => {
                let i2 = mid(e[0], e[1]);
                let i0 = mid(e[1], e[2]);
                let i1 = mid(e[2], e[0]);
                new_elems.push(E::from_slice(&[e[0], i2, i1]));
                new_elems.push(E::from_slice(&[i2, e[1], i0]));
                new_elems.push(E::from_slice(&[i2, i0, i1]));
                new_elems.push(E::from_slice(&[i1, i0, e[2]]));
            }
            4 => {
                let ids = [
                    e[0],
                    e[1],
                    e[2],
                    e[3],
                    mid(e[0], e[1]),
                    mid(e[1], e[2]),
                    mid(e[2], e[0]),
                    mid(e[0], e[3]),
                    mid(e[1], e[3]),
                    mid(e[2], e[3]),
                ];
                for t in [
                    [0, 4, 6, 7],
                    [4, 1, 5, 8],
                    [4, 5, 6, 7],
                    [4, 5, 7, 8],
                    [8, 5, 7, 9],
                    [6, 5, 9, 7],
                    [7, 8, 9, 3],
                    [6, 5, 2, 9],
                ] {
                    new_elems.push(E::from_iter(t.iter().map(|&k| ids[k])));
                }
            }
            _ => unreachable!(),
        }
        new_tags.extend(std::iter::repeat(tag).take(n));
    }

    (new_elems, new_tags)
}

#[cfg(test)]
mod tests {
    use crate::{
        test_meshes::{test_mesh_2d, test_mesh_3d},
        topo_elems::{Edge, Elem, Triangle},
        Result,
    };

    #[test]
    fn test_2d() -> Result<()> {
        let mesh = test_mesh_2d();

        assert_eq!(mesh.n_verts(), 4);
        assert_eq!(mesh.n_faces(), 4);
        assert_eq!(mesh.n_elems(), 2);

        assert_eq!(mesh.elem(1), Triangle::from_slice(&[0, 2, 3]));
        assert_eq!(mesh.face(1), Edge::from_slice(&[1, 2]));

        assert!(f64::abs(mesh.vol() - 1.0) < 1e-12);
        mesh.check()?;

        Ok(())
    }

    #[test]
    fn test_3d() -> Result<()> {
        let mesh = test_mesh_3d();

        assert_eq!(mesh.n_verts(), 8);
        assert_eq!(mesh.n_faces(), 12);
        assert_eq!(mesh.n_elems(), 5);

        assert!(f64::abs(mesh.vol() - 1.0) < 1e-12);
        mesh.check()?;

        Ok(())
    }

    #[test]
    fn test_split_2d() -> Result<()> {
        let mesh = test_mesh_2d().split();

        assert_eq!(mesh.n_verts(), 9);
        assert_eq!(mesh.n_faces(), 8);
        assert_eq!(mesh.n_elems(), 8);
        assert!(f64::abs(mesh.vol() - 1.0) < 1e-12);
        mesh.check()?;

        Ok(())
    }

    #[test]
    fn test_split_3d() -> Result<()> {
        let mesh = test_mesh_3d().split();

        assert_eq!(mesh.n_verts(), 26);
        assert_eq!(mesh.n_faces(), 48);
        assert_eq!(mesh.n_elems(), 40);
        assert!(f64::abs(mesh.vol() - 1.0) < 1e-12);
        mesh.check()?;

        Ok(())
    }

    #[test]
    fn test_caches() -> Result<()> {
        let mut mesh = test_mesh_2d().split();

        assert!(mesh.get_edges().is_err());
        assert_eq!(mesh.compute_edges().len(), 16);
        assert!(mesh.get_vertex_to_vertices().is_err());
        mesh.compute_vertex_to_vertices();
        assert_eq!(mesh.get_vertex_to_vertices()?.row(6).len(), 6);

        mesh.compute_volumes();
        let v: f64 = mesh.get_vertex_volumes()?.iter().sum();
        assert!(f64::abs(v - 1.0) < 1e-12);

        mesh.mut_verts().for_each(|p| *p *= 2.0);
        assert!(mesh.get_edges().is_err());
        assert!(mesh.get_vertex_volumes().is_err());
        assert!(f64::abs(mesh.vol() - 4.0) < 1e-12);

        Ok(())
    }

    #[test]
    fn test_add_boundary_faces() -> Result<()> {
        let mesh = test_mesh_2d().split();
        let mut mesh2 = crate::mesh::SimplexMesh::new(
            mesh.verts().collect(),
            mesh.elems().collect(),
            mesh.etags().collect(),
            Vec::new(),
            Vec::new(),
        );
        assert!(mesh2.check().is_err());
        assert_eq!(mesh2.add_boundary_faces()?, 8);
        assert_eq!(mesh2.n_faces(), 8);
        mesh2.check()?;

        // the faces are oriented outwards
        let c = crate::mesh::Point::<2>::new(0.5, 0.5);
        for (f, center) in mesh2.faces().zip(mesh2.face_centers()) {
            let n = crate::geom_elems::GElem::normal(&mesh2.gface(f));
            assert!(n.dot(&(center - c)) > 0.0);
        }

        Ok(())
    }

    #[test]
    fn test_cell_to_node() -> Result<()> {
        let mut mesh = test_mesh_3d().split().split().split();

        let n_verts = mesh.n_verts() as usize;
        let v_e: Vec<f64> = mesh
            .elem_centers()
            .flat_map(|c| [c[0] + c[1], c[0] * c[1], c[0] - c[1]])
            .collect();

        assert!(mesh.elem_data_to_vertex_data(&v_e).is_err());
        mesh.compute_vertex_to_elems();
        assert!(mesh.elem_data_to_vertex_data(&v_e).is_err());
        mesh.compute_volumes();
        let v_v = mesh.elem_data_to_vertex_data(&v_e)?;
        assert_eq!(v_v.len(), 3 * n_verts);

        for (i_vert, pt) in mesh.verts().enumerate() {
            assert!(f64::abs(v_v[3 * i_vert] - (pt[0] + pt[1])) < 0.15);
            assert!(f64::abs(v_v[3 * i_vert + 1] - (pt[0] * pt[1])) < 0.15);
            assert!(f64::abs(v_v[3 * i_vert + 2] - (pt[0] - pt[1])) < 0.15);
        }

        Ok(())
    }

    #[test]
    fn test_vertex_to_elem() -> Result<()> {
        let mesh = test_mesh_3d().split().split().split();

        let n_elems = mesh.n_elems() as usize;
        let v_v: Vec<f64> = mesh
            .verts()
            .flat_map(|p| [p[0] + p[1], p[0] * p[1], p[0] - p[1]])
            .collect();

        let v_e = mesh.vertex_data_to_elem_data(&v_v)?;
        assert_eq!(v_e.len(), 3 * n_elems);

        for (i_elem, pt) in mesh.elem_centers().enumerate() {
            assert!(f64::abs(v_e[3 * i_elem] - (pt[0] + pt[1])) < 1e-10);
            assert!(f64::abs(v_e[3 * i_elem + 1] - (pt[0] * pt[1])) < 0.1);
            assert!(f64::abs(v_e[3 * i_elem + 2] - (pt[0] - pt[1])) < 1e-10);
        }

        Ok(())
    }
}
