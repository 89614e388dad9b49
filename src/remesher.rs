use crate::{
    cavity::{Cavity, CavityCheckStatus, FilledCavity, FilledCavityType, Seed},
    geom_elems::GElem,
    geometry::Geometry,
    max_iter,
    mesh::{Point, SimplexMesh},
    metric::Metric,
    min_iter,
    stats::{
        CollapseStats, InitStats, RemesherStats, SmoothStats, SplitStats, StepStats, SwapStats,
    },
    topo_elems::{get_face_to_elem, Elem},
    topology::Topology,
    Dim, Error, Idx, Result, Tag, TopoTag,
};
use log::{debug, info, trace, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use sorted_vec::SortedVec;
use std::{
    cmp::Ordering,
    fs::File,
    io::Write,
    sync::atomic::{self, AtomicBool},
    time::Instant,
};

/// Get edge indices such that they are sorted by increasing tag dimension and then by
/// increasing edge length
fn argsort_edges_increasing_length(f: &[(Dim, f64)]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..f.len()).collect();
    indices.sort_by(|&i, &j| match f[i].0.cmp(&f[j].0) {
        Ordering::Equal => f[i].1.total_cmp(&f[j].1),
        o => o,
    });
    indices
}

/// Relative increase of the minimum cavity quality required to move a vertex
const SMOOTH_MIN_GAIN: f64 = 1e-3;

/// Get edge indices such that they are sorted by increasing tag dimension and then by
/// decreasing edge length
fn argsort_edges_decreasing_length(f: &[(Dim, f64)]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..f.len()).collect();
    indices.sort_by(|&i, &j| match f[i].0.cmp(&f[j].0) {
        Ordering::Equal => f[j].1.total_cmp(&f[i].1),
        o => o,
    });
    indices
}

/// Smoothing method
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmoothingMethod {
    /// Average of the neighbors
    Laplacian,
    /// Average of the neighbors weighted by the edge lengths
    Laplacian2,
    /// Pull / push the neighbors towards unit length
    Avro,
}

/// Parameters of the split step
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitParams {
    /// Edges longer than `l` are split
    pub l: f64,
    /// Max. number of loops through the mesh edges
    pub max_iter: u32,
    /// The new edges must be longer than `min(min_l_abs, min_l_rel * l_min)` where `l_min`
    /// is the shortest edge in the cavity
    pub min_l_rel: f64,
    pub min_l_abs: f64,
    /// The new elements must have a quality above `min(min_q_abs, min_q_rel * q_min)`
    /// where `q_min` is the lowest quality in the mesh at the beginning of the loop
    pub min_q_rel: f64,
    /// Same as `min_q_rel` for edges on the boundary
    pub min_q_rel_bdy: f64,
    pub min_q_abs: f64,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            l: f64::sqrt(2.0),
            max_iter: 1,
            min_l_rel: 1.0,
            min_l_abs: 0.75 / f64::sqrt(2.0),
            min_q_rel: 0.8,
            min_q_rel_bdy: 0.5,
            min_q_abs: 0.3,
        }
    }
}

/// Parameters of the collapse step
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapseParams {
    /// Edges shorter than `l` are collapsed
    pub l: f64,
    /// Max. number of loops through the mesh edges
    pub max_iter: u32,
    /// The new edges must be shorter than `max(max_l_abs, max_l_rel * l_max)` where
    /// `l_max` is the longest edge in the cavity
    pub max_l_rel: f64,
    pub max_l_abs: f64,
    /// The new elements must have a quality above `min(min_q_abs, min_q_rel * q_min)`
    pub min_q_rel: f64,
    pub min_q_abs: f64,
    /// Max. angle between the normals of the new boundary faces and the geometry (in
    /// degrees)
    pub max_angle: f64,
}

impl Default for CollapseParams {
    fn default() -> Self {
        Self {
            l: f64::sqrt(0.5),
            max_iter: 1,
            max_l_rel: 1.0,
            max_l_abs: 1.5 * f64::sqrt(2.0),
            min_q_rel: 1.0,
            min_q_abs: 0.5,
            max_angle: 25.0,
        }
    }
}

/// Parameters of the swap step
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapParams {
    /// Target quality: edges whose cavity has a lower quality are swapped
    pub q: f64,
    /// Max. number of loops through the mesh edges
    pub max_iter: u32,
    /// Bounds on the lengths of the new edges, relative to the cavity lengths or absolute
    pub max_l_rel: f64,
    pub max_l_abs: f64,
    pub min_l_rel: f64,
    pub min_l_abs: f64,
    /// Max. angle between the normals of the new boundary faces and the geometry (in
    /// degrees)
    pub max_angle: f64,
}

impl Default for SwapParams {
    fn default() -> Self {
        Self {
            q: 0.8,
            max_iter: 2,
            max_l_rel: 1.5,
            max_l_abs: 1.5 * f64::sqrt(2.0),
            min_l_rel: 0.75,
            min_l_abs: 0.75 / f64::sqrt(2.0),
            max_angle: 25.0,
        }
    }
}

/// Parameters of the smoothing step
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothParams {
    /// Number of loops through the mesh vertices
    pub n_iter: u32,
    pub method: SmoothingMethod,
    /// Relaxation factors tried in turn until the moved vertex gives a valid cavity
    pub relax: Vec<f64>,
    /// Do not move the vertices where the metric size is a local minimum
    pub keep_local_minima: bool,
    /// Max. angle between the normals of the new boundary faces and the geometry (in
    /// degrees)
    pub max_angle: f64,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            n_iter: 2,
            method: SmoothingMethod::Laplacian,
            relax: vec![0.5, 0.25, 0.125],
            keep_local_minima: false,
            max_angle: 25.0,
        }
    }
}

/// Remesher parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemesherParams {
    /// Number of collapse - split - swap - smooth loops
    pub num_iter: u32,
    /// Perform a first set of loops targeting only the longest edges
    pub two_steps: bool,
    pub split: SplitParams,
    pub collapse: CollapseParams,
    pub swap: SwapParams,
    pub smooth: SmoothParams,
    /// Stop when a loop applies no modification and the mean quality changes by less than
    /// this value
    pub convergence_tol: Option<f64>,
    /// Check the remesher state after every step
    pub debug: bool,
}

impl Default for RemesherParams {
    fn default() -> Self {
        Self {
            num_iter: 4,
            two_steps: false,
            split: SplitParams::default(),
            collapse: CollapseParams::default(),
            swap: SwapParams::default(),
            smooth: SmoothParams::default(),
            convergence_tol: None,
            debug: false,
        }
    }
}

impl RemesherParams {
    /// Read the parameters from a json string; missing fields take their default value
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Vertex information
struct VtxInfo<const D: usize, M: Metric<D>> {
    /// Vertex coordinates
    vx: Point<D>,
    /// Tag
    tag: TopoTag,
    /// Metric
    m: M,
    /// Elements containing the vertex
    els: SortedVec<Idx>,
}

/// Element information
#[derive(Clone, Copy, Debug)]
pub struct ElemInfo<E: Elem> {
    /// Element connectivity
    pub el: E,
    /// Element tag
    pub tag: Tag,
    /// Quality
    pub q: f64,
}

enum TrySwapResult {
    QualitySufficient,
    FixedEdge,
    CouldNotSwap,
    CouldSwap,
}

/// Remesher for simplex meshes of elements E in dimension D
///
/// Vertices and elements are stored in maps indexed by ids that are never reused, so that
/// the local modifications do not invalidate the ids of the rest of the mesh
pub struct Remesher<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>> {
    /// The topology information
    topo: Topology,
    /// Vertices
    verts: FxHashMap<Idx, VtxInfo<D, M>>,
    /// Elements
    elems: FxHashMap<Idx, ElemInfo<E>>,
    /// Edges, with the number of elements they belong to
    edges: FxHashMap<[Idx; 2], i16>,
    /// Tagged faces (sorted)
    tagged_faces: FxHashMap<E::Face, Tag>,
    /// Next vertex Id
    next_vert: Idx,
    /// Next element Id
    next_elem: Idx,
    /// Geometry
    geom: G,
    /// Statistics
    stats: Vec<StepStats>,
}

impl<const D: usize, E: Elem, M: Metric<D>, G: Geometry<D>> Remesher<D, E, M, G> {
    /// Initialize the remesher from a mesh, a metric defined at the vertices and a
    /// geometry. The mesh topology must have been computed. The boundary vertices are
    /// projected onto the geometry.
    pub fn new(mesh: &SimplexMesh<D, E>, m: &[M], geom: G) -> Result<Self> {
        info!(
            "Initialize the remesher with {} {D}D vertices / {} {}",
            mesh.n_verts(),
            mesh.n_elems(),
            E::NAME
        );
        if m.len() != mesh.n_verts() as usize {
            return Err(Error::from(&format!(
                "invalid metric: {} values for {} vertices",
                m.len(),
                mesh.n_verts()
            )));
        }
        for x in m {
            x.check()?;
        }

        let topo = mesh.get_topology()?.clone();
        let vtags = mesh.get_vertex_tags()?;
        geom.check(&topo)?;

        let mut res = Self {
            topo,
            verts: FxHashMap::default(),
            elems: FxHashMap::default(),
            edges: FxHashMap::default(),
            tagged_faces: FxHashMap::default(),
            next_vert: 0,
            next_elem: 0,
            geom,
            stats: Vec::new(),
        };

        // Insert the vertices
        let mut dmax = 0.0_f64;
        for ((mut p, tag), mi) in mesh.verts().zip(vtags.iter()).zip(m.iter()) {
            if tag.0 < E::DIM as Dim {
                dmax = dmax.max(res.geom.project(&mut p, tag)?);
            }
            res.insert_vertex(p, tag, mi);
        }
        debug!("Max. distance between the vertices and the geometry: {dmax:.2e}");

        // Insert the elements
        for (e, t) in mesh.elems().zip(mesh.etags()) {
            res.insert_elem(e, t)?;
        }

        // Tagged faces, including the boundaries / interfaces missing in the mesh
        for (f, t) in mesh.faces().zip(mesh.ftags()) {
            res.add_tagged_face(f, t)?;
        }
        let etags: Vec<Tag> = mesh.etags().collect();
        let face_dim = E::Face::DIM as Dim;
        let mut n_added = 0;
        for (f, els) in get_face_to_elem(mesh.elems()) {
            if res.tagged_faces.contains_key(&f) {
                continue;
            }
            let parents: FxHashSet<Tag> = els.iter().map(|&i| etags[i as usize]).collect();
            if els.len() == 1 || parents.len() > 1 {
                let tag = res
                    .topo
                    .get_from_parents_iter(face_dim, parents.iter().copied())
                    .map(|n| n.tag.1)
                    .ok_or_else(|| Error::from(&format!("no tag found for face {f:?}")))?;
                res.add_tagged_face(f, tag)?;
                n_added += 1;
            }
        }
        if n_added > 0 {
            debug!("{n_added} untagged boundary / interface faces were tagged");
        }

        res.check()?;
        res.print_stats();
        res.stats.push(StepStats::Init(InitStats::new(&res)));
        Ok(res)
    }

    /// Check that the remesher holds a valid mesh
    pub fn check(&self) -> Result<()> {
        debug!("Check the remesher state");

        let mut edges: FxHashMap<[Idx; 2], i16> = FxHashMap::default();
        let mut faces: FxHashMap<E::Face, Vec<Tag>> = FxHashMap::default();

        for (i_elem, e) in &self.elems {
            let etag = (E::DIM as Dim, e.tag);
            if self.topo.get(etag).is_none() {
                return Err(Error::from(&format!(
                    "element {i_elem}: tag {etag:?} not in the topology"
                )));
            }
            for i in e.el.iter() {
                // Are element-to-vertex and vertex-to-element consistent?
                let v = self
                    .verts
                    .get(i)
                    .ok_or_else(|| Error::from(&format!("element {i_elem}: vertex {i} not found")))?;
                if v.els.binary_search(i_elem).is_err() {
                    return Err(Error::from(&format!(
                        "vertex {i} does not know element {i_elem}"
                    )));
                }
                // Is the vertex tag a child of the element tag?
                if self.topo.parent(etag, v.tag) != Some(etag) {
                    return Err(Error::from(&format!(
                        "element {i_elem}: vertex {i} has an invalid tag {:?} (element tag {etag:?})",
                        v.tag
                    )));
                }
            }
            // Is the element valid?
            if self.gelem(&e.el).vol() <= 0. {
                return Err(Error::from(&format!("element {i_elem}: invalid volume")));
            }
            for i_edge in 0..E::N_EDGES {
                *edges.entry(e.el.sorted_edge(i_edge)).or_insert(0) += 1;
            }
            for i_face in 0..E::N_FACES {
                faces
                    .entry(e.el.face(i_face).sorted())
                    .or_default()
                    .push(e.tag);
            }
        }

        // Are the edges consistent with the elements?
        if edges != self.edges {
            return Err(Error::from("the edges do not match the elements"));
        }

        // Are the boundaries / interfaces tagged?
        let face_dim = E::Face::DIM as Dim;
        for (f, etags) in &faces {
            let is_tagged = self.tagged_faces.contains_key(f);
            match etags.len() {
                1 => {
                    if !is_tagged {
                        return Err(Error::from(&format!("boundary face {f:?} not tagged")));
                    }
                }
                2 => {
                    if etags[0] != etags[1] && !is_tagged {
                        return Err(Error::from(&format!("interface face {f:?} not tagged")));
                    }
                }
                n => {
                    return Err(Error::from(&format!(
                        "face {f:?} belongs to {n} elements"
                    )));
                }
            }
        }
        for (f, &t) in &self.tagged_faces {
            if !faces.contains_key(f) {
                return Err(Error::from(&format!("tagged face {f:?} not in the mesh")));
            }
            if self.topo.get((face_dim, t)).is_none() {
                return Err(Error::from(&format!(
                    "face {f:?}: tag {:?} not in the topology",
                    (face_dim, t)
                )));
            }
        }

        for (i_vert, v) in &self.verts {
            // Do all elements exist?
            for i_elem in v.els.iter() {
                if !self.elems.contains_key(i_elem) {
                    return Err(Error::from(&format!(
                        "vertex {i_vert}: element {i_elem} not found"
                    )));
                }
            }
            // Is the metric valid?
            v.m.check()?;
        }

        Ok(())
    }

    /// Create a `SimplexMesh`. If `only_bdy_faces` is true, the tagged faces between two
    /// elements are not exported
    #[must_use]
    pub fn to_mesh(&self, only_bdy_faces: bool) -> SimplexMesh<D, E> {
        debug!("Build a mesh");

        let l2g: Vec<Idx> = self.verts.keys().copied().collect();
        let g2l: FxHashMap<Idx, Idx> = l2g
            .iter()
            .enumerate()
            .map(|(i, &k)| (k, i as Idx))
            .collect();

        let verts = self.verts.values().map(|v| v.vx).collect();
        let elems: Vec<E> = self
            .elems
            .values()
            .map(|e| E::from_iter(e.el.iter().map(|i| g2l[i])))
            .collect();
        let etags = self.elems.values().map(|e| e.tag).collect();

        // sorted face -> (face oriented as in its first element, # of elements)
        let mut face_count: FxHashMap<E::Face, (E::Face, u32)> = FxHashMap::default();
        for e in &elems {
            for i_face in 0..E::N_FACES {
                let f = e.face(i_face);
                face_count
                    .entry(f.sorted())
                    .and_modify(|x| x.1 += 1)
                    .or_insert((f, 1));
            }
        }

        let mut faces = Vec::new();
        let mut ftags = Vec::new();
        for (f, (face, n)) in face_count {
            if only_bdy_faces && n > 1 {
                continue;
            }
            let global = E::Face::from_iter(f.iter().map(|&i| l2g[i as usize]));
            if let Some(tag) = self.face_tag(&global) {
                faces.push(face);
                ftags.push(tag);
            }
        }

        SimplexMesh::new(verts, elems, etags, faces, ftags)
    }

    /// Insert a new vertex, and get its index
    pub fn insert_vertex(&mut self, pt: Point<D>, tag: &TopoTag, m: &M) -> Idx {
        self.verts.insert(
            self.next_vert,
            VtxInfo {
                vx: pt,
                tag: *tag,
                m: *m,
                els: SortedVec::new(),
            },
        );
        self.next_vert += 1;
        self.next_vert - 1
    }

    /// Remove a vertex; it must not belong to any element
    pub fn remove_vertex(&mut self, idx: Idx) -> Result<()> {
        let vx = self
            .verts
            .get(&idx)
            .ok_or_else(|| Error::from(&format!("vertex {idx} not found")))?;
        if !vx.els.is_empty() {
            return Err(Error::from(&format!(
                "vertex {idx} belongs to {} elements",
                vx.els.len()
            )));
        }
        self.verts.remove(&idx);
        Ok(())
    }

    /// Get the coordinates, tag and metric of a vertex
    #[must_use]
    pub fn get_vertex(&self, i: Idx) -> Option<(Point<D>, TopoTag, M)> {
        self.verts.get(&i).map(|v| (v.vx, v.tag, v.m))
    }

    /// Get the (sorted) ids of the elements that contain a vertex
    pub fn vertex_elements(&self, i: Idx) -> Result<&[Idx]> {
        self.verts
            .get(&i)
            .map(|v| v.els.as_slice())
            .ok_or_else(|| Error::from(&format!("vertex {i} not found")).into())
    }

    /// Get the number of elements that contain an edge
    #[must_use]
    pub fn elem_count(&self, mut edg: [Idx; 2]) -> i16 {
        edg.sort_unstable();
        self.edges.get(&edg).copied().unwrap_or(0)
    }

    /// Insert a new element. An error is returned if it is invalid
    pub fn insert_elem(&mut self, el: E, tag: Tag) -> Result<()> {
        if let Some(i) = el.iter().find(|&&i| !self.verts.contains_key(&i)) {
            return Err(Error::from(&format!("element {el:?}: vertex {i} not found")));
        }
        let q = self.gelem(&el).quality();
        if q <= 0.0 {
            return Err(Error::from(&format!("invalid element {el:?} (q = {q:.2e})")));
        }
        for i in el.iter() {
            self.verts.get_mut(i).unwrap().els.insert(self.next_elem);
        }
        for i_edge in 0..E::N_EDGES {
            *self.edges.entry(el.sorted_edge(i_edge)).or_insert(0) += 1;
        }
        self.elems.insert(self.next_elem, ElemInfo { el, tag, q });
        self.next_elem += 1;
        Ok(())
    }

    /// Remove an element
    pub fn remove_elem(&mut self, idx: Idx) -> Result<()> {
        let e = self
            .elems
            .remove(&idx)
            .ok_or_else(|| Error::from(&format!("element {idx} not found")))?;
        for i in e.el.iter() {
            if let Some(v) = self.verts.get_mut(i) {
                v.els.remove_item(&idx);
            }
        }
        for i_edge in 0..E::N_EDGES {
            let edg = e.el.sorted_edge(i_edge);
            let count = self.edges.get_mut(&edg).unwrap();
            *count -= 1;
            if *count == 0 {
                self.edges.remove(&edg);
            }
        }
        Ok(())
    }

    /// Get an element
    #[must_use]
    pub fn get_elem(&self, i: Idx) -> Option<ElemInfo<E>> {
        self.elems.get(&i).copied()
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
    pub fn n_edges(&self) -> Idx {
        self.edges.len() as Idx
    }

    fn gelem(&self, e: &E) -> E::Geom<D, M> {
        <E::Geom<D, M> as GElem<D, M>>::from_verts(e.iter().map(|i| {
            let v = &self.verts[i];
            (v.vx, v.m)
        }))
    }

    /// Get the tag of a face, if it is tagged
    #[must_use]
    pub fn face_tag(&self, f: &E::Face) -> Option<Tag> {
        self.tagged_faces.get(&f.sorted()).copied()
    }

    fn add_tagged_face(&mut self, f: E::Face, tag: Tag) -> Result<()> {
        if self.tagged_faces.insert(f.sorted(), tag).is_some() {
            return Err(Error::from(&format!("face {f:?} already tagged")));
        }
        Ok(())
    }

    fn remove_tagged_face(&mut self, f: E::Face) -> Result<()> {
        self.tagged_faces
            .remove(&f.sorted())
            .map(|_| ())
            .ok_or_else(|| Error::from(&format!("face {f:?} is not tagged")).into())
    }

    /// Estimate the number of elements of a mesh adapted to the current metric
    #[must_use]
    pub fn complexity(&self) -> f64 {
        let weights = vec![1. / f64::from(E::N_VERTS); E::N_VERTS as usize];
        self.elems
            .values()
            .map(|e| {
                let vol = self.gelem(&e.el).vol();
                let metrics = e.el.iter().map(|i| &self.verts[i].m);
                let m = M::interpolate(weights.iter().copied().zip(metrics));
                vol / (<E::Geom<D, M> as GElem<D, M>>::IDEAL_VOL * m.vol())
            })
            .sum()
    }

    /// Length of an edge in metric space
    fn scaled_edge_length(&self, edg: [Idx; 2]) -> f64 {
        let v0 = &self.verts[&edg[0]];
        let v1 = &self.verts[&edg[1]];
        M::edge_length(&v0.vx, &v0.m, &v1.vx, &v1.m)
    }

    /// Topological dimension and length of an edge
    fn dim_and_scaled_edge_length(&self, edg: [Idx; 2]) -> (Dim, f64) {
        let v0 = &self.verts[&edg[0]];
        let v1 = &self.verts[&edg[1]];
        (
            self.topo.parent(v0.tag, v1.tag).map_or(E::DIM as Dim, |t| t.0),
            M::edge_length(&v0.vx, &v0.m, &v1.vx, &v1.m),
        )
    }

    /// Get the metric at every vertex, in the order used by `to_mesh`
    #[must_use]
    pub fn metrics(&self) -> Vec<M> {
        self.verts.values().map(|v| v.m).collect()
    }

    /// Get an iterator over the edge lengths
    pub fn lengths_iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.edges.keys().map(|&k| self.scaled_edge_length(k))
    }

    fn dims_and_lengths_iter(&self) -> impl Iterator<Item = (Dim, f64)> + '_ {
        self.edges
            .keys()
            .map(|&k| self.dim_and_scaled_edge_length(k))
    }

    /// Get the edge lengths
    #[must_use]
    pub fn lengths(&self) -> Vec<f64> {
        self.lengths_iter().collect()
    }

    /// Get an iterator over the element qualities
    pub fn qualities_iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.elems.values().map(|e| e.q)
    }

    /// Get the element qualities
    #[must_use]
    pub fn qualities(&self) -> Vec<f64> {
        self.qualities_iter().collect()
    }

    /// Min, max and mean of the edge lengths computed with an analytical metric
    pub fn check_edge_lengths_analytical<F: Fn(&Point<D>) -> M>(&self, f: F) -> (f64, f64, f64) {
        let mut mini = f64::INFINITY;
        let mut maxi = f64::NEG_INFINITY;
        let mut mean = 0.0;
        for &[i0, i1] in self.edges.keys() {
            let (p0, p1) = (&self.verts[&i0].vx, &self.verts[&i1].vx);
            let l = M::edge_length(p0, &f(p0), p1, &f(p1));
            mini = mini.min(l);
            maxi = maxi.max(l);
            mean += l;
        }
        (mini, maxi, mean / f64::from(self.n_edges()))
    }

    fn push_stats(&mut self, step: StepStats) {
        let s = step.r_stats();
        info!(
            "{}: {} elems, mean length = {:.3}, mean quality = {:.3}",
            step.name(),
            s.n_elems,
            s.stats_l.mean,
            s.stats_q.mean
        );
        self.stats.push(step);
    }

    /// Loop over the edges and split them if
    ///   - their length is larger than `params.l`
    ///   - no edge shorter than the length bound is created
    ///   - no element with a quality below the quality bound is created
    ///
    /// The number of loops is returned
    pub fn split(&mut self, params: &SplitParams, debug: bool) -> Result<u32> {
        debug!("Split edges with l > {:.2}", params.l);

        let mut n_iter = 0;
        let mut cavity = Cavity::new();
        loop {
            n_iter += 1;

            let edges: Vec<_> = self.edges.keys().copied().collect();
            let dims_and_lengths: Vec<_> = self.dims_and_lengths_iter().collect();
            let q_ref = min_iter(self.qualities_iter());

            let mut n_splits = 0;
            let mut n_fails = 0;
            for i_edge in argsort_edges_decreasing_length(&dims_and_lengths) {
                let edg = edges[i_edge];
                let length = dims_and_lengths[i_edge].1;
                if length < params.l || self.elem_count(edg) == 0 {
                    continue;
                }
                trace!("Try to split edge {edg:?}, l = {length:.2}");
                cavity.init_from_edge(edg, self)?;
                let Seed::Edge([i0, i1]) = cavity.seed else {
                    unreachable!()
                };
                let (t0, t1) = (cavity.tags[i0 as usize], cavity.tags[i1 as usize]);
                let tag = self.topo.parent(t0, t1).ok_or_else(|| {
                    Error::from(&format!("no common parent for tags {t0:?} and {t1:?}"))
                })?;
                if tag.1 < 0 {
                    trace!("Cannot split, fixed entity");
                    n_fails += 1;
                    continue;
                }

                let (mut p, m) = cavity.seed_barycenter();
                if tag.0 < E::DIM as Dim {
                    self.geom.project(&mut p, &tag)?;
                }

                let filled =
                    FilledCavity::new(&cavity, FilledCavityType::EdgeCenter(([i0, i1], p, m)));
                let q_rel = if tag.0 < E::DIM as Dim {
                    params.min_q_rel_bdy
                } else {
                    params.min_q_rel
                };
                let q_min = params.min_q_abs.min(q_rel * q_ref);
                let l_min = params.min_l_abs.min(params.min_l_rel * cavity.l_min);
                if let CavityCheckStatus::Ok(_) = filled.check(l_min, f64::MAX, q_min) {
                    trace!("Edge split");
                    let ip = self.insert_vertex(p, &tag, &m);
                    for &i in &cavity.global_elem_ids {
                        self.remove_elem(i)?;
                    }
                    for (f, t) in filled.faces() {
                        let f = cavity.global_elem(&f);
                        self.insert_elem(E::from_vertex_and_face(ip, &f), t)?;
                    }
                    for (f, _) in cavity.global_tagged_faces() {
                        self.remove_tagged_face(f)?;
                    }
                    for (b, t) in filled.tagged_faces_boundary_global() {
                        self.add_tagged_face(E::Face::from_vertex_and_face(ip, &b), t)?;
                    }
                    n_splits += 1;
                } else {
                    n_fails += 1;
                }
            }

            debug!("Iteration {n_iter}: {n_splits} edges split ({n_fails} failed)");
            self.push_stats(StepStats::Split(SplitStats::new(n_splits, n_fails, self)));
            if debug {
                self.check()?;
            }

            if n_splits == 0 || n_iter == params.max_iter {
                return Ok(n_iter);
            }
        }
    }

    /// Loop over the edges and collapse them if
    ///   - their length is smaller than `params.l`
    ///   - no edge longer than the length bound is created
    ///   - no element with a quality below the quality bound is created
    ///   - the new boundary faces are close enough to the geometry
    ///
    /// The number of loops is returned
    pub fn collapse(&mut self, params: &CollapseParams, debug: bool) -> Result<u32> {
        debug!("Collapse edges with l < {:.2}", params.l);

        let mut n_iter = 0;
        let mut cavity = Cavity::new();
        loop {
            n_iter += 1;

            let edges: Vec<_> = self.edges.keys().copied().collect();
            let dims_and_lengths: Vec<_> = self.dims_and_lengths_iter().collect();

            let mut n_collapses = 0;
            let mut n_fails = 0;
            for i_edge in argsort_edges_increasing_length(&dims_and_lengths) {
                let [mut i0, mut i1] = edges[i_edge];
                let length = dims_and_lengths[i_edge].1;
                if length > params.l {
                    continue;
                }
                if !self.verts.contains_key(&i0)
                    || !self.verts.contains_key(&i1)
                    || self.elem_count([i0, i1]) == 0
                {
                    continue;
                }
                trace!("Try to collapse edge {:?}, l = {length:.2}", [i0, i1]);

                let mut t0 = self.verts[&i0].tag;
                let mut t1 = self.verts[&i1].tag;
                if t0.0 == 0 && t1.0 == 0 {
                    trace!("Cannot collapse, both vertices are corners");
                    n_fails += 1;
                    continue;
                }
                let tag = self.topo.parent(t0, t1).ok_or_else(|| {
                    Error::from(&format!("no common parent for tags {t0:?} and {t1:?}"))
                })?;
                if tag.1 < 0 {
                    trace!("Cannot collapse, fixed entity");
                    n_fails += 1;
                    continue;
                }
                // i0 is removed, it must lie on the entity of the edge
                if t0 != tag {
                    (i0, i1) = (i1, i0);
                    (t0, t1) = (t1, t0);
                }
                if t0 != tag {
                    trace!("Cannot collapse, incompatible tags {t0:?} / {t1:?}");
                    n_fails += 1;
                    continue;
                }

                cavity.init_from_vertex(i0, self)?;
                let Some(local_i1) = cavity.get_local_index(i1) else {
                    unreachable!()
                };
                if !cavity.tagged_faces.is_empty()
                    && !cavity
                        .tagged_faces
                        .iter()
                        .any(|(f, _)| f.contains_vertex(local_i1))
                {
                    trace!("Cannot collapse, the edge is not on the boundary");
                    n_fails += 1;
                    continue;
                }

                let filled = FilledCavity::new(&cavity, FilledCavityType::ExistingVertex(local_i1));
                if !filled.check_tagged_faces(self) {
                    trace!("Cannot collapse, a tagged face would be duplicated");
                    n_fails += 1;
                    continue;
                }
                if !filled.check_boundary_normals(&self.geom, params.max_angle) {
                    n_fails += 1;
                    continue;
                }

                let q_min = params.min_q_abs.min(params.min_q_rel * cavity.q_min);
                let l_max = params.max_l_abs.max(params.max_l_rel * cavity.l_max);
                if let CavityCheckStatus::Ok(_) = filled.check(0.0, l_max, q_min) {
                    trace!("Collapse vertex {i0} onto {i1}");
                    for &i in &cavity.global_elem_ids {
                        self.remove_elem(i)?;
                    }
                    self.remove_vertex(i0)?;
                    for (f, t) in filled.faces() {
                        let f = cavity.global_elem(&f);
                        self.insert_elem(E::from_vertex_and_face(i1, &f), t)?;
                    }
                    for (f, _) in cavity.global_tagged_faces() {
                        self.remove_tagged_face(f)?;
                    }
                    for (b, t) in filled.tagged_faces_boundary_global() {
                        self.add_tagged_face(E::Face::from_vertex_and_face(i1, &b), t)?;
                    }
                    n_collapses += 1;
                } else {
                    n_fails += 1;
                }
            }

            debug!("Iteration {n_iter}: {n_collapses} edges collapsed ({n_fails} failed)");
            self.push_stats(StepStats::Collapse(CollapseStats::new(
                n_collapses,
                n_fails,
                self,
            )));
            if debug {
                self.check()?;
            }

            if n_collapses == 0 || n_iter == params.max_iter {
                return Ok(n_iter);
            }
        }
    }

    /// Try to swap an edge: the cavity of the elements that contain the edge is filled
    /// from each of its other vertices, and the best configuration is kept if it improves
    /// the minimum quality
    fn try_swap(
        &mut self,
        edg: [Idx; 2],
        params: &SwapParams,
        q_target: f64,
        cavity: &mut Cavity<D, E, M>,
    ) -> Result<TrySwapResult> {
        trace!("Try to swap edge {edg:?}");
        cavity.init_from_edge(edg, self)?;
        if cavity.n_elems() == 1 || cavity.q_min > q_target {
            return Ok(TrySwapResult::QualitySufficient);
        }

        let Seed::Edge([i0, i1]) = cavity.seed else {
            unreachable!()
        };
        let (t0, t1) = (cavity.tags[i0 as usize], cavity.tags[i1 as usize]);
        let etag = self.topo.parent(t0, t1).ok_or_else(|| {
            Error::from(&format!("no common parent for tags {t0:?} and {t1:?}"))
        })?;
        if etag.1 < 0 {
            return Ok(TrySwapResult::FixedEdge);
        }
        // edges on ridges / corners cannot be swapped
        if etag.0 < E::Face::DIM as Dim {
            return Ok(TrySwapResult::CouldNotSwap);
        }

        let l_min = params.min_l_abs.min(params.min_l_rel * cavity.l_min);
        let l_max = params.max_l_abs.max(params.max_l_rel * cavity.l_max);

        let mut q_ref = cavity.q_min;
        let mut best = None;
        for n in 0..cavity.n_verts() {
            if n == i0 || n == i1 {
                continue;
            }
            if self.topo.parent(etag, cavity.tags[n as usize]) != Some(etag) {
                continue;
            }
            if !cavity.tagged_faces.is_empty()
                && !cavity.tagged_faces.iter().any(|(f, _)| f.contains_vertex(n))
            {
                continue;
            }
            let filled = FilledCavity::new(cavity, FilledCavityType::ExistingVertex(n));
            if filled.is_same()
                || !filled.check_tagged_faces(self)
                || !filled.check_boundary_normals(&self.geom, params.max_angle)
            {
                continue;
            }
            if let CavityCheckStatus::Ok(q) = filled.check(l_min, l_max, q_ref) {
                trace!("Can swap from vertex {n}: q = {q:.2} > {q_ref:.2}");
                q_ref = q;
                best = Some(n);
            }
        }

        let Some(n) = best else {
            return Ok(TrySwapResult::CouldNotSwap);
        };

        let filled = FilledCavity::new(cavity, FilledCavityType::ExistingVertex(n));
        let n_global = cavity.local2global[n as usize];
        for &i in &cavity.global_elem_ids {
            self.remove_elem(i)?;
        }
        for (f, t) in filled.faces() {
            let f = cavity.global_elem(&f);
            self.insert_elem(E::from_vertex_and_face(n_global, &f), t)?;
        }
        for (f, _) in cavity.global_tagged_faces() {
            self.remove_tagged_face(f)?;
        }
        for (b, t) in filled.tagged_faces_boundary_global() {
            self.add_tagged_face(E::Face::from_vertex_and_face(n_global, &b), t)?;
        }

        Ok(TrySwapResult::CouldSwap)
    }

    /// Loop over the edges and perform edge swaps if
    ///   - the quality of an adjacent element is < `q_target`
    ///   - the new edge lengths are within the bounds
    ///   - the minimum quality is improved
    ///
    /// The number of loops is returned
    pub fn swap(&mut self, q_target: f64, params: &SwapParams, debug: bool) -> Result<u32> {
        debug!("Swap edges: target quality = {q_target:.2}");

        let mut n_iter = 0;
        let mut cavity = Cavity::new();
        loop {
            n_iter += 1;
            let edges: Vec<_> = self.edges.keys().copied().collect();

            let mut n_swaps = 0;
            let mut n_fails = 0;
            let mut n_ok = 0;
            for edg in edges {
                if self.elem_count(edg) == 0 {
                    continue;
                }
                match self.try_swap(edg, params, q_target, &mut cavity)? {
                    TrySwapResult::CouldNotSwap => n_fails += 1,
                    TrySwapResult::CouldSwap => n_swaps += 1,
                    TrySwapResult::QualitySufficient => n_ok += 1,
                    TrySwapResult::FixedEdge => {}
                }
            }

            debug!(
                "Iteration {n_iter}: {n_swaps} edges swapped ({n_fails} failed, {n_ok} OK)"
            );
            self.push_stats(StepStats::Swap(SwapStats::new(n_swaps, n_fails, self)));
            if debug {
                self.check()?;
            }

            if n_swaps == 0 || n_iter == params.max_iter {
                return Ok(n_iter);
            }
        }
    }

    /// Neighbors of the seed vertex of a cavity that lie on the same entity, and whether
    /// the metric size is a local minimum at the seed
    fn smoothing_neighbors(&self, cavity: &Cavity<D, E, M>, i0: Idx) -> (bool, Vec<Idx>) {
        let m0 = &cavity.metrics[i0 as usize];
        let t0 = cavity.tags[i0 as usize];

        let mut local_minimum = true;
        let mut res = Vec::with_capacity(cavity.n_verts() as usize);
        for i1 in 0..cavity.n_verts() {
            if i1 == i0 {
                continue;
            }
            if self.topo.parent(t0, cavity.tags[i1 as usize]) != Some(t0) {
                continue;
            }
            res.push(i1);
            if cavity.metrics[i1 as usize].vol() < 1.01 * m0.vol() {
                local_minimum = false;
            }
        }
        (local_minimum, res)
    }

    fn smooth_laplacian(cavity: &Cavity<D, E, M>, i0: Idx, neighbors: &[Idx]) -> Point<D> {
        let p0 = &cavity.points[i0 as usize];
        let mut p = Point::<D>::zeros();
        for &i1 in neighbors {
            p += cavity.points[i1 as usize] - p0;
        }
        p0 + p / neighbors.len() as f64
    }

    fn smooth_laplacian_2(cavity: &Cavity<D, E, M>, i0: Idx, neighbors: &[Idx]) -> Point<D> {
        let p0 = &cavity.points[i0 as usize];
        let m0 = &cavity.metrics[i0 as usize];
        let mut p = Point::<D>::zeros();
        let mut w = 0.0;
        for &i1 in neighbors {
            let p1 = &cavity.points[i1 as usize];
            let l = m0.length(&(p1 - p0));
            p += l * (p1 - p0);
            w += l;
        }
        p0 + p / w
    }

    fn smooth_avro(cavity: &Cavity<D, E, M>, i0: Idx, neighbors: &[Idx]) -> Point<D> {
        let omega = 0.2;
        let p0 = &cavity.points[i0 as usize];
        let m0 = &cavity.metrics[i0 as usize];
        let mut p = *p0;
        for &i1 in neighbors {
            let e = p0 - cavity.points[i1 as usize];
            let l = m0.length(&e);
            let l4 = l.powi(4);
            p += omega * (1.0 - l4) * f64::exp(-l4) / l * e;
        }
        p
    }

    /// Move the vertices to improve the element qualities. Corners, vertices on fixed
    /// entities and vertices without any neighbor on the same entity are not moved
    pub fn smooth(&mut self, params: &SmoothParams, debug: bool) -> Result<()> {
        debug!("Smooth vertices ({:?})", params.method);

        // the vertices are modified while iterating over them
        let verts: Vec<_> = self.verts.keys().copied().collect();

        let mut cavity = Cavity::new();
        for n_iter in 0..params.n_iter {
            let mut n_fails = 0;
            let mut n_min = 0;
            let mut n_smooth = 0;
            for &i0 in &verts {
                let t0 = self.verts[&i0].tag;
                if t0.0 == 0 || t0.1 < 0 {
                    continue;
                }
                trace!("Try to smooth vertex {i0}");
                cavity.init_from_vertex(i0, self)?;
                let Seed::Vertex(i0_local) = cavity.seed else {
                    unreachable!()
                };

                let (is_local_minimum, neighbors) = self.smoothing_neighbors(&cavity, i0_local);
                if params.keep_local_minima && is_local_minimum {
                    trace!("Won't smooth, local minimum of m");
                    n_min += 1;
                    continue;
                }
                if neighbors.is_empty() {
                    trace!("Cannot smooth, no suitable neighbor");
                    continue;
                }

                let p0 = cavity.points[i0_local as usize];
                let m0 = cavity.metrics[i0_local as usize];
                let p_smooth = match params.method {
                    SmoothingMethod::Laplacian => {
                        Self::smooth_laplacian(&cavity, i0_local, &neighbors)
                    }
                    SmoothingMethod::Laplacian2 => {
                        Self::smooth_laplacian_2(&cavity, i0_local, &neighbors)
                    }
                    SmoothingMethod::Avro => Self::smooth_avro(&cavity, i0_local, &neighbors),
                };
                if m0.length(&(p_smooth - p0)) < 1e-6 {
                    continue;
                }

                // the move must improve the worst element of the cavity
                let q_min = (1.0 + SMOOTH_MIN_GAIN) * cavity.q_min;
                let mut moved = None;
                for &omega in &params.relax {
                    let mut p = (1.0 - omega) * p0 + omega * p_smooth;
                    if t0.0 < E::DIM as Dim {
                        self.geom.project(&mut p, &t0)?;
                    }
                    let filled = FilledCavity::new(
                        &cavity,
                        FilledCavityType::MovedVertex((i0_local, p, m0)),
                    );
                    if !filled.check_boundary_normals(&self.geom, params.max_angle) {
                        continue;
                    }
                    if let CavityCheckStatus::Ok(_) = filled.check(0.0, f64::MAX, q_min) {
                        moved = Some(p);
                        break;
                    }
                }
                let Some(p) = moved else {
                    trace!("Cannot smooth vertex {i0}, the quality would decrease");
                    n_fails += 1;
                    continue;
                };

                // interpolate the metric from the element that contains the new location
                let mut m = m0;
                let mut best = f64::NEG_INFINITY;
                for i_elem in 0..cavity.n_elems() {
                    let x = cavity.gelem(i_elem).bcoords(&p);
                    let x = x.as_ref();
                    let c = min_iter(x.iter().copied());
                    if c > best {
                        best = c;
                        let e = &cavity.elems[i_elem as usize];
                        m = M::interpolate(
                            x.iter()
                                .copied()
                                .zip(e.iter().map(|&j| &cavity.metrics[j as usize])),
                        );
                    }
                }

                let v = self.verts.get_mut(&i0).unwrap();
                v.vx = p;
                v.m = m;
                for i in &cavity.global_elem_ids {
                    let q = self.gelem(&self.elems[i].el).quality();
                    self.elems.get_mut(i).unwrap().q = q;
                }
                n_smooth += 1;
            }

            debug!(
                "Iteration {}: {n_smooth} vertices moved, {n_fails} fails, {n_min} local minima",
                n_iter + 1
            );
            self.push_stats(StepStats::Smooth(SmoothStats::new(n_smooth, n_fails, self)));
            if debug {
                self.check()?;
            }
        }
        Ok(())
    }

    /// Collapse, split, swap and smooth; the number of modifications is returned
    fn iteration(&mut self, params: &RemesherParams) -> Result<Idx> {
        let n_stats = self.stats.len();
        self.collapse(&params.collapse, params.debug)?;
        self.split(&params.split, params.debug)?;
        self.swap(0.4, &params.swap, params.debug)?;
        self.swap(params.swap.q, &params.swap, params.debug)?;
        self.smooth(&params.smooth, params.debug)?;
        Ok(self.stats[n_stats..].iter().map(StepStats::n_applied).sum())
    }

    fn mean_quality(&self) -> f64 {
        self.stats
            .last()
            .map_or(0.0, |s| s.r_stats().stats_q.mean)
    }

    /// Adapt the mesh to the metric. `cancel` is checked between the iterations: if it is
    /// set, the remesher is left in its current (valid) state and `Ok(())` is returned.
    pub fn remesh(&mut self, params: &RemesherParams, cancel: Option<&AtomicBool>) -> Result<()> {
        info!("Adapt the mesh");
        let now = Instant::now();

        let cancelled = || {
            let res = cancel.is_some_and(|c| c.load(atomic::Ordering::Relaxed));
            if res {
                warn!("Remeshing cancelled");
            }
            res
        };

        if params.two_steps {
            let l_0 = 0.5 * max_iter(self.lengths_iter());
            if l_0 > params.split.l {
                debug!("First step: split edges with l > {l_0:.2}");
                let mut first = params.clone();
                first.split.l = l_0;
                for _ in 0..params.num_iter {
                    if cancelled() {
                        return Ok(());
                    }
                    self.iteration(&first)?;
                }
            }
        }

        let mut q_prev = self.mean_quality();
        for n_iter in 0..params.num_iter {
            if cancelled() {
                return Ok(());
            }
            let n_applied = self.iteration(params)?;
            let q_mean = self.mean_quality();
            debug!(
                "Iteration {}: {n_applied} modifications, mean quality = {q_mean:.3}",
                n_iter + 1
            );
            if let Some(tol) = params.convergence_tol {
                if n_applied == 0 && f64::abs(q_mean - q_prev) < tol {
                    info!("Converged after {} iterations", n_iter + 1);
                    break;
                }
            }
            q_prev = q_mean;
        }

        self.swap(0.4, &params.swap, params.debug)?;
        self.swap(params.swap.q, &params.swap, params.debug)?;

        info!("Done in {:.2}s", now.elapsed().as_secs_f32());
        self.print_stats();
        Ok(())
    }

    /// Print length and quality stats on the mesh / metric
    pub fn print_stats(&self) {
        debug!("{}", RemesherStats::new(self));
    }

    /// Get the statistics of every step
    #[must_use]
    pub fn stats(&self) -> &[StepStats] {
        &self.stats
    }

    /// Statistics of every step as a json string
    pub fn stats_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.stats)?)
    }

    /// Save the statistics of every step to a json file
    pub fn save_stats(&self, fname: &str) -> Result<()> {
        let mut file = File::create(fname)?;
        writeln!(file, "{}", self.stats_json()?)?;
        Ok(())
    }
}
