use crate::{
    mesh::SimplexMesh,
    topo_elems::{get_face_to_elem, Elem},
    Dim, Error, Idx, Result, Tag, TopoTag,
};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// Entity of the topology: a tagged set of elements of dimension `tag.0` with the tags of
/// the entities of dimension `tag.0 + 1` it bounds
#[derive(Debug, Clone)]
pub struct TopoNode {
    pub tag: TopoTag,
    pub children: FxHashSet<Tag>,
    pub parents: FxHashSet<Tag>,
}

/// Tag topology of a mesh, e.g. in 2d the boundary edges tagged 1 and 2 bound the region
/// tagged 1 and the vertex where they meet is a child of both.
#[derive(Debug, Clone)]
pub struct Topology {
    dim: Dim,
    entities: Vec<Vec<TopoNode>>,
    /// Closest common parent of a pair of entities
    parents: FxHashMap<(TopoTag, TopoTag), TopoTag>,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Topology: dim = {}", self.dim)?;
        for (dim, nodes) in self.entities.iter().enumerate() {
            writeln!(f, "  dim = {dim}:")?;
            for e in nodes {
                let mut parents: Vec<_> = e.parents.iter().collect();
                parents.sort();
                writeln!(f, "    {:?} <- {:?}", e.tag, parents)?;
            }
        }
        Ok(())
    }
}

impl Topology {
    #[must_use]
    pub fn new(dim: Dim) -> Self {
        Self {
            dim,
            entities: vec![vec![]; (dim + 1) as usize],
            parents: FxHashMap::default(),
        }
    }

    #[must_use]
    pub const fn dim(&self) -> Dim {
        self.dim
    }

    #[must_use]
    pub fn ntags(&self, dim: Dim) -> usize {
        self.entities[dim as usize].len()
    }

    #[must_use]
    pub fn tags(&self, dim: Dim) -> Vec<Tag> {
        self.entities[dim as usize].iter().map(|x| x.tag.1).collect()
    }

    #[must_use]
    pub fn get(&self, tag: TopoTag) -> Option<&TopoNode> {
        assert!(tag.0 >= 0 && tag.0 <= self.dim, "Invalid dimension");
        self.entities[tag.0 as usize]
            .iter()
            .find(|e| e.tag.1 == tag.1)
    }

    fn get_mut(&mut self, tag: TopoTag) -> Option<&mut TopoNode> {
        self.entities[tag.0 as usize]
            .iter_mut()
            .find(|e| e.tag.1 == tag.1)
    }

    /// Insert a new entity; its parents must already be present
    pub fn insert(&mut self, tag: TopoTag, parents: &[Tag]) {
        self.insert_iter(tag, parents.iter().copied());
    }

    pub fn insert_iter<I: Iterator<Item = Tag> + Clone>(&mut self, tag: TopoTag, parents: I) {
        assert!(self.get(tag).is_none(), "Tag {tag:?} already exists");

        self.entities[tag.0 as usize].push(TopoNode {
            tag,
            children: FxHashSet::default(),
            parents: parents.clone().collect(),
        });

        for ptag in parents {
            let e = self.get_mut((tag.0 + 1, ptag));
            assert!(e.is_some(), "Parent {ptag} of {tag:?} not found");
            e.unwrap().children.insert(tag.1);
        }
    }

    #[must_use]
    pub fn get_from_parents(&self, dim: Dim, parents: &[Tag]) -> Option<&TopoNode> {
        self.get_from_parents_iter(dim, parents.iter().copied())
    }

    pub fn get_from_parents_iter<I: Iterator<Item = Tag>>(
        &self,
        dim: Dim,
        parents: I,
    ) -> Option<&TopoNode> {
        let parents: FxHashSet<Tag> = parents.collect();
        self.entities[dim as usize]
            .iter()
            .find(|e| e.parents == parents)
    }

    /// Tags of `node` and all its descendants
    fn descendants(&self, node: &TopoNode, res: &mut FxHashSet<TopoTag>) {
        res.insert(node.tag);
        for &c in &node.children {
            if let Some(child) = self.get((node.tag.0 - 1, c)) {
                self.descendants(child, res);
            }
        }
    }

    fn compute_parents(&mut self) {
        let mut parents = FxHashMap::default();
        // Entities are processed from the highest dimension so the closest parent wins
        for dim in (0..=self.dim).rev() {
            for e in &self.entities[dim as usize] {
                let mut children = FxHashSet::default();
                self.descendants(e, &mut children);
                for &tag0 in &children {
                    for &tag1 in &children {
                        parents.insert((tag0, tag1), e.tag);
                    }
                }
            }
        }
        self.parents = parents;
    }

    /// Closest common parent of two entities
    #[must_use]
    pub fn parent(&self, topo0: TopoTag, topo1: TopoTag) -> Option<TopoTag> {
        self.parents.get(&(topo0, topo1)).copied()
    }

    /// Tag of an element (or of a new vertex) from the tags of its vertices: the closest
    /// common parent of all the vertex tags
    pub fn elem_tag<I: Iterator<Item = TopoTag>>(&self, mut tags: I) -> Option<TopoTag> {
        let mut tag = tags.next()?;
        for other in tags {
            tag = self.parent(tag, other)?;
        }
        Some(tag)
    }

    /// Find the tags of the faces of `elems`: the boundary faces and the faces between
    /// elements with different tags. The tags of the (optional) `faces` are used when
    /// available, otherwise new ones are created.
    fn get_faces_and_tags<E: Elem>(
        &mut self,
        elems: &[E],
        etags: &[Tag],
        faces: &[E::Face],
        ftags: &[Tag],
    ) -> Result<(Vec<E::Face>, Vec<Tag>)> {
        let face_dim = E::Face::DIM as Dim;
        let tagged_faces: FxHashMap<E::Face, Tag> = faces
            .iter()
            .zip(ftags.iter())
            .map(|(f, &t)| (f.sorted(), t))
            .collect();
        let mut next_tag: Tag = ftags.iter().copied().max().unwrap_or(0) + 1;

        let face2elem = get_face_to_elem(elems.iter().copied());
        let mut face_list: Vec<_> = face2elem.into_iter().collect();
        // deterministic tag creation
        face_list.sort_by_key(|(_, f2e)| f2e[0]);

        let mut next_faces = Vec::new();
        let mut next_tags = Vec::new();

        for (face, f2e) in face_list {
            let elem_tags: FxHashSet<Tag> = f2e.iter().map(|&i| etags[i as usize]).collect();
            if f2e.len() > 1 && elem_tags.len() == 1 {
                // internal face
                continue;
            }
            let tag = if let Some(&ftag) = tagged_faces.get(&face) {
                if let Some(e) = self.get((face_dim, ftag)) {
                    if e.parents != elem_tags {
                        return Err(Error::from(&format!(
                            "face tag {ftag} is used on faces with different element tags"
                        )));
                    }
                } else {
                    self.insert_iter((face_dim, ftag), elem_tags.iter().copied());
                }
                ftag
            } else if f2e.len() == 1 && !faces.is_empty() {
                return Err(Error::from(&format!("boundary face {face:?} is not tagged")));
            } else if let Some(e) = self.get_from_parents_iter(face_dim, elem_tags.iter().copied()) {
                e.tag.1
            } else {
                let mut tag = next_tag;
                next_tag += 1;
                if elem_tags.iter().any(|&t| t < 0) {
                    tag = -tag;
                }
                self.insert_iter((face_dim, tag), elem_tags.iter().copied());
                tag
            };
            next_faces.push(face);
            next_tags.push(tag);
        }
        Ok((next_faces, next_tags))
    }

    fn elem_tags_to_vert_tags<E: Elem>(&mut self, elems: &[E], etags: &[Tag], vtags: &mut [TopoTag]) {
        let dim = E::DIM as Dim;
        for (e, &etag) in elems.iter().zip(etags.iter()) {
            if self.get((dim, etag)).is_none() {
                self.insert((dim, etag), &[]);
            }
            for &i in e.iter() {
                vtags[i as usize] = (dim, etag);
            }
        }
    }

    fn add_entities<E: Elem>(
        &mut self,
        elems: &[E],
        etags: &[Tag],
        faces: &[E::Face],
        ftags: &[Tag],
        vtags: &mut [TopoTag],
    ) -> Result<()> {
        self.elem_tags_to_vert_tags(elems, etags, vtags);
        if E::DIM == 0 {
            return Ok(());
        }
        let (next_faces, next_tags) = self.get_faces_and_tags(elems, etags, faces, ftags)?;
        self.add_entities::<E::Face>(&next_faces, &next_tags, &[], &[], vtags)
    }

    /// Build the topology from the element and face tags of a mesh, and compute the
    /// topological tag of each vertex (the lowest dimensional entity it belongs to)
    pub fn from_mesh<const D: usize, E: Elem>(
        mesh: &SimplexMesh<D, E>,
    ) -> Result<(Self, Vec<TopoTag>)> {
        debug!("Building topology from mesh");

        let mut topo = Self::new(E::DIM as Dim);
        let mut vtags: Vec<TopoTag> = vec![(E::DIM as Dim, 0); mesh.n_verts() as usize];

        let elems: Vec<_> = mesh.elems().collect();
        let etags: Vec<_> = mesh.etags().collect();
        let faces: Vec<_> = mesh.faces().collect();
        let ftags: Vec<_> = mesh.ftags().collect();
        topo.add_entities(&elems, &etags, &faces, &ftags, &mut vtags)?;
        topo.compute_parents();

        let n = (0..=topo.dim).map(|d| topo.ntags(d)).sum::<usize>() as Idx;
        debug!("{n} topological entities");

        Ok((topo, vtags))
    }
}

#[cfg(test)]
mod tests {
    use super::Topology;
    use crate::{
        mesh::SimplexMesh,
        test_meshes::{test_mesh_2d, test_mesh_3d},
        Dim, Result, Tag,
    };

    #[test]
    fn test_insert() {
        let mut t = Topology::new(3);
        t.insert((3, 1), &[]);
        t.insert((2, 1), &[1]);
        t.insert((2, 2), &[1]);
        t.insert((2, 3), &[1]);
        t.insert((1, 1), &[1, 2]);
        t.insert((1, 2), &[1, 3]);
        t.insert((1, 3), &[3, 2]);

        assert_eq!(t.get_from_parents(1, &[1, 2]).unwrap().tag.1, 1);
        assert_eq!(t.get_from_parents(1, &[1, 3]).unwrap().tag.1, 2);
        assert_eq!(t.get_from_parents(1, &[2, 3]).unwrap().tag.1, 3);
        assert!(t.get_from_parents(1, &[1]).is_none());
    }

    #[test]
    fn test_parents_2d() {
        let mut t = Topology::new(2);
        t.insert((2, 1), &[]);
        t.insert((2, 2), &[]);
        t.insert((1, 1), &[1]);
        t.insert((1, 2), &[1]);
        t.insert((1, 3), &[2]);
        t.insert((1, 4), &[2]);
        t.insert((1, 5), &[1, 2]);
        t.insert((0, 1), &[1, 4, 5]);
        t.insert((0, 2), &[1, 2]);
        t.insert((0, 3), &[2, 3, 5]);
        t.insert((0, 4), &[3, 4]);
        t.compute_parents();

        assert_eq!(t.parent((0, 1), (0, 2)), Some((2, 1)));
        assert_eq!(t.parent((0, 1), (1, 2)), Some((2, 1)));
        assert_eq!(t.parent((0, 4), (1, 5)), Some((2, 2)));
        assert_eq!(t.parent((0, 2), (1, 3)), None);

        let tag = |x: &[(Dim, Tag)]| t.elem_tag(x.iter().copied());
        assert_eq!(tag(&[(2, 1)]), Some((2, 1)));
        assert_eq!(tag(&[(2, 1), (2, 2)]), None);
        assert_eq!(tag(&[(1, 1), (1, 2)]), Some((2, 1)));
        assert_eq!(tag(&[(1, 1), (1, 5)]), Some((2, 1)));
        assert_eq!(tag(&[(0, 1), (0, 3)]), Some((1, 5)));
        assert_eq!(tag(&[(0, 1), (0, 2), (0, 3)]), Some((2, 1)));
    }

    #[test]
    #[should_panic]
    fn test_insert_double() {
        let mut t = Topology::new(3);
        t.insert((3, 1), &[]);
        t.insert((3, 1), &[]);
    }

    #[test]
    #[should_panic]
    fn test_insert_invalid_parent() {
        let mut t = Topology::new(3);
        t.insert((2, 1), &[1]);
    }

    #[test]
    fn test_from_mesh_2d() -> Result<()> {
        let mesh = test_mesh_2d();
        let (topo, vtags) = Topology::from_mesh(&mesh)?;

        assert_eq!(topo.ntags(0), 4);
        assert_eq!(topo.ntags(1), 5);
        assert_eq!(topo.ntags(2), 2);
        assert_eq!(vtags[0], topo.get_from_parents(0, &[1, 4, 5]).unwrap().tag);
        assert_eq!(vtags[1], topo.get_from_parents(0, &[1, 2]).unwrap().tag);
        assert_eq!(vtags[2], topo.get_from_parents(0, &[2, 3, 5]).unwrap().tag);
        assert_eq!(vtags[3], topo.get_from_parents(0, &[3, 4]).unwrap().tag);

        Ok(())
    }

    #[test]
    fn test_from_mesh_2d_nobdy() -> Result<()> {
        let mesh = test_mesh_2d();
        let mesh = SimplexMesh::new(
            mesh.verts().collect(),
            mesh.elems().collect(),
            mesh.etags().collect(),
            Vec::new(),
            Vec::new(),
        );
        let (topo, vtags) = Topology::from_mesh(&mesh)?;

        // boundary edges of regions 1, 2 and the interface
        assert_eq!(topo.ntags(1), 3);
        assert_eq!(topo.ntags(2), 2);
        assert_eq!(vtags[0].0, 0);
        assert_eq!(vtags[1].0, 1);
        assert_eq!(vtags[2].0, 0);
        assert_eq!(vtags[3].0, 1);

        Ok(())
    }

    #[test]
    fn test_from_mesh_3d() -> Result<()> {
        let mesh = test_mesh_3d();
        let (topo, vtags) = Topology::from_mesh(&mesh)?;

        assert_eq!(topo.ntags(0), 8);
        assert_eq!(topo.ntags(1), 12);
        assert_eq!(topo.ntags(2), 6);
        assert_eq!(topo.ntags(3), 1);
        assert!(vtags.iter().all(|t| t.0 == 0));

        let mesh = test_mesh_3d().split();
        let (_, vtags) = Topology::from_mesh(&mesh)?;
        assert_eq!(vtags.iter().filter(|t| t.0 == 0).count(), 8);
        assert_eq!(vtags.iter().filter(|t| t.0 == 1).count(), 12);
        assert_eq!(vtags.iter().filter(|t| t.0 == 2).count(), 6);

        Ok(())
    }

    #[test]
    fn test_invalid_tags() {
        // the same tag on the boundaries of 2 regions
        let mut mesh = test_mesh_2d();
        mesh.mut_ftags().for_each(|tag| *tag = 1);
        assert!(mesh.compute_topology().is_err());

        let mut mesh = test_mesh_2d();
        mesh.mut_ftags()
            .zip([2, 1, 1, 3])
            .for_each(|(tag, v)| *tag = v);
        assert!(mesh.compute_topology().is_err());
    }

    #[test]
    fn test_valid_tags() -> Result<()> {
        let mut mesh = test_mesh_2d();
        mesh.mut_ftags()
            .zip([1, 1, 2, 2])
            .for_each(|(tag, v)| *tag = v);
        mesh.compute_topology()?;
        Ok(())
    }
}
