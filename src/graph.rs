use crate::Idx;

/// Compressed sparse row connectivity
#[derive(Debug, Default, Clone)]
pub struct CSRGraph {
    ptr: Vec<usize>,
    indices: Vec<Idx>,
}

impl CSRGraph {
    fn from_pairs(n: usize, pairs: &[(Idx, Idx)]) -> Self {
        let mut ptr = vec![0; n + 1];
        for &(i, _) in pairs {
            ptr[i as usize + 1] += 1;
        }
        for i in 0..n {
            ptr[i + 1] += ptr[i];
        }
        let mut indices = vec![0; ptr[n]];
        let mut next = ptr.clone();
        for &(i, j) in pairs {
            indices[next[i as usize]] = j;
            next[i as usize] += 1;
        }
        for i in 0..n {
            indices[ptr[i]..ptr[i + 1]].sort_unstable();
        }
        Self { ptr, indices }
    }

    /// Vertex-to-vertex connectivity from a list of edges
    pub fn from_edges(n: usize, edges: &[[Idx; 2]]) -> Self {
        let pairs: Vec<_> = edges
            .iter()
            .flat_map(|e| [(e[0], e[1]), (e[1], e[0])])
            .collect();
        Self::from_pairs(n, &pairs)
    }

    /// Vertex-to-element connectivity from the element-to-vertex connectivity
    pub fn transpose<E: IntoIterator<Item = Idx> + Copy>(n: usize, elems: &[E]) -> Self {
        let mut pairs = Vec::new();
        for (i, &e) in elems.iter().enumerate() {
            pairs.extend(e.into_iter().map(|j| (j, i as Idx)));
        }
        Self::from_pairs(n, &pairs)
    }

    #[must_use]
    pub fn n(&self) -> usize {
        self.ptr.len() - 1
    }

    #[must_use]
    pub fn n_edges(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn row(&self, i: Idx) -> &[Idx] {
        &self.indices[self.ptr[i as usize]..self.ptr[i as usize + 1]]
    }
}
