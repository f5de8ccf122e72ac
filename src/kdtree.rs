use std::fmt;

use nalgebra::SVector;

use crate::bounds::Aabb;
use crate::node::{Node, MAX_DEPTH};
use crate::point::Point;
use crate::query::{knn_search, nearest_search, KNearestIter, RangeIter};
use crate::sampling::{DenseSampleMap, SampleMapping, SparseSampleMap};

/// Static kd-tree over a point cloud, fully indexed.
pub type KdTree<P, const D: usize> = KdTreeBase<P, D, DenseSampleMap>;

/// Static kd-tree over a subsampled point cloud.
///
/// Same structure as [`KdTree`], but the inverse sample map is a hash map
/// sized by the sampling instead of the whole cloud.
pub type SubsampledKdTree<P, const D: usize> = KdTreeBase<P, D, SparseSampleMap>;

/// Static kd-tree generic over the inverse sample mapping strategy.
///
/// The tree owns the cloud, a sample permutation and a flat array of packed
/// nodes. It is frozen after [`build`](Self::build); queries borrow it
/// read-only, so any number may run concurrently.
pub struct KdTreeBase<P: Point<D>, const D: usize, M: SampleMapping> {
    points: Vec<P>,
    indices: Vec<u32>,
    nodes: Vec<Node<P::Scalar, D>>,
    min_cell_size: u16,
    leaf_count: u32,
    inverse: M,
}

impl<P: Point<D>, const D: usize, M: SampleMapping> Default for KdTreeBase<P, D, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Point<D>, const D: usize, M: SampleMapping> KdTreeBase<P, D, M> {
    /// Maximum depth of the tree; deeper cells are forced into leaves.
    pub const MAX_DEPTH: usize = MAX_DEPTH;

    /// Maximum number of nodes, bounded by the child-id bit width.
    pub const MAX_NODE_COUNT: usize = Node::<P::Scalar, D>::MAX_COUNT;

    /// Maximum number of points a tree can index.
    pub const MAX_POINT_COUNT: usize = Node::<P::Scalar, D>::MAX_SAMPLE_COUNT;

    /// Creates an empty tree. Call [`build`](Self::build) to populate it.
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            indices: Vec::new(),
            nodes: Vec::new(),
            min_cell_size: 64,
            leaf_count: 0,
            inverse: M::default(),
        }
    }

    /// Builds a tree indexing every point of `points`.
    pub fn from_points(points: Vec<P>) -> Self {
        let mut tree = Self::new();
        tree.build(points);
        tree
    }

    // Parameters --------------------------------------------------------------

    /// Minimal number of samples per leaf cell.
    pub fn min_cell_size(&self) -> u16 {
        self.min_cell_size
    }

    /// Sets the minimal leaf population. Takes effect at the next build.
    pub fn set_min_cell_size(&mut self, min_cell_size: u16) {
        assert!(min_cell_size > 0, "leaf cells must hold at least one sample");
        self.min_cell_size = min_cell_size;
    }

    // Accessors ---------------------------------------------------------------

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn sample_count(&self) -> usize {
        self.indices.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count as usize
    }

    pub fn points(&self) -> &[P] {
        &self.points
    }

    /// The sample permutation: `samples()[s]` is the point index of sample `s`.
    pub fn samples(&self) -> &[u32] {
        &self.indices
    }

    pub fn point(&self, point_index: usize) -> &P {
        &self.points[point_index]
    }

    /// Point index associated with the given sample index.
    pub fn point_from_sample(&self, sample_index: usize) -> usize {
        self.indices[sample_index] as usize
    }

    /// Sample index holding the given point, when the point is sampled.
    pub fn sample_from_point(&self, point_index: usize) -> Option<usize> {
        self.inverse.sample_from_point(point_index)
    }

    pub(crate) fn nodes(&self) -> &[Node<P::Scalar, D>] {
        &self.nodes
    }

    // Construction ------------------------------------------------------------

    /// Builds the tree over `points`, indexing every point.
    pub fn build(&mut self, points: Vec<P>) {
        let sampling = (0..points.len() as u32).collect();
        self.build_with_sampling(points, sampling);
    }

    /// Builds the tree over `points`, indexing only the points listed in
    /// `sampling`. Sample indices must be distinct and in range.
    pub fn build_with_sampling(&mut self, points: Vec<P>, sampling: Vec<u32>) {
        assert!(
            points.len() <= Self::MAX_POINT_COUNT,
            "point cloud exceeds the index capacity"
        );
        assert!(self.min_cell_size > 0);

        self.clear();
        self.points = points;
        self.index(sampling);
    }

    /// Re-indexes the same cloud with a new sampling, keeping the points.
    pub fn rebuild_with_sampling(&mut self, sampling: Vec<u32>) {
        assert!(sampling.len() <= self.points.len());
        self.nodes.clear();
        self.leaf_count = 0;
        self.inverse.clear();
        self.index(sampling);
    }

    /// Resets the tree to its empty state.
    pub fn clear(&mut self) {
        self.points.clear();
        self.indices.clear();
        self.nodes.clear();
        self.leaf_count = 0;
        self.inverse.clear();
    }

    fn index(&mut self, sampling: Vec<u32>) {
        self.indices = sampling;
        if self.indices.is_empty() {
            return;
        }

        self.nodes
            .reserve(4 * self.indices.len() / self.min_cell_size as usize + 1);
        self.nodes.push(Node::leaf(0, 0));
        self.build_rec(0, 0, self.indices.len(), 1);

        self.inverse.build(&self.indices, self.points.len());

        debug_assert!(self.is_valid());
    }

    fn build_rec(&mut self, node_id: usize, start: usize, end: usize, level: usize) {
        let count = end - start;
        let capped = self.nodes.len() + 2 > Self::MAX_NODE_COUNT;
        if count <= self.min_cell_size as usize || level >= MAX_DEPTH || capped {
            debug_assert!(count <= u16::MAX as usize);
            self.nodes[node_id] = Node::leaf(start as u32, count as u16);
            self.leaf_count += 1;
        } else {
            let mut aabb = Aabb::from_point(self.points[self.indices[start] as usize].pos());
            for i in start + 1..end {
                aabb.extend(&self.points[self.indices[i] as usize].pos());
            }

            let dim = aabb.longest_axis();
            let split = aabb.center()[dim];
            let mid = self.partition(start, end, dim, split);

            let first_child = self.nodes.len() as u32;
            self.nodes[node_id] = Node::inner(dim, split, first_child);
            self.nodes.push(Node::leaf(0, 0));
            self.nodes.push(Node::leaf(0, 0));

            self.build_rec(first_child as usize, start, mid, level + 1);
            self.build_rec(first_child as usize + 1, mid, end, level + 1);
        }
    }

    /// In-place partition of `indices[start..end]` by `pos[dim] < value`.
    /// Returns the index of the first sample of the right group.
    fn partition(&mut self, start: usize, end: usize, dim: usize, value: P::Scalar) -> usize {
        let points = &self.points;
        let slice = &mut self.indices[start..end];
        let mut i = 0;
        let mut j = slice.len();
        while i < j {
            if points[slice[i] as usize].pos()[dim] < value {
                i += 1;
            } else {
                j -= 1;
                slice.swap(i, j);
            }
        }
        start + i
    }

    // Queries -----------------------------------------------------------------

    /// The `k` nearest sampled points to an external query position.
    ///
    /// Yields point indices in heap order, not by distance; `k` may exceed
    /// the sample count, in which case every sample is returned.
    pub fn k_nearest_neighbors(&self, point: &SVector<P::Scalar, D>, k: usize) -> KNearestIter {
        assert!(k > 0, "k-nearest queries need k >= 1");
        knn_search(self, *point, k, None)
    }

    /// The `k` nearest sampled points to the point at `index`, excluding the
    /// point itself.
    pub fn k_nearest_neighbors_at(&self, index: usize, k: usize) -> KNearestIter {
        assert!(k > 0, "k-nearest queries need k >= 1");
        let point = self.points[index].pos();
        knn_search(self, point, k, Some(index as u32))
    }

    /// The sampled point closest to an external query position.
    pub fn nearest_neighbor(&self, point: &SVector<P::Scalar, D>) -> Option<usize> {
        nearest_search(self, *point, None)
    }

    /// The sampled point closest to the point at `index`, excluding the
    /// point itself.
    pub fn nearest_neighbor_at(&self, index: usize) -> Option<usize> {
        let point = self.points[index].pos();
        nearest_search(self, point, Some(index as u32))
    }

    /// All sampled points within distance `radius` of an external query
    /// position, as a lazy iterator.
    pub fn range_neighbors(
        &self,
        point: &SVector<P::Scalar, D>,
        radius: P::Scalar,
    ) -> RangeIter<'_, P, D, M> {
        RangeIter::new(self, *point, radius, None)
    }

    /// All sampled points within distance `radius` of the point at `index`,
    /// excluding the point itself.
    pub fn range_neighbors_at(&self, index: usize, radius: P::Scalar) -> RangeIter<'_, P, D, M> {
        let point = self.points[index].pos();
        RangeIter::new(self, point, radius, Some(index as u32))
    }

    // Validation --------------------------------------------------------------

    /// Full structural check: the sample permutation is a set of distinct
    /// in-range point indices, leaf ranges tile `[0, sample_count)` and
    /// every sample lies on the correct side of each ancestor split plane.
    ///
    /// Runs after every build under `debug_assertions`; exposed so tests and
    /// debugging sessions can call it on demand.
    pub fn is_valid(&self) -> bool {
        if self.indices.is_empty() {
            return self.nodes.is_empty();
        }
        if self.nodes.is_empty() || self.indices.len() > self.points.len() {
            return false;
        }

        let mut seen = vec![false; self.points.len()];
        for &i in &self.indices {
            match seen.get_mut(i as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }

        self.subtree_range(0, 0) == Some((0, self.indices.len()))
    }

    /// Returns the contiguous sample range covered by `node_id`, or `None`
    /// if any structural invariant is broken underneath.
    fn subtree_range(&self, node_id: usize, level: usize) -> Option<(usize, usize)> {
        if level > MAX_DEPTH {
            return None;
        }
        let node = *self.nodes.get(node_id)?;
        if node.is_leaf() {
            let start = node.leaf_start() as usize;
            let end = start + node.leaf_size() as usize;
            (end <= self.indices.len()).then_some((start, end))
        } else {
            let dim = node.split_dim();
            if dim >= D {
                return None;
            }
            let split = node.split_value();
            let first = node.first_child() as usize;
            let (l_start, l_end) = self.subtree_range(first, level + 1)?;
            let (r_start, r_end) = self.subtree_range(first + 1, level + 1)?;
            if l_end != r_start {
                return None;
            }
            let left_ok = self.indices[l_start..l_end]
                .iter()
                .all(|&i| self.points[i as usize].pos()[dim] < split);
            let right_ok = self.indices[r_start..r_end]
                .iter()
                .all(|&i| self.points[i as usize].pos()[dim] >= split);
            (left_ok && right_ok).then_some((l_start, r_end))
        }
    }
}

impl<P: Point<D>, const D: usize, M: SampleMapping> fmt::Debug for KdTreeBase<P, D, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KdTreeBase")
            .field("point_count", &self.point_count())
            .field("sample_count", &self.sample_count())
            .field("node_count", &self.node_count())
            .field("leaf_count", &self.leaf_count())
            .field("min_cell_size", &self.min_cell_size)
            .finish()
    }
}
