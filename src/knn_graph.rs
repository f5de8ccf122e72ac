use nalgebra::SVector;
use num_traits::Zero;
use rayon::prelude::*;

use crate::kdtree::KdTreeBase;
use crate::point::Point;
use crate::sampling::SampleMapping;

/// Precomputed k-nearest-neighbor graph over the samples of a kd-tree.
///
/// One contiguous row of `k` point indices per sample, filled in parallel:
/// every row is an independent read-only kd-tree query writing a disjoint
/// output slice, so no synchronization is needed.
///
/// The graph borrows the tree for its lifetime and resolves point indices
/// to rows through the tree's inverse sample map.
pub struct KnnGraph<'a, P: Point<D>, const D: usize, M: SampleMapping> {
    tree: &'a KdTreeBase<P, D, M>,
    k: usize,
    indices: Vec<u32>,
}

impl<'a, P, const D: usize, M> KnnGraph<'a, P, D, M>
where
    P: Point<D> + Sync,
    P::Scalar: Sync,
    M: SampleMapping + Sync,
{
    /// Builds the graph with `k` neighbors per sample.
    ///
    /// `k` is clamped to `sample_count - 1` since a sample is never its own
    /// neighbor.
    pub fn new(tree: &'a KdTreeBase<P, D, M>, k: usize) -> Self {
        assert!(k > 0, "neighbor rows need k >= 1");
        let k = k.min(tree.sample_count().saturating_sub(1));

        let mut indices = vec![u32::MAX; tree.sample_count() * k];
        if k > 0 {
            indices
                .par_chunks_mut(k)
                .enumerate()
                .for_each(|(sample, row)| {
                    let point_index = tree.point_from_sample(sample);
                    for (slot, neighbor) in
                        row.iter_mut().zip(tree.k_nearest_neighbors_at(point_index, k))
                    {
                        *slot = neighbor as u32;
                    }
                });
        }

        Self { tree, k, indices }
    }
}

impl<'a, P: Point<D>, const D: usize, M: SampleMapping> KnnGraph<'a, P, D, M> {
    /// Neighbors per sample. May be smaller than requested on tiny clouds.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of vertices (samples) in the graph.
    pub fn len(&self) -> usize {
        self.tree.sample_count()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.sample_count() == 0
    }

    /// The neighbor row of the given point, or `None` when the point is not
    /// part of the tree's sampling.
    pub fn neighbors(&self, point_index: usize) -> Option<&[u32]> {
        let sample = self.tree.sample_from_point(point_index)?;
        Some(&self.indices[sample * self.k..(sample + 1) * self.k])
    }

    /// Region-growing range query through graph edges.
    ///
    /// Starting from the given point, neighbors within `radius` are
    /// accepted and expanded in turn; the collection is geodesic-like and
    /// bounded by the Euclidean ball, so disconnected parts of the ball may
    /// be missed when `k` is small. Yields point indices, excluding the
    /// query point. Returns `None` when the point is not sampled.
    pub fn range_neighbors(
        &self,
        point_index: usize,
        radius: P::Scalar,
    ) -> Option<KnnGraphRangeIter<'_, 'a, P, D, M>> {
        assert!(radius >= P::Scalar::zero(), "radius must be non-negative");
        self.tree.sample_from_point(point_index)?;

        let mut visited = vec![false; self.tree.point_count()];
        visited[point_index] = true;
        Some(KnnGraphRangeIter {
            graph: self,
            point: self.tree.point(point_index).pos(),
            r2: radius * radius,
            pending: vec![point_index as u32],
            cursor: None,
            visited,
        })
    }
}

/// Iterator state of [`KnnGraph::range_neighbors`].
pub struct KnnGraphRangeIter<'g, 'a, P: Point<D>, const D: usize, M: SampleMapping> {
    graph: &'g KnnGraph<'a, P, D, M>,
    point: SVector<P::Scalar, D>,
    r2: P::Scalar,
    /// Accepted vertices whose rows still have to be expanded.
    pending: Vec<u32>,
    /// Row currently being scanned: (point index, offset in its row).
    cursor: Option<(u32, usize)>,
    visited: Vec<bool>,
}

impl<P: Point<D>, const D: usize, M: SampleMapping> Iterator
    for KnnGraphRangeIter<'_, '_, P, D, M>
{
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if let Some((vertex, mut offset)) = self.cursor {
                // Rows only ever hold sampled points, so the lookup cannot miss.
                let row = self.graph.neighbors(vertex as usize)?;
                while offset < row.len() {
                    let neighbor = row[offset];
                    offset += 1;
                    if self.visited[neighbor as usize] {
                        continue;
                    }
                    self.visited[neighbor as usize] = true;
                    let pos = self.graph.tree.point(neighbor as usize).pos();
                    if (pos - self.point).norm_squared() <= self.r2 {
                        self.pending.push(neighbor);
                        self.cursor = Some((vertex, offset));
                        return Some(neighbor as usize);
                    }
                }
                self.cursor = None;
            } else {
                let vertex = self.pending.pop()?;
                self.cursor = Some((vertex, 0));
            }
        }
    }
}
