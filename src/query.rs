use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::SVector;
use num_traits::Zero;

use crate::kdtree::KdTreeBase;
use crate::node::MAX_DEPTH;
use crate::point::Point;
use crate::sampling::SampleMapping;

/// Pending traversal frame: a node and a lower bound on the squared
/// distance from the query to its cell.
#[derive(Clone, Copy)]
struct Frame<S> {
    node: u32,
    d2: S,
}

/// Candidate neighbor ordered by squared distance, so that the binary heap
/// keeps the current worst candidate on top.
struct Entry<S> {
    d2: S,
    index: u32,
}

impl<S: PartialOrd> PartialEq for Entry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.d2 == other.d2
    }
}

impl<S: PartialOrd> Eq for Entry<S> {}

impl<S: PartialOrd> PartialOrd for Entry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.d2.partial_cmp(&other.d2)
    }
}

impl<S: PartialOrd> Ord for Entry<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

/// Result of a k-nearest query.
///
/// The whole search runs when the query is constructed; iteration then
/// yields point indices in heap order, not by distance. Callers that need
/// sorted output sort the collected indices themselves.
pub struct KNearestIter {
    inner: std::vec::IntoIter<usize>,
}

impl Iterator for KNearestIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for KNearestIter {}

/// Best-first k-nearest search. `skip` excludes one point index from the
/// result, used by index-seeded queries to drop the query point itself.
pub(crate) fn knn_search<P: Point<D>, const D: usize, M: SampleMapping>(
    tree: &KdTreeBase<P, D, M>,
    point: SVector<P::Scalar, D>,
    k: usize,
    skip: Option<u32>,
) -> KNearestIter {
    let nodes = tree.nodes();
    let indices = tree.samples();
    let points = tree.points();

    let mut heap: BinaryHeap<Entry<P::Scalar>> = BinaryHeap::with_capacity(k + 1);
    let mut stack: Vec<Frame<P::Scalar>> = Vec::with_capacity(2 * MAX_DEPTH);
    if !nodes.is_empty() {
        stack.push(Frame {
            node: 0,
            d2: P::Scalar::zero(),
        });
    }

    while let Some(frame) = stack.pop() {
        if heap.len() == k {
            // The cell cannot contain anything closer than the current k-th.
            if let Some(worst) = heap.peek() {
                if frame.d2 >= worst.d2 {
                    continue;
                }
            }
        }

        let node = nodes[frame.node as usize];
        if node.is_leaf() {
            let start = node.leaf_start() as usize;
            let end = start + node.leaf_size() as usize;
            for &idx in &indices[start..end] {
                if skip == Some(idx) {
                    continue;
                }
                let d2 = (points[idx as usize].pos() - point).norm_squared();
                if heap.len() < k {
                    heap.push(Entry { d2, index: idx });
                } else if let Some(worst) = heap.peek() {
                    if d2 < worst.d2 {
                        heap.pop();
                        heap.push(Entry { d2, index: idx });
                    }
                }
            }
        } else {
            let off = point[node.split_dim()] - node.split_value();
            let first = node.first_child();
            let (near, far) = if off < P::Scalar::zero() {
                (first, first + 1)
            } else {
                (first + 1, first)
            };
            stack.push(Frame {
                node: far,
                d2: off * off,
            });
            stack.push(Frame {
                node: near,
                d2: frame.d2,
            });
        }
    }

    let results: Vec<usize> = heap.into_vec().iter().map(|e| e.index as usize).collect();
    KNearestIter {
        inner: results.into_iter(),
    }
}

/// Single-best traversal; the k-nearest machinery specialized to one
/// candidate and a scalar pruning threshold.
pub(crate) fn nearest_search<P: Point<D>, const D: usize, M: SampleMapping>(
    tree: &KdTreeBase<P, D, M>,
    point: SVector<P::Scalar, D>,
    skip: Option<u32>,
) -> Option<usize> {
    let nodes = tree.nodes();
    let indices = tree.samples();
    let points = tree.points();

    let mut best: Option<(P::Scalar, u32)> = None;
    let mut stack: Vec<Frame<P::Scalar>> = Vec::with_capacity(2 * MAX_DEPTH);
    if !nodes.is_empty() {
        stack.push(Frame {
            node: 0,
            d2: P::Scalar::zero(),
        });
    }

    while let Some(frame) = stack.pop() {
        if let Some((best_d2, _)) = best {
            if frame.d2 >= best_d2 {
                continue;
            }
        }

        let node = nodes[frame.node as usize];
        if node.is_leaf() {
            let start = node.leaf_start() as usize;
            let end = start + node.leaf_size() as usize;
            for &idx in &indices[start..end] {
                if skip == Some(idx) {
                    continue;
                }
                let d2 = (points[idx as usize].pos() - point).norm_squared();
                if best.map_or(true, |(best_d2, _)| d2 < best_d2) {
                    best = Some((d2, idx));
                }
            }
        } else {
            let off = point[node.split_dim()] - node.split_value();
            let first = node.first_child();
            let (near, far) = if off < P::Scalar::zero() {
                (first, first + 1)
            } else {
                (first + 1, first)
            };
            stack.push(Frame {
                node: far,
                d2: off * off,
            });
            stack.push(Frame {
                node: near,
                d2: frame.d2,
            });
        }
    }

    best.map(|(_, index)| index as usize)
}

/// Lazy radius query.
///
/// Each `next` call resumes the depth-first traversal where the previous
/// one suspended: first the current leaf cursor is drained, then frames are
/// popped until the next accepted sample is found.
pub struct RangeIter<'a, P: Point<D>, const D: usize, M: SampleMapping> {
    tree: &'a KdTreeBase<P, D, M>,
    point: SVector<P::Scalar, D>,
    r2: P::Scalar,
    skip: Option<u32>,
    stack: Vec<Frame<P::Scalar>>,
    leaf_cursor: u32,
    leaf_end: u32,
}

impl<'a, P: Point<D>, const D: usize, M: SampleMapping> RangeIter<'a, P, D, M> {
    pub(crate) fn new(
        tree: &'a KdTreeBase<P, D, M>,
        point: SVector<P::Scalar, D>,
        radius: P::Scalar,
        skip: Option<u32>,
    ) -> Self {
        assert!(radius >= P::Scalar::zero(), "radius must be non-negative");
        let mut stack = Vec::with_capacity(2 * MAX_DEPTH);
        if !tree.nodes().is_empty() {
            stack.push(Frame {
                node: 0,
                d2: P::Scalar::zero(),
            });
        }
        Self {
            tree,
            point,
            r2: radius * radius,
            skip,
            stack,
            leaf_cursor: 0,
            leaf_end: 0,
        }
    }
}

impl<P: Point<D>, const D: usize, M: SampleMapping> Iterator for RangeIter<'_, P, D, M> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let indices = self.tree.samples();
        let points = self.tree.points();
        let nodes = self.tree.nodes();

        loop {
            while self.leaf_cursor < self.leaf_end {
                let idx = indices[self.leaf_cursor as usize];
                self.leaf_cursor += 1;
                if self.skip == Some(idx) {
                    continue;
                }
                let d2 = (points[idx as usize].pos() - self.point).norm_squared();
                if d2 <= self.r2 {
                    return Some(idx as usize);
                }
            }

            let frame = self.stack.pop()?;
            if frame.d2 > self.r2 {
                continue;
            }

            let node = nodes[frame.node as usize];
            if node.is_leaf() {
                self.leaf_cursor = node.leaf_start();
                self.leaf_end = node.leaf_start() + node.leaf_size() as u32;
            } else {
                let off = self.point[node.split_dim()] - node.split_value();
                let first = node.first_child();
                let (near, far) = if off < P::Scalar::zero() {
                    (first, first + 1)
                } else {
                    (first + 1, first)
                };
                let off2 = off * off;
                let far_d2 = if off2 > frame.d2 { off2 } else { frame.d2 };
                self.stack.push(Frame {
                    node: far,
                    d2: far_d2,
                });
                self.stack.push(Frame {
                    node: near,
                    d2: frame.d2,
                });
            }
        }
    }
}
