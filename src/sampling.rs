use rustc_hash::FxHashMap;

/// Marker for an uninitialized slot in the dense inverse map.
const UNMAPPED: u32 = u32::MAX;

/// Inverse sample mapping strategy: point index back to sample index.
///
/// The forward mapping (sample to point) is the kd-tree's permutation
/// array; the inverse is only needed by consumers that address samples
/// through original point indices, such as the k-NN graph. The strategy is
/// a static property of the tree type, not a runtime switch.
pub trait SampleMapping: Default {
    /// Whether the strategy is meant for trees indexing a strict subset of
    /// their points.
    const SUPPORTS_SUBSAMPLING: bool;

    /// Rebuilds the mapping from the sample permutation.
    fn build(&mut self, indices: &[u32], point_count: usize);

    fn clear(&mut self);

    /// Sample index holding `point_index`, or `None` when the point is not
    /// part of the sampling.
    fn sample_from_point(&self, point_index: usize) -> Option<usize>;
}

/// Dense inverse map: one slot per point.
///
/// The natural choice when every point is a sample; O(point_count) memory.
#[derive(Clone, Debug, Default)]
pub struct DenseSampleMap {
    inverse: Vec<u32>,
}

impl SampleMapping for DenseSampleMap {
    const SUPPORTS_SUBSAMPLING: bool = false;

    fn build(&mut self, indices: &[u32], point_count: usize) {
        self.inverse.clear();
        self.inverse.resize(point_count, UNMAPPED);
        for (sample, &point) in indices.iter().enumerate() {
            self.inverse[point as usize] = sample as u32;
        }
    }

    fn clear(&mut self) {
        self.inverse.clear();
    }

    fn sample_from_point(&self, point_index: usize) -> Option<usize> {
        match self.inverse.get(point_index) {
            Some(&s) if s != UNMAPPED => Some(s as usize),
            _ => None,
        }
    }
}

/// Sparse inverse map for subsampled trees.
///
/// Memory is proportional to the sampling, not the cloud.
#[derive(Clone, Debug, Default)]
pub struct SparseSampleMap {
    inverse: FxHashMap<u32, u32>,
}

impl SampleMapping for SparseSampleMap {
    const SUPPORTS_SUBSAMPLING: bool = true;

    fn build(&mut self, indices: &[u32], _point_count: usize) {
        self.inverse = FxHashMap::with_capacity_and_hasher(
            (indices.len() / 4).max(1),
            Default::default(),
        );
        for (sample, &point) in indices.iter().enumerate() {
            self.inverse.insert(point, sample as u32);
        }
    }

    fn clear(&mut self) {
        self.inverse.clear();
    }

    fn sample_from_point(&self, point_index: usize) -> Option<usize> {
        let key = u32::try_from(point_index).ok()?;
        self.inverse.get(&key).map(|&s| s as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_round_trip() {
        let indices = [3u32, 0, 2];
        let mut map = DenseSampleMap::default();
        map.build(&indices, 4);
        assert_eq!(map.sample_from_point(3), Some(0));
        assert_eq!(map.sample_from_point(0), Some(1));
        assert_eq!(map.sample_from_point(2), Some(2));
        assert_eq!(map.sample_from_point(1), None);
        assert_eq!(map.sample_from_point(99), None);
    }

    #[test]
    fn sparse_round_trip() {
        let indices = [5u32, 1];
        let mut map = SparseSampleMap::default();
        map.build(&indices, 8);
        assert_eq!(map.sample_from_point(5), Some(0));
        assert_eq!(map.sample_from_point(1), Some(1));
        assert_eq!(map.sample_from_point(0), None);
    }
}
